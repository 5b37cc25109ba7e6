use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, TxHash};
use jsonrpsee::{
    core::{RpcResult, async_trait},
    proc_macros::rpc,
    types::{
        ErrorObjectOwned,
        error::{CALL_EXECUTION_FAILED_CODE, INVALID_PARAMS_CODE},
    },
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};
use whisperpay_bridge::{BridgeReceipt, BridgeRequest, BridgeService};
use whisperpay_core::{SettlementFailure, WhisperError, WhisperResult};
use whisperpay_datastore::FailureLog;
use whisperpay_provisioning::{
    DeploymentReceipt, DeploymentService, DeploymentStatus, PaymentItem, QueuedPayment,
};
use whisperpay_settlement::SettlementOrchestrator;

use crate::metrics::{RpcMetrics, record_latency};

const DEFAULT_FAILURE_LIMIT: usize = 50;
const MAX_FAILURE_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredTransfer {
    pub status: String,
    pub job_creator: Address,
    pub tx_hash: TxHash,
}

#[rpc(server, namespace = "whisperpay")]
pub trait WhisperPayApi {
    /// Provisions a rollup for `wallet` and records the deployment.
    #[method(name = "deployRollup")]
    async fn deploy_rollup(&self, wallet: String) -> RpcResult<DeploymentReceipt>;

    #[method(name = "deploymentStatus")]
    async fn deployment_status(&self, wallet: String) -> RpcResult<DeploymentStatus>;

    /// Seals `items` under the wallet's key and queues them for the next settlement.
    #[method(name = "queuePayment")]
    async fn queue_payment(
        &self,
        wallet: String,
        items: Vec<PaymentItem>,
    ) -> RpcResult<QueuedPayment>;

    /// Sends ETH from the parent chain into the latest deployed rollup.
    #[method(name = "bridgeToRollup")]
    async fn bridge_to_rollup(&self, request: BridgeRequest) -> RpcResult<BridgeReceipt>;

    /// Submits the route-funds call for `job_creator`, or for the configured default creator.
    #[method(name = "triggerTransfer")]
    async fn trigger_transfer(&self, job_creator: Option<String>) -> RpcResult<TriggeredTransfer>;

    /// Most recent settlement failures, newest first.
    #[method(name = "settlementFailures")]
    async fn settlement_failures(&self, limit: Option<usize>) -> RpcResult<Vec<SettlementFailure>>;
}

pub struct WhisperPayService {
    deployments: DeploymentService,
    bridge: BridgeService,
    orchestrator: Option<Arc<SettlementOrchestrator>>,
    failures: Arc<dyn FailureLog>,
    default_job_creator: Option<Address>,
    metrics: RpcMetrics,
}

impl std::fmt::Debug for WhisperPayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperPayService")
            .field("deployments", &self.deployments)
            .field("bridge", &self.bridge)
            .field("settlement", &self.orchestrator.is_some())
            .field("default_job_creator", &self.default_job_creator)
            .finish_non_exhaustive()
    }
}

impl WhisperPayService {
    /// `orchestrator` is `None` when no parent chain is configured; `triggerTransfer` then fails
    /// with a configuration error.
    pub fn new(
        deployments: DeploymentService,
        bridge: BridgeService,
        orchestrator: Option<Arc<SettlementOrchestrator>>,
        failures: Arc<dyn FailureLog>,
        default_job_creator: Option<Address>,
    ) -> Self {
        Self {
            deployments,
            bridge,
            orchestrator,
            failures,
            default_job_creator,
            metrics: RpcMetrics::default(),
        }
    }

    async fn observe<T>(
        &self,
        method: &'static str,
        call: impl Future<Output = WhisperResult<T>>,
    ) -> RpcResult<T> {
        self.metrics.requests.increment(1);
        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();
        self.metrics.request_duration.record(elapsed.as_secs_f64());
        record_latency(method, elapsed);

        result.map_err(|err| {
            if err.is_client_error() {
                self.metrics.client_errors.increment(1);
            } else {
                self.metrics.server_errors.increment(1);
                warn!(message = "RPC call failed", method = method, error = %err);
            }
            into_rpc_error(err)
        })
    }

    fn resolve_creator(&self, job_creator: Option<String>) -> WhisperResult<Address> {
        match job_creator.filter(|creator| !creator.trim().is_empty()) {
            Some(creator) => creator
                .trim()
                .parse()
                .map_err(|_| WhisperError::validation("jobCreator must be a valid address")),
            None => self
                .default_job_creator
                .ok_or_else(|| WhisperError::validation("jobCreator is required")),
        }
    }

    async fn trigger(&self, job_creator: Option<String>) -> WhisperResult<TriggeredTransfer> {
        let creator = self.resolve_creator(job_creator)?;
        let orchestrator = self
            .orchestrator
            .as_ref()
            .ok_or_else(|| WhisperError::configuration("Missing RPC or private key"))?;
        let tx_hash = orchestrator.trigger_transfer(creator).await?;
        info!(message = "Transfer triggered", job_creator = %creator, tx_hash = %tx_hash);
        Ok(TriggeredTransfer {
            status: "submitted".to_string(),
            job_creator: creator,
            tx_hash,
        })
    }

    async fn failures(&self, limit: Option<usize>) -> WhisperResult<Vec<SettlementFailure>> {
        let limit = limit.unwrap_or(DEFAULT_FAILURE_LIMIT).min(MAX_FAILURE_LIMIT);
        self.failures
            .recent_failures(limit)
            .await
            .map_err(WhisperError::ledger)
    }
}

#[async_trait]
impl WhisperPayApiServer for WhisperPayService {
    async fn deploy_rollup(&self, wallet: String) -> RpcResult<DeploymentReceipt> {
        self.observe("deployRollup", self.deployments.deploy_for_user(&wallet))
            .await
    }

    async fn deployment_status(&self, wallet: String) -> RpcResult<DeploymentStatus> {
        self.observe("deploymentStatus", self.deployments.status(&wallet))
            .await
    }

    async fn queue_payment(
        &self,
        wallet: String,
        items: Vec<PaymentItem>,
    ) -> RpcResult<QueuedPayment> {
        self.observe(
            "queuePayment",
            self.deployments.queue_payment(&wallet, items),
        )
        .await
    }

    async fn bridge_to_rollup(&self, request: BridgeRequest) -> RpcResult<BridgeReceipt> {
        self.observe("bridgeToRollup", self.bridge.bridge(request)).await
    }

    async fn trigger_transfer(&self, job_creator: Option<String>) -> RpcResult<TriggeredTransfer> {
        self.observe("triggerTransfer", self.trigger(job_creator))
            .await
    }

    async fn settlement_failures(&self, limit: Option<usize>) -> RpcResult<Vec<SettlementFailure>> {
        self.observe("settlementFailures", self.failures(limit)).await
    }
}

/// Caller mistakes become invalid-params errors; everything else is a server error carrying the
/// short message.
pub fn into_rpc_error(err: WhisperError) -> ErrorObjectOwned {
    let code = if err.is_client_error() {
        INVALID_PARAMS_CODE
    } else {
        CALL_EXECUTION_FAILED_CODE
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use whisperpay_core::test_utils::MockChainClient;
    use whisperpay_core::{ChainClient, FailureStage, SupportedChains};
    use whisperpay_datastore::InMemoryLedger;
    use whisperpay_provisioning::{AesGcmSealer, MockRollupProvisioner};
    use whisperpay_settlement::InMemoryCorrelationQueue;

    const WALLET: &str = "0x2bEb0e1fD3430E8655624A7FCB4E8820397551f8";
    const DEALER: Address = Address::repeat_byte(0xde);

    fn service(ledger: Arc<InMemoryLedger>, mock: Option<MockChainClient>) -> WhisperPayService {
        let client = mock.map(|mock| Arc::new(mock) as Arc<dyn ChainClient>);
        let orchestrator = client.clone().map(|client| {
            Arc::new(SettlementOrchestrator::new(
                client,
                ledger.clone(),
                Arc::new(InMemoryCorrelationQueue::default()),
                DEALER,
            ))
        });
        WhisperPayService::new(
            DeploymentService::new(
                ledger.clone(),
                Some(Arc::new(MockRollupProvisioner)),
                Arc::new(AesGcmSealer),
            ),
            BridgeService::new(ledger.clone(), client, SupportedChains::default()),
            orchestrator,
            ledger,
            Some(address!("0x1111111111111111111111111111111111111111")),
        )
    }

    #[tokio::test]
    async fn methods_are_served_under_the_namespace() {
        let ledger = Arc::new(InMemoryLedger::new());
        let module = service(ledger, None).into_rpc();

        let receipt: DeploymentReceipt = module
            .call("whisperpay_deployRollup", [WALLET])
            .await
            .unwrap();
        let status: DeploymentStatus = module
            .call("whisperpay_deploymentStatus", [WALLET])
            .await
            .unwrap();
        assert!(status.rollup_exists);
        assert_eq!(status.chain_id, Some(receipt.chain_id));
    }

    #[tokio::test]
    async fn validation_errors_are_invalid_params() {
        let service = service(Arc::new(InMemoryLedger::new()), None);

        let err = service.deploy_rollup("not-an-address".into()).await.unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS_CODE);

        let err = service
            .queue_payment(WALLET.into(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS_CODE);
        assert_eq!(err.message(), "items are required");
    }

    #[tokio::test]
    async fn system_errors_are_server_errors() {
        let service = service(Arc::new(InMemoryLedger::new()), None);

        let err = service
            .trigger_transfer(Some(WALLET.into()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), CALL_EXECUTION_FAILED_CODE);
        assert!(err.message().contains("Missing RPC or private key"));
    }

    #[tokio::test]
    async fn trigger_transfer_falls_back_to_default_creator() {
        let mock = MockChainClient::new();
        let service = service(Arc::new(InMemoryLedger::new()), Some(mock.clone()));

        let triggered = service.trigger_transfer(None).await.unwrap();
        assert_eq!(triggered.status, "submitted");
        assert_eq!(
            triggered.job_creator,
            address!("0x1111111111111111111111111111111111111111")
        );

        let explicit = service.trigger_transfer(Some(WALLET.into())).await.unwrap();
        assert_eq!(explicit.job_creator, WALLET.parse::<Address>().unwrap());

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|tx| tx.to == Some(DEALER.into())));

        let err = service
            .trigger_transfer(Some("0x123".into()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS_CODE);
        assert_eq!(err.message(), "jobCreator must be a valid address");
    }

    #[tokio::test]
    async fn settlement_failures_are_listed_newest_first() {
        let ledger = Arc::new(InMemoryLedger::new());
        for stage in [FailureStage::RouterTransfer, FailureStage::PostOpsUpdate] {
            ledger
                .record_failure(SettlementFailure::new(None, stage, "reverted"))
                .await
                .unwrap();
        }
        let service = service(ledger, None);

        let failures = service.settlement_failures(None).await.unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].stage, FailureStage::PostOpsUpdate);
        assert_eq!(service.settlement_failures(Some(1)).await.unwrap().len(), 1);
    }
}
