use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use jsonrpsee::server::Server;
use tracing::{error, info, warn};
use whisperpay_bridge::BridgeService;
use whisperpay_core::logger::init_logger;
use whisperpay_core::{ChainClient, ParentChainClient};
use whisperpay_datastore::{CorrelationStore, FailureLog, InMemoryLedger, Ledger, PostgresLedger};
use whisperpay_provisioning::{
    AesGcmSealer, DeploymentService, MockRollupProvisioner, RollupProvisioner,
};
use whisperpay_rpc_lib::{
    Config, CorrelationBackend, LogFormat, WhisperPayApiServer, WhisperPayService,
    init_prometheus_exporter,
};
use whisperpay_settlement::{
    CorrelationQueue, FailureRecorder, InMemoryCorrelationQueue, LedgerCorrelationQueue,
    PollingLogSource, SettlementOrchestrator, SubscriptionSet,
};

const RECORDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One storage backend seen through each of the ledger traits.
struct Storage {
    ledger: Arc<dyn Ledger>,
    correlation: Arc<dyn CorrelationStore>,
    failures: Arc<dyn FailureLog>,
}

async fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    match &config.database_url {
        Some(url) => {
            let postgres = Arc::new(PostgresLedger::connect(url).await?);
            postgres.run_migrations().await?;
            info!(message = "Using postgres ledger");
            Ok(Storage {
                ledger: postgres.clone(),
                correlation: postgres.clone(),
                failures: postgres,
            })
        }
        None => {
            warn!(message = "No database configured, ledger is in-memory and lost on restart");
            let memory = Arc::new(InMemoryLedger::new());
            Ok(Storage {
                ledger: memory.clone(),
                correlation: memory.clone(),
                failures: memory,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::parse();
    init_logger(&config.log_level, config.log_format == LogFormat::Json);

    init_prometheus_exporter(config.metrics_addr)?;

    info!(
        message = "Starting WhisperPay node",
        address = %config.address,
        port = config.port,
        dealer = %config.dealer_contract_address,
        correlation_order = ?config.correlation_order,
        correlation_store = ?config.correlation_store,
    );

    let storage = open_storage(&config).await?;
    let chains = config.supported_chains();

    let parent = match config.parent_chain() {
        Some((url, key)) => Some(Arc::new(ParentChainClient::new(url, key)?)),
        None => {
            warn!(message = "Parent chain RPC or operator key missing, settlement disabled");
            None
        }
    };
    let client = parent.clone().map(|p| p as Arc<dyn ChainClient>);

    let (recorder, failure_sender) = FailureRecorder::new(storage.failures.clone());
    let recorder = recorder.spawn();

    let mut subscriptions = None;
    let orchestrator = match (&parent, &client) {
        (Some(parent), Some(client)) => {
            let queue: Arc<dyn CorrelationQueue> = match config.correlation_store {
                CorrelationBackend::Ledger => Arc::new(LedgerCorrelationQueue::new(
                    storage.correlation.clone(),
                    config.dequeue_order(),
                )),
                CorrelationBackend::Memory => {
                    Arc::new(InMemoryCorrelationQueue::new(config.dequeue_order()))
                }
            };
            let orchestrator = Arc::new(
                SettlementOrchestrator::new(
                    client.clone(),
                    storage.ledger.clone(),
                    queue,
                    config.dealer_contract_address,
                )
                .with_failure_sender(failure_sender),
            );

            let source = Arc::new(PollingLogSource::new(
                parent.provider().clone(),
                config.poll_interval(),
            ));
            match SubscriptionSet::start(orchestrator.clone(), source, &chains).await {
                Ok(set) => subscriptions = Some(set),
                Err(e) => error!(message = "Settlement listener not started", error = %e),
            }
            Some(orchestrator)
        }
        _ => {
            drop(failure_sender);
            None
        }
    };

    let provisioner = config
        .use_mock_provisioner
        .then(|| Arc::new(MockRollupProvisioner) as Arc<dyn RollupProvisioner>);
    if provisioner.is_none() {
        warn!(message = "No rollup provisioner configured, deployRollup is disabled");
    }

    let service = WhisperPayService::new(
        DeploymentService::new(storage.ledger.clone(), provisioner, Arc::new(AesGcmSealer)),
        BridgeService::new(storage.ledger.clone(), client, chains),
        orchestrator,
        storage.failures.clone(),
        config.default_job_creator,
    );

    let server = Server::builder().build(config.bind_addr()).await?;
    let addr = server.local_addr()?;
    let handle = server.start(service.into_rpc());

    info!(
        message = "WhisperPay RPC server started",
        address = %addr
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!(message = "Shutdown signal received"),
        _ = handle.clone().stopped() => warn!(message = "RPC server stopped unexpectedly"),
    }

    if let Some(subscriptions) = subscriptions {
        subscriptions.shutdown().await;
    }
    let _ = handle.stop();
    handle.stopped().await;

    // The recorder ends once the last orchestrator handle, and with it the sender, is dropped.
    if tokio::time::timeout(RECORDER_DRAIN_TIMEOUT, recorder).await.is_err() {
        warn!(message = "Failure recorder did not drain before shutdown");
    }

    info!(message = "WhisperPay node stopped");
    Ok(())
}
