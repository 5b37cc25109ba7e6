use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::Arc;

use alloy_primitives::{Address, TxHash};
use alloy_rpc_types::{Log, TransactionRequest};
use alloy_sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use whisperpay_core::{
    ChainClient, FailureStage, SettlementFailure, TransferItem, WalletAddress, WhisperError,
    WhisperResult, parse_eth_amount,
};
use whisperpay_datastore::Ledger;

use crate::dealer::{IDealer, post_ops_tx, route_funds_tx};
use crate::failures::FailureSender;
use crate::metrics::SettlementMetrics;
use crate::queue::CorrelationQueue;

/// Completed creators remembered for [`SettlementOrchestrator::stage`] before the oldest is
/// forgotten.
const DEFAULT_COMPLETED_RETENTION: usize = 1024;

/// Where a job creator is in the settlement flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettlementStage {
    /// Not tracked. Also the state a creator returns to when its flow is dropped.
    #[default]
    Idle,
    AwaitingRouterTransfer,
    RouterTransferSubmitted,
    /// Queued for the next funds-arrived event.
    AwaitingSettlement,
    SettlementInProgress,
    Completed,
}

#[derive(Debug, Default)]
struct StageTable {
    stages: HashMap<Address, SettlementStage>,
    /// Creators currently in [`SettlementStage::Completed`], oldest first.
    completed: VecDeque<Address>,
}

/// Outcome of settling one creator after its funds arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub creator: Address,
    pub transfers_sent: usize,
    pub transfers_failed: usize,
    pub post_ops_sent: bool,
    pub marked_completed: bool,
}

/// Drives the two-phase settlement of dealer jobs.
///
/// Phase one routes a creator's funds and queues the creator. Phase two runs when funds arrive:
/// it claims one queued creator, pays out its pending items, posts the ops update and completes
/// the creator's ledger entries. Every step after the claim is best-effort.
pub struct SettlementOrchestrator {
    client: Arc<dyn ChainClient>,
    ledger: Arc<dyn Ledger>,
    queue: Arc<dyn CorrelationQueue>,
    dealer: Address,
    stages: RwLock<StageTable>,
    completed_retention: usize,
    failures: Option<FailureSender>,
    metrics: SettlementMetrics,
}

impl std::fmt::Debug for SettlementOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementOrchestrator")
            .field("dealer", &self.dealer)
            .field("order", &self.queue.order())
            .finish_non_exhaustive()
    }
}

impl SettlementOrchestrator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        ledger: Arc<dyn Ledger>,
        queue: Arc<dyn CorrelationQueue>,
        dealer: Address,
    ) -> Self {
        Self {
            client,
            ledger,
            queue,
            dealer,
            stages: RwLock::new(StageTable::default()),
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            failures: None,
            metrics: SettlementMetrics::default(),
        }
    }

    /// Emits a [`SettlementFailure`] on `sender` for every swallowed error.
    pub fn with_failure_sender(mut self, sender: FailureSender) -> Self {
        self.failures = Some(sender);
        self
    }

    /// Caps how many completed creators keep reporting [`SettlementStage::Completed`].
    pub fn with_completed_retention(mut self, retention: usize) -> Self {
        self.completed_retention = retention;
        self
    }

    pub const fn dealer(&self) -> Address {
        self.dealer
    }

    pub fn client(&self) -> &dyn ChainClient {
        self.client.as_ref()
    }

    pub async fn stage(&self, creator: Address) -> SettlementStage {
        self.stages
            .read()
            .await
            .stages
            .get(&creator)
            .copied()
            .unwrap_or_default()
    }

    async fn set_stage(&self, creator: Address, stage: SettlementStage) {
        let mut table = self.stages.write().await;
        let table = &mut *table;
        table.completed.retain(|completed| *completed != creator);
        match stage {
            SettlementStage::Idle => {
                table.stages.remove(&creator);
            }
            SettlementStage::Completed => {
                table.stages.insert(creator, stage);
                table.completed.push_back(creator);
                while table.completed.len() > self.completed_retention {
                    if let Some(oldest) = table.completed.pop_front() {
                        table.stages.remove(&oldest);
                    }
                }
            }
            _ => {
                table.stages.insert(creator, stage);
            }
        }
    }

    async fn refresh_awaiting(&self) {
        if let Ok(depth) = self.queue.depth().await {
            self.metrics.awaiting_creators.set(depth as f64);
        }
    }

    fn fail(&self, creator: Option<Address>, stage: FailureStage, err: impl Display) {
        let error = err.to_string();
        warn!(
            message = "Settlement step failed",
            stage = stage.as_str(),
            creator = ?creator,
            error = %error
        );
        self.metrics.failures.increment(1);
        if let Some(sender) = &self.failures
            && let Err(e) = sender.send(SettlementFailure::new(creator, stage, error))
        {
            warn!(error = %e, "Failed to send settlement failure");
        }
    }

    /// Handles one batch of job-created logs, strictly in delivery order.
    pub async fn handle_job_created_logs(&self, logs: Vec<Log>) {
        for log in logs {
            match IDealer::L3Interaction::decode_log(&log.inner) {
                Ok(event) => self.handle_job_created(event.data._jobCreator).await,
                Err(e) => warn!(
                    message = "Skipping undecodable job-created log",
                    tx_hash = ?log.transaction_hash,
                    error = %e
                ),
            }
        }
    }

    /// Handles one batch of funds-arrived logs. Each log claims at most one creator.
    pub async fn handle_funds_arrived_logs(&self, logs: Vec<Log>) {
        for log in logs {
            match IDealer::FundsTransferredToMediator::decode_log(&log.inner) {
                Ok(event) => {
                    debug!(message = "Funds arrived", amount = %event.data._amount);
                    self.handle_funds_arrived().await;
                }
                Err(e) => warn!(
                    message = "Skipping undecodable funds-arrived log",
                    tx_hash = ?log.transaction_hash,
                    error = %e
                ),
            }
        }
    }

    /// Routes the funds of `creator` and queues it for settlement. Failures drop the creator.
    pub async fn handle_job_created(&self, creator: Address) {
        self.metrics.jobs_created.increment(1);
        info!(message = "Job created", creator = %creator);
        self.set_stage(creator, SettlementStage::AwaitingRouterTransfer)
            .await;

        let route = route_funds_tx(self.dealer, self.client.sender(), creator);
        let tx_hash = match self.submit(route).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                self.fail(Some(creator), FailureStage::RouterTransfer, format!("{e:#}"));
                self.set_stage(creator, SettlementStage::Idle).await;
                return;
            }
        };
        self.metrics.router_transfers.increment(1);
        self.set_stage(creator, SettlementStage::RouterTransferSubmitted)
            .await;
        info!(message = "Router transfer submitted", creator = %creator, tx_hash = %tx_hash);

        if let Err(e) = self.queue.enqueue(creator).await {
            self.fail(Some(creator), FailureStage::CreatorEnqueue, format!("{e:#}"));
            self.set_stage(creator, SettlementStage::Idle).await;
            return;
        }
        self.refresh_awaiting().await;
        self.set_stage(creator, SettlementStage::AwaitingSettlement)
            .await;
    }

    /// Settles the next awaiting creator. Returns `None` when nothing was awaiting.
    pub async fn handle_funds_arrived(&self) -> Option<SettlementReport> {
        self.metrics.funds_arrived.increment(1);

        let creator = match self.queue.dequeue().await {
            Ok(Some(creator)) => creator,
            Ok(None) => {
                self.metrics.unmatched_funds.increment(1);
                self.fail(
                    None,
                    FailureStage::UnmatchedFunds,
                    "funds arrived with no creator awaiting settlement",
                );
                return None;
            }
            Err(e) => {
                self.fail(None, FailureStage::UnmatchedFunds, format!("dequeue failed: {e:#}"));
                return None;
            }
        };
        self.refresh_awaiting().await;
        self.set_stage(creator, SettlementStage::SettlementInProgress)
            .await;

        let report = self.settle(creator).await;
        let stage = if report.marked_completed {
            SettlementStage::Completed
        } else {
            SettlementStage::Idle
        };
        self.set_stage(creator, stage).await;

        info!(
            message = "Settlement finished",
            creator = %creator,
            transfers_sent = report.transfers_sent,
            transfers_failed = report.transfers_failed,
            post_ops_sent = report.post_ops_sent,
            completed = report.marked_completed
        );
        Some(report)
    }

    async fn settle(&self, creator: Address) -> SettlementReport {
        let mut report = SettlementReport {
            creator,
            ..Default::default()
        };
        let wallet = WalletAddress::from(creator);

        let pending = self.ledger.pending_transfers_for_creator(&wallet).await;
        let (settlement_ids, items) = match pending {
            Ok(Some(pending)) => (pending.settlement_ids, pending.items),
            Ok(None) => Default::default(),
            Err(e) => {
                // Completing without knowing what was owed could mark unpaid items as paid.
                self.fail(Some(creator), FailureStage::PendingLookup, format!("{e:#}"));
                return report;
            }
        };

        for item in &items {
            match self.transfer(item).await {
                Ok(tx_hash) => {
                    report.transfers_sent += 1;
                    self.metrics.item_transfers.increment(1);
                    debug!(
                        message = "Item transfer submitted",
                        creator = %creator,
                        recipient = %item.recipient,
                        tx_hash = %tx_hash
                    );
                }
                Err(e) => {
                    report.transfers_failed += 1;
                    self.fail(
                        Some(creator),
                        FailureStage::ItemTransfer,
                        format!("transfer of {} to {}: {e}", item.amount, item.recipient),
                    );
                }
            }
        }

        match self.submit(post_ops_tx(self.dealer, self.client.sender(), creator)).await {
            Ok(_) => report.post_ops_sent = true,
            Err(e) => self.fail(Some(creator), FailureStage::PostOpsUpdate, format!("{e:#}")),
        }

        match self.ledger.find_user(&wallet).await {
            Ok(Some(user)) => match self.ledger.mark_completed(user.id, &settlement_ids).await {
                Ok(()) => {
                    report.marked_completed = true;
                    self.metrics.settlements_completed.increment(1);
                }
                Err(e) => self.fail(Some(creator), FailureStage::MarkCompleted, format!("{e:#}")),
            },
            Ok(None) => debug!(message = "Creator has no user record", creator = %creator),
            Err(e) => self.fail(Some(creator), FailureStage::MarkCompleted, format!("{e:#}")),
        }

        report
    }

    async fn transfer(&self, item: &TransferItem) -> WhisperResult<TxHash> {
        let value = parse_eth_amount(&item.amount)?;
        let tx = TransactionRequest::default()
            .from(self.client.sender())
            .to(item.recipient)
            .value(value);
        self.client
            .send_transaction(tx)
            .await
            .map_err(WhisperError::submission)
    }

    async fn submit(&self, tx: TransactionRequest) -> anyhow::Result<TxHash> {
        self.client.send_transaction(tx).await
    }

    /// Submits the route-funds call for `creator` on demand, surfacing any error.
    ///
    /// This does not queue the creator.
    pub async fn trigger_transfer(&self, creator: Address) -> WhisperResult<TxHash> {
        let tx_hash = self
            .submit(route_funds_tx(self.dealer, self.client.sender(), creator))
            .await
            .map_err(|e| {
                error!(message = "Manual router transfer failed", creator = %creator, error = %e);
                WhisperError::submission(e)
            })?;
        self.metrics.router_transfers.increment(1);
        info!(message = "Manual router transfer submitted", creator = %creator, tx_hash = %tx_hash);
        Ok(tx_hash)
    }
}
