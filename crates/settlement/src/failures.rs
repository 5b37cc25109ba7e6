use std::sync::Arc;

use anyhow::Result;
use backon::{ExponentialBuilder, Retryable};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};
use whisperpay_core::SettlementFailure;
use whisperpay_datastore::FailureLog;

use crate::metrics::SettlementMetrics;

pub type FailureSender = mpsc::UnboundedSender<SettlementFailure>;

/// Persists the failures emitted by the settlement handlers.
///
/// Runs until every [`FailureSender`] is dropped.
pub struct FailureRecorder {
    log: Arc<dyn FailureLog>,
    receiver: mpsc::UnboundedReceiver<SettlementFailure>,
    retry: ExponentialBuilder,
    metrics: SettlementMetrics,
}

impl std::fmt::Debug for FailureRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureRecorder").finish_non_exhaustive()
    }
}

impl FailureRecorder {
    pub fn new(log: Arc<dyn FailureLog>) -> (Self, FailureSender) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let recorder = Self {
            log,
            receiver,
            retry: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(3),
            metrics: SettlementMetrics::default(),
        };
        (recorder, sender)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Some(failure) = self.receiver.recv().await {
            if let Err(e) = self.persist(&failure).await {
                self.metrics.failures_dropped.increment(1);
                error!(
                    message = "Failed to persist settlement failure",
                    stage = failure.stage.as_str(),
                    creator = ?failure.creator,
                    error = %e
                );
            }
        }
        info!(message = "Settlement failure recorder stopped");
    }

    async fn persist(&self, failure: &SettlementFailure) -> Result<()> {
        let record = || async { self.log.record_failure(failure.clone()).await };

        record
            .retry(self.retry)
            .notify(|err: &anyhow::Error, dur: Duration| {
                info!("Retrying failure record {:?} after {:?}", err, dur);
            })
            .await
    }
}
