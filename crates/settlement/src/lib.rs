//! Settlement of dealer jobs: route funds when a job is created, pay out the creator's queued
//! transfers when the funds arrive.
pub mod dealer;
pub mod failures;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod subscription;

pub use dealer::IDealer;
pub use failures::{FailureRecorder, FailureSender};
pub use orchestrator::{SettlementOrchestrator, SettlementReport, SettlementStage};
pub use queue::{CorrelationQueue, InMemoryCorrelationQueue, LedgerCorrelationQueue};
pub use subscription::{
    LogSource, LogStream, LogWatch, PollingLogSource, SubscriptionSet, resubscribe_backoff,
};
pub use whisperpay_datastore::DequeueOrder;
