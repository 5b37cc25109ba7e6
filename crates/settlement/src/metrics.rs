use metrics::{Counter, Gauge};
use metrics_derive::Metrics;

/// Metrics for the `whisperpay_settlement` component.
#[derive(Metrics, Clone)]
#[metrics(scope = "whisperpay_settlement")]
pub struct SettlementMetrics {
    #[metric(describe = "Job-created events handled")]
    pub jobs_created: Counter,

    #[metric(describe = "Route-funds calls submitted")]
    pub router_transfers: Counter,

    #[metric(describe = "Funds-arrived events handled")]
    pub funds_arrived: Counter,

    #[metric(describe = "Funds-arrived events with no awaiting creator")]
    pub unmatched_funds: Counter,

    #[metric(describe = "Item transfers submitted")]
    pub item_transfers: Counter,

    #[metric(describe = "Creators whose settlement was marked completed")]
    pub settlements_completed: Counter,

    #[metric(describe = "Background failures emitted")]
    pub failures: Counter,

    #[metric(describe = "Failures that could not be persisted")]
    pub failures_dropped: Counter,

    #[metric(describe = "Creators currently awaiting funds")]
    pub awaiting_creators: Gauge,
}
