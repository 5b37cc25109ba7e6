use metrics::{Counter, Histogram};
use metrics_derive::Metrics;

/// Metrics for the `whisperpay_bridge` component.
/// Conventions:
/// - Durations are recorded in seconds (histograms).
/// - Counters are monotonic event counts.
#[derive(Metrics, Clone)]
#[metrics(scope = "whisperpay_bridge")]
pub struct BridgeMetrics {
    #[metric(describe = "Bridge requests received")]
    pub requests: Counter,

    #[metric(describe = "Bridge requests rejected before submission")]
    pub rejected: Counter,

    #[metric(describe = "Retryable tickets broadcast")]
    pub tickets_submitted: Counter,

    #[metric(describe = "Retryable ticket submissions that failed")]
    pub ticket_failures: Counter,

    #[metric(describe = "Duration of fee quoting against the parent chain")]
    pub quote_duration: Histogram,

    #[metric(describe = "Duration of ticket submission")]
    pub submit_duration: Histogram,
}
