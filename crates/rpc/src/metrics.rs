use std::net::SocketAddr;

use metrics::{Counter, Histogram};
use metrics_derive::Metrics;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Duration;

/// Records the latency of one RPC method, labelled with its name.
pub fn record_latency(method: &'static str, latency: Duration) {
    metrics::histogram!("whisperpay_rpc_method_latency", "method" => method)
        .record(latency.as_secs_f64());
}

/// Metrics for the `whisperpay_rpc` component.
#[derive(Metrics, Clone)]
#[metrics(scope = "whisperpay_rpc")]
pub struct RpcMetrics {
    #[metric(describe = "Number of RPC requests received")]
    pub requests: Counter,

    #[metric(describe = "Number of requests rejected for invalid input")]
    pub client_errors: Counter,

    #[metric(describe = "Number of requests that failed inside the node")]
    pub server_errors: Counter,

    #[metric(describe = "Duration of RPC requests")]
    pub request_duration: Histogram,
}

/// Installs the global recorder and serves `/metrics` on `addr`.
pub fn init_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {e}"))
}
