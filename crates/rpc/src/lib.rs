//! Configuration and the `whisperpay_*` JSON-RPC namespace served by the node.
pub mod config;
pub mod metrics;
pub mod service;

pub use config::{Config, CorrelationBackend, CorrelationOrder, LogFormat};
pub use metrics::init_prometheus_exporter;
pub use service::{TriggeredTransfer, WhisperPayApiServer, WhisperPayService, into_rpc_error};
