use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use alloy_primitives::{Address, address};
use clap::{Parser, ValueEnum};
use url::Url;
use whisperpay_core::SupportedChains;
use whisperpay_datastore::DequeueOrder;

/// Dealer contract on Arbitrum Sepolia.
pub const DEFAULT_DEALER: Address = address!("0x59C899f52F2c40cBE5090bbc9A4f830B64a20Fc4");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CorrelationOrder {
    #[default]
    Fifo,
    Lifo,
}

impl From<CorrelationOrder> for DequeueOrder {
    fn from(order: CorrelationOrder) -> Self {
        match order {
            CorrelationOrder::Fifo => Self::Fifo,
            CorrelationOrder::Lifo => Self::Lifo,
        }
    }
}

/// Where job creators wait between "job created" and "funds arrived".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CorrelationBackend {
    /// The ledger's awaiting-funds table. Survives restarts.
    #[default]
    Ledger,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind the RPC server to
    #[arg(long, env = "WHISPERPAY_ADDRESS", default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Port to bind the RPC server to
    #[arg(long, env = "WHISPERPAY_PORT", default_value = "3000")]
    pub port: u16,

    /// Parent chain JSON-RPC endpoint. Bridging and settlement are disabled without it.
    #[arg(long, env = "WHISPERPAY_PARENT_CHAIN_RPC")]
    pub parent_chain_rpc: Option<Url>,

    /// Operator key that signs every parent chain transaction, with or without `0x`
    #[arg(long, env = "WHISPERPAY_DEPLOYER_PRIVATE_KEY", hide_env_values = true)]
    pub deployer_private_key: Option<String>,

    #[arg(
        long,
        env = "WHISPERPAY_DEALER_CONTRACT_ADDRESS",
        default_value_t = DEFAULT_DEALER
    )]
    pub dealer_contract_address: Address,

    /// Postgres connection string. An in-memory ledger is used when unset.
    #[arg(long, env = "WHISPERPAY_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Parent chain ids this node may talk to
    #[arg(
        long,
        env = "WHISPERPAY_SUPPORTED_PARENT_CHAINS",
        value_delimiter = ',',
        default_value = "1,11155111,42161,421614"
    )]
    pub supported_parent_chains: Vec<u64>,

    #[arg(
        long,
        env = "WHISPERPAY_CORRELATION_ORDER",
        value_enum,
        default_value_t = CorrelationOrder::Fifo
    )]
    pub correlation_order: CorrelationOrder,

    #[arg(
        long,
        env = "WHISPERPAY_CORRELATION_STORE",
        value_enum,
        default_value_t = CorrelationBackend::Ledger
    )]
    pub correlation_store: CorrelationBackend,

    /// Interval between `eth_getFilterChanges` polls
    #[arg(long, env = "WHISPERPAY_LOG_POLL_INTERVAL_MS", default_value = "4000")]
    pub log_poll_interval_ms: u64,

    /// Deploy rollups with the deterministic mock provisioner
    #[arg(long, env = "WHISPERPAY_USE_MOCK_PROVISIONER", default_value = "false")]
    pub use_mock_provisioner: bool,

    /// Creator used by `whisperpay_triggerTransfer` when the caller names none
    #[arg(long, env = "WHISPERPAY_DEFAULT_JOB_CREATOR")]
    pub default_job_creator: Option<Address>,

    #[arg(long, env = "WHISPERPAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(
        long,
        env = "WHISPERPAY_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    /// Address the Prometheus exporter listens on
    #[arg(long, env = "WHISPERPAY_METRICS_ADDR", default_value = "0.0.0.0:9000")]
    pub metrics_addr: SocketAddr,
}

impl Config {
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }

    pub fn supported_chains(&self) -> SupportedChains {
        SupportedChains::from_ids(self.supported_parent_chains.iter().copied())
    }

    pub fn dequeue_order(&self) -> DequeueOrder {
        self.correlation_order.into()
    }

    /// RPC endpoint and operator key, when both are configured.
    pub fn parent_chain(&self) -> Option<(Url, &str)> {
        match (&self.parent_chain_rpc, self.deployer_private_key.as_deref()) {
            (Some(url), Some(key)) if !key.trim().is_empty() => Some((url.clone(), key)),
            _ => None,
        }
    }
}
