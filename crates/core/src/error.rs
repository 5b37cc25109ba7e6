use thiserror::Error;

pub type WhisperResult<T> = Result<T, WhisperError>;

/// Failures surfaced by the synchronous service operations.
///
/// Background settlement handlers never return these to a caller; they log them and emit a
/// [`crate::SettlementFailure`] instead.
#[derive(Debug, Error)]
pub enum WhisperError {
    /// Bad address, amount or missing field. Raised before any network call.
    #[error("{0}")]
    Validation(String),

    /// Missing RPC URL, operator key or a required contract address.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Parent chain not supported: {0}")]
    UnsupportedChain(u64),

    #[error("fee quote unavailable: neither base fee nor gas price could be read")]
    FeeQuoteUnavailable,

    /// A network or contract call failed. The message is the underlying error, verbatim.
    #[error("{0}")]
    Submission(String),

    #[error("{0}")]
    Provisioning(String),

    #[error("{0}")]
    NotFound(String),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl WhisperError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn submission(err: anyhow::Error) -> Self {
        Self::Submission(format!("{err:#}"))
    }

    pub fn ledger(err: anyhow::Error) -> Self {
        Self::Ledger(format!("{err:#}"))
    }

    /// True for errors caused by the caller's input rather than by the system.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}
