use alloy_primitives::U256;
use alloy_primitives::utils::parse_ether;

use crate::error::WhisperError;

/// Parses a decimal ETH amount such as `"0.001"` into wei.
///
/// Negative, empty and over-precise (more than 18 decimals) inputs are rejected.
pub fn parse_eth_amount(amount: &str) -> Result<U256, WhisperError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(WhisperError::validation("amount is required"));
    }
    if amount.starts_with('-') || amount.starts_with('+') {
        return Err(WhisperError::validation(format!("invalid amount: {amount}")));
    }
    parse_ether(amount)
        .map_err(|e| WhisperError::validation(format!("invalid amount {amount}: {e}")))
}
