//! Fee computation for retryable tickets.
//!
//! The quote is derived from a single `base` price: the latest block's base fee when the parent
//! chain exposes one, otherwise the legacy gas price.
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::warn;
use whisperpay_core::{ChainClient, WhisperError};

/// Gas limit attached to every ticket, sized with headroom for the rollup-side execution.
pub const TICKET_GAS_LIMIT: u64 = 1_500_000;

/// Lower bound of the priority fee (0.01 gwei).
pub const MIN_PRIORITY_FEE: u128 = 10_000_000;

/// Extra bytes charged on top of the call data when sizing the submission cost.
pub const SUBMISSION_BYTES_BUFFER: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    pub l2_call_value: U256,
    pub max_submission_cost: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    /// Value attached to the parent-chain transaction.
    pub total_value: U256,
}

/// Computes the fees for delivering `amount` with `calldata_len` bytes of call data.
///
/// `base_fee` is preferred; `gas_price` is the fallback for chains without a base fee. Fails with
/// [`WhisperError::FeeQuoteUnavailable`] when both are missing.
pub fn quote(
    amount: U256,
    calldata_len: usize,
    base_fee: Option<u128>,
    gas_price: Option<u128>,
) -> Result<FeeQuote, WhisperError> {
    let base = base_fee
        .or(gas_price)
        .ok_or(WhisperError::FeeQuoteUnavailable)?;

    let priority = (base / 10).max(MIN_PRIORITY_FEE);
    let max_fee_per_gas = base.saturating_mul(2).saturating_add(priority);

    let billed_bytes =
        U256::from(calldata_len as u64).saturating_add(U256::from(SUBMISSION_BYTES_BUFFER));
    let max_submission_cost = U256::from(base.max(1)).saturating_mul(billed_bytes);

    let gas_cost = U256::from(TICKET_GAS_LIMIT).saturating_mul(U256::from(max_fee_per_gas));
    let total_value = amount
        .saturating_add(max_submission_cost)
        .saturating_add(gas_cost);

    Ok(FeeQuote {
        l2_call_value: amount,
        max_submission_cost,
        gas_limit: TICKET_GAS_LIMIT,
        max_fee_per_gas,
        max_priority_fee_per_gas: priority,
        total_value,
    })
}

/// Reads the current fee inputs from `client` and quotes against them.
///
/// The gas price is only queried when the latest block carries no base fee. Read errors count as
/// the value being unavailable.
pub async fn quote_live(
    client: &dyn ChainClient,
    amount: U256,
    calldata_len: usize,
) -> Result<FeeQuote, WhisperError> {
    let base_fee = match client.base_fee().await {
        Ok(base_fee) => base_fee,
        Err(e) => {
            warn!(message = "Failed to read latest base fee", error = %e);
            None
        }
    };

    let gas_price = if base_fee.is_none() {
        match client.gas_price().await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(message = "Failed to read gas price", error = %e);
                None
            }
        }
    } else {
        None
    };

    quote(amount, calldata_len, base_fee, gas_price)
}
