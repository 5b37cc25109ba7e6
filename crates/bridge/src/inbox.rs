use std::sync::Arc;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{SolCall, sol};
use tracing::info;
use whisperpay_core::ChainClient;

use crate::fees::FeeQuote;

sol! {
    interface IInbox {
        function createRetryableTicket(
            address to,
            uint256 l2CallValue,
            uint256 maxSubmissionCost,
            address excessFeeRefundAddress,
            address callValueRefundAddress,
            uint256 gasLimit,
            uint256 maxFeePerGas,
            bytes data
        ) external payable returns (uint256);
    }
}

/// Builds the parent-chain transaction that opens a retryable ticket towards `recipient`.
///
/// Both refund addresses are `sender`. The ticket carries no call data.
pub fn build_ticket(
    inbox: Address,
    recipient: Address,
    quote: &FeeQuote,
    sender: Address,
) -> TransactionRequest {
    let call = IInbox::createRetryableTicketCall {
        to: recipient,
        l2CallValue: quote.l2_call_value,
        maxSubmissionCost: quote.max_submission_cost,
        excessFeeRefundAddress: sender,
        callValueRefundAddress: sender,
        gasLimit: U256::from(quote.gas_limit),
        maxFeePerGas: U256::from(quote.max_fee_per_gas),
        data: Bytes::new(),
    };

    TransactionRequest::default()
        .from(sender)
        .to(inbox)
        .value(quote.total_value)
        .input(call.abi_encode().into())
        .gas_limit(quote.gas_limit)
        .max_fee_per_gas(quote.max_fee_per_gas)
        .max_priority_fee_per_gas(quote.max_priority_fee_per_gas)
}

/// Submits retryable tickets from the operator account of `client`.
#[derive(Clone)]
pub struct TicketSubmitter {
    client: Arc<dyn ChainClient>,
}

impl std::fmt::Debug for TicketSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSubmitter")
            .field("sender", &self.client.sender())
            .finish()
    }
}

impl TicketSubmitter {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Broadcasts one ticket. Errors are returned as-is; nothing is retried here.
    pub async fn submit(
        &self,
        inbox: Address,
        recipient: Address,
        quote: &FeeQuote,
    ) -> anyhow::Result<TxHash> {
        let tx = build_ticket(inbox, recipient, quote, self.client.sender());
        let tx_hash = self.client.send_transaction(tx).await?;
        info!(
            message = "Retryable ticket submitted",
            inbox = %inbox,
            recipient = %recipient,
            value = %quote.total_value,
            tx_hash = %tx_hash
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::quote;
    use whisperpay_core::test_utils::{MOCK_OPERATOR, MockChainClient};

    const INBOX: Address = Address::repeat_byte(0x1b);
    const RECIPIENT: Address = Address::repeat_byte(0x2c);

    #[test]
    fn ticket_encodes_quote_and_refunds_to_sender() {
        let fees = quote(U256::from(1_000u64), 0, Some(100_000_000), None).unwrap();
        let tx = build_ticket(INBOX, RECIPIENT, &fees, MOCK_OPERATOR);

        assert_eq!(tx.to.and_then(|kind| kind.to().copied()), Some(INBOX));
        assert_eq!(tx.value, Some(fees.total_value));
        assert_eq!(tx.gas, Some(1_500_000));
        assert_eq!(tx.max_fee_per_gas, Some(210_000_000));
        assert_eq!(tx.max_priority_fee_per_gas, Some(10_000_000));

        let input = tx.input.input().cloned().unwrap_or_default();
        let call = IInbox::createRetryableTicketCall::abi_decode(&input).unwrap();
        assert_eq!(call.to, RECIPIENT);
        assert_eq!(call.l2CallValue, U256::from(1_000u64));
        assert_eq!(call.maxSubmissionCost, fees.max_submission_cost);
        assert_eq!(call.excessFeeRefundAddress, MOCK_OPERATOR);
        assert_eq!(call.callValueRefundAddress, MOCK_OPERATOR);
        assert_eq!(call.gasLimit, U256::from(1_500_000u64));
        assert_eq!(call.maxFeePerGas, U256::from(210_000_000u64));
        assert!(call.data.is_empty());
    }

    #[tokio::test]
    async fn submit_surfaces_chain_errors() {
        let mock = MockChainClient::new().failing_for(INBOX);
        let submitter = TicketSubmitter::new(Arc::new(mock.clone()));
        let fees = quote(U256::ZERO, 0, Some(1), None).unwrap();

        let err = submitter.submit(INBOX, RECIPIENT, &fees).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(mock.attempts(), 1);
        assert!(mock.sent().is_empty());
    }
}
