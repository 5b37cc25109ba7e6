//! Bindings for the dealer contract whose events drive settlement.
use alloy_primitives::Address;
use alloy_rpc_types::{Filter, TransactionRequest};
use alloy_sol_types::{SolCall, SolEvent, sol};

sol! {
    interface IDealer {
        /// A job was created on a rollup. The "job created" signal.
        event L3Interaction(
            string indexed _backendDigest,
            bytes32 _jobDigest,
            uint256 indexed _chainId,
            address _jobCreator
        );

        /// The dealer received the funds of a routed job. The "funds arrived" signal.
        event FundsTransferredToMediator(uint256 _amount);

        function transferToWhisperRouter(address _jobCreator) external;

        function postOpsUpdate(address _jobCreator) external;
    }
}

pub fn job_created_filter(dealer: Address) -> Filter {
    Filter::new()
        .address(dealer)
        .event_signature(IDealer::L3Interaction::SIGNATURE_HASH)
}

pub fn funds_arrived_filter(dealer: Address) -> Filter {
    Filter::new()
        .address(dealer)
        .event_signature(IDealer::FundsTransferredToMediator::SIGNATURE_HASH)
}

/// "Route funds" call for `creator`.
pub fn route_funds_tx(dealer: Address, sender: Address, creator: Address) -> TransactionRequest {
    let call = IDealer::transferToWhisperRouterCall {
        _jobCreator: creator,
    };
    TransactionRequest::default()
        .from(sender)
        .to(dealer)
        .input(call.abi_encode().into())
}

pub fn post_ops_tx(dealer: Address, sender: Address, creator: Address) -> TransactionRequest {
    let call = IDealer::postOpsUpdateCall {
        _jobCreator: creator,
    };
    TransactionRequest::default()
        .from(sender)
        .to(dealer)
        .input(call.abi_encode().into())
}
