//! Core primitives shared by every WhisperPay component: wallet identities, the per-user
//! rollup chain id, ledger records, the error taxonomy and the parent-chain client seam.

pub mod amount;
pub mod chain;
pub mod chain_id;
pub mod error;
pub mod logger;
pub mod types;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use amount::parse_eth_amount;
pub use chain::{ChainClient, ChainParams, ParentChainClient, SupportedChains};
pub use chain_id::{CHAIN_ID_MODULUS, DerivedChainId, derive_chain_id};
pub use error::{WhisperError, WhisperResult};
pub use types::{
    CoreContracts, Deployment, FailureStage, NewDeployment, PendingSettlement, SealedPayload,
    SettlementFailure, SettlementId, SettlementStatus, TransferItem, User, UserId, WalletAddress,
};
