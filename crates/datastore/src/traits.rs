use alloy_primitives::Address;
use anyhow::Result;
use whisperpay_core::{
    Deployment, NewDeployment, PendingSettlement, SealedPayload, SettlementFailure, SettlementId,
    TransferItem, User, UserId, WalletAddress,
};

/// Trait defining the ledger operations used by the deployment, bridge and settlement flows
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    /// Append a deployment, creating the owner's user record if needed
    async fn append_deployment(&self, deployment: NewDeployment) -> Result<Deployment>;

    /// Most recent deployment across all users
    async fn latest_deployment(&self) -> Result<Option<Deployment>>;

    async fn find_user(&self, wallet: &WalletAddress) -> Result<Option<User>>;

    async fn upsert_user(&self, wallet: &WalletAddress) -> Result<User>;

    async fn latest_deployment_for_user(&self, user: UserId) -> Result<Option<Deployment>>;

    /// All pending items of the user behind `creator`, merged in queue order.
    ///
    /// Returns `None` when the user is unknown or has nothing pending.
    async fn pending_transfers_for_creator(
        &self,
        creator: &WalletAddress,
    ) -> Result<Option<PendingSettlement>>;

    /// Move the listed settlements of `user` to completed. Idempotent.
    ///
    /// Settlements queued after `settlements` was read stay pending.
    async fn mark_completed(&self, user: UserId, settlements: &[SettlementId]) -> Result<()>;

    /// Queue a new batch of payments for `user`
    async fn create_pending_settlement(
        &self,
        user: UserId,
        items: Vec<TransferItem>,
    ) -> Result<PendingSettlement>;

    /// Store `candidate` as the user's sealing key unless one exists; returns the stored key.
    async fn get_or_create_secret(&self, user: UserId, candidate: Vec<u8>) -> Result<Vec<u8>>;

    async fn save_sealed_payload(&self, user: UserId, payload: SealedPayload) -> Result<()>;
}

/// Which awaiting creator a dequeue claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DequeueOrder {
    /// The earliest job created settles first.
    #[default]
    Fifo,
    /// The latest job created settles first.
    Lifo,
}

/// Durable storage for creators whose router transfer went out and who await funds.
#[async_trait::async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn push_awaiting(&self, creator: Address) -> Result<()>;

    /// Atomically remove and return one awaiting creator.
    async fn take_awaiting(&self, order: DequeueOrder) -> Result<Option<Address>>;

    async fn awaiting_count(&self) -> Result<usize>;
}

/// Structured record of background settlement failures
#[async_trait::async_trait]
pub trait FailureLog: Send + Sync {
    async fn record_failure(&self, failure: SettlementFailure) -> Result<()>;

    /// Newest first
    async fn recent_failures(&self, limit: usize) -> Result<Vec<SettlementFailure>>;
}
