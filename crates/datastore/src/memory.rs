use std::collections::{HashMap, VecDeque};

use crate::traits::{CorrelationStore, DequeueOrder, FailureLog, Ledger};
use alloy_primitives::Address;
use anyhow::Result;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;
use whisperpay_core::{
    Deployment, NewDeployment, PendingSettlement, SealedPayload, SettlementFailure, SettlementId,
    SettlementStatus, TransferItem, User, UserId, WalletAddress,
};

#[derive(Debug, Clone)]
struct SettlementRecord {
    id: SettlementId,
    owner: UserId,
    items: Vec<TransferItem>,
    status: SettlementStatus,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<WalletAddress, User>,
    deployments: Vec<Deployment>,
    settlements: Vec<SettlementRecord>,
    secrets: HashMap<UserId, Vec<u8>>,
    sealed: Vec<(UserId, SealedPayload)>,
    awaiting: VecDeque<Address>,
    failures: Vec<SettlementFailure>,
}

impl State {
    fn upsert_user(&mut self, wallet: &WalletAddress) -> User {
        self.users
            .entry(*wallet)
            .or_insert_with(|| User {
                id: Uuid::new_v4(),
                wallet: *wallet,
                created_at: Utc::now(),
            })
            .clone()
    }

    fn wallet_of(&self, user: UserId) -> Option<WalletAddress> {
        self.users.values().find(|u| u.id == user).map(|u| u.wallet)
    }
}

/// Process-local ledger, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of settlement records of `user` in `status`.
    pub async fn settlement_count(&self, user: UserId, status: SettlementStatus) -> usize {
        self.state
            .read()
            .await
            .settlements
            .iter()
            .filter(|s| s.owner == user && s.status == status)
            .count()
    }

    pub async fn sealed_payloads(&self, user: UserId) -> Vec<SealedPayload> {
        self.state
            .read()
            .await
            .sealed
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn append_deployment(&self, deployment: NewDeployment) -> Result<Deployment> {
        let mut state = self.state.write().await;
        let user = state.upsert_user(&deployment.owner);
        let record = Deployment {
            id: Uuid::new_v4(),
            owner: user.id,
            chain_id: deployment.chain_id,
            tx_hash: deployment.tx_hash,
            core_contracts: deployment.core_contracts,
            created_at: deployment.created_at,
        };
        state.deployments.push(record.clone());
        Ok(record)
    }

    async fn latest_deployment(&self) -> Result<Option<Deployment>> {
        // Ties on created_at resolve to the later append.
        let state = self.state.read().await;
        Ok(state
            .deployments
            .iter()
            .enumerate()
            .max_by_key(|(idx, d)| (d.created_at, *idx))
            .map(|(_, d)| d.clone()))
    }

    async fn find_user(&self, wallet: &WalletAddress) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(wallet).cloned())
    }

    async fn upsert_user(&self, wallet: &WalletAddress) -> Result<User> {
        Ok(self.state.write().await.upsert_user(wallet))
    }

    async fn latest_deployment_for_user(&self, user: UserId) -> Result<Option<Deployment>> {
        let state = self.state.read().await;
        Ok(state
            .deployments
            .iter()
            .enumerate()
            .filter(|(_, d)| d.owner == user)
            .max_by_key(|(idx, d)| (d.created_at, *idx))
            .map(|(_, d)| d.clone()))
    }

    async fn pending_transfers_for_creator(
        &self,
        creator: &WalletAddress,
    ) -> Result<Option<PendingSettlement>> {
        let state = self.state.read().await;
        let Some(user) = state.users.get(creator) else {
            return Ok(None);
        };

        let pending: Vec<&SettlementRecord> = state
            .settlements
            .iter()
            .filter(|s| s.owner == user.id && s.status == SettlementStatus::Pending)
            .collect();
        if pending.is_empty() {
            return Ok(None);
        }

        Ok(Some(PendingSettlement {
            owner: user.id,
            wallet: user.wallet,
            settlement_ids: pending.iter().map(|s| s.id).collect(),
            items: pending.iter().flat_map(|s| s.items.iter().cloned()).collect(),
            status: SettlementStatus::Pending,
        }))
    }

    async fn mark_completed(&self, user: UserId, settlements: &[SettlementId]) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .settlements
            .iter_mut()
            .filter(|s| s.owner == user && settlements.contains(&s.id))
            .for_each(|s| s.status = SettlementStatus::Completed);
        Ok(())
    }

    async fn create_pending_settlement(
        &self,
        user: UserId,
        items: Vec<TransferItem>,
    ) -> Result<PendingSettlement> {
        let mut state = self.state.write().await;
        let wallet = state
            .wallet_of(user)
            .ok_or_else(|| anyhow::anyhow!("unknown user {user}"))?;
        let id = Uuid::new_v4();
        state.settlements.push(SettlementRecord {
            id,
            owner: user,
            items: items.clone(),
            status: SettlementStatus::Pending,
        });
        Ok(PendingSettlement {
            owner: user,
            wallet,
            settlement_ids: vec![id],
            items,
            status: SettlementStatus::Pending,
        })
    }

    async fn get_or_create_secret(&self, user: UserId, candidate: Vec<u8>) -> Result<Vec<u8>> {
        let mut state = self.state.write().await;
        Ok(state.secrets.entry(user).or_insert(candidate).clone())
    }

    async fn save_sealed_payload(&self, user: UserId, payload: SealedPayload) -> Result<()> {
        self.state.write().await.sealed.push((user, payload));
        Ok(())
    }
}

#[async_trait::async_trait]
impl CorrelationStore for InMemoryLedger {
    async fn push_awaiting(&self, creator: Address) -> Result<()> {
        self.state.write().await.awaiting.push_back(creator);
        Ok(())
    }

    async fn take_awaiting(&self, order: DequeueOrder) -> Result<Option<Address>> {
        let mut state = self.state.write().await;
        Ok(match order {
            DequeueOrder::Fifo => state.awaiting.pop_front(),
            DequeueOrder::Lifo => state.awaiting.pop_back(),
        })
    }

    async fn awaiting_count(&self) -> Result<usize> {
        Ok(self.state.read().await.awaiting.len())
    }
}

#[async_trait::async_trait]
impl FailureLog for InMemoryLedger {
    async fn record_failure(&self, failure: SettlementFailure) -> Result<()> {
        self.state.write().await.failures.push(failure);
        Ok(())
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<SettlementFailure>> {
        let state = self.state.read().await;
        Ok(state.failures.iter().rev().take(limit).cloned().collect())
    }
}
