use std::str::FromStr;

use crate::traits::{CorrelationStore, DequeueOrder, FailureLog, Ledger};
use alloy_primitives::{Address, TxHash};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;
use whisperpay_core::{
    CoreContracts, DerivedChainId, Deployment, NewDeployment, PendingSettlement, SealedPayload,
    SettlementFailure, SettlementId, SettlementStatus, TransferItem, User, UserId, WalletAddress,
};

const TAKE_OLDEST_AWAITING: &str = r#"
    DELETE FROM awaiting_funds
    WHERE seq = (
        SELECT seq FROM awaiting_funds ORDER BY seq ASC LIMIT 1 FOR UPDATE SKIP LOCKED
    )
    RETURNING creator
"#;

const TAKE_NEWEST_AWAITING: &str = r#"
    DELETE FROM awaiting_funds
    WHERE seq = (
        SELECT seq FROM awaiting_funds ORDER BY seq DESC LIMIT 1 FOR UPDATE SKIP LOCKED
    )
    RETURNING creator
"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    wallet: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            wallet: WalletAddress::parse(&row.wallet)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SettlementRow {
    id: Uuid,
    items: Json<Vec<TransferItem>>,
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    user_id: Uuid,
    chain_id: i64,
    tx_hash: String,
    core_contracts: Json<CoreContracts>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = anyhow::Error;

    fn try_from(row: DeploymentRow) -> Result<Self> {
        let chain_id = u32::try_from(row.chain_id)
            .ok()
            .and_then(DerivedChainId::new)
            .with_context(|| format!("stored chain id {} out of range", row.chain_id))?;
        Ok(Self {
            id: row.id,
            owner: row.user_id,
            chain_id,
            tx_hash: TxHash::from_str(&row.tx_hash)?,
            core_contracts: row.core_contracts.0,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FailureRow {
    creator: Option<String>,
    stage: String,
    error: String,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<FailureRow> for SettlementFailure {
    type Error = anyhow::Error;

    fn try_from(row: FailureRow) -> Result<Self> {
        Ok(Self {
            creator: row.creator.as_deref().map(Address::from_str).transpose()?,
            stage: row.stage.parse()?,
            error: row.error,
            occurred_at: row.occurred_at,
        })
    }
}

/// PostgreSQL implementation of the ledger traits
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub async fn run_migrations(&self) -> Result<()> {
        info!(message = "running migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!(message = "migrations complete");
        Ok(())
    }
}

impl PostgresLedger {
    /// Create a new PostgreSQL ledger instance
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to postgres")?;
        Ok(Self::new(pool))
    }

    async fn upsert_user_in<'e, E>(executor: E, wallet: &WalletAddress) -> Result<User>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (id, wallet)
            VALUES ($1, $2)
            ON CONFLICT (wallet) DO UPDATE SET wallet = EXCLUDED.wallet
            RETURNING id, wallet, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(wallet.canonical())
        .fetch_one(executor)
        .await?;
        row.try_into()
    }

    async fn wallet_of(&self, user: UserId) -> Result<WalletAddress> {
        let wallet: String = sqlx::query_scalar("SELECT wallet FROM users WHERE id = $1")
            .bind(user)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("unknown user {user}"))?;
        Ok(WalletAddress::parse(&wallet)?)
    }
}

#[async_trait::async_trait]
impl Ledger for PostgresLedger {
    async fn append_deployment(&self, deployment: NewDeployment) -> Result<Deployment> {
        let mut tx = self.pool.begin().await?;
        let user = Self::upsert_user_in(&mut *tx, &deployment.owner).await?;

        let row: DeploymentRow = sqlx::query_as(
            r#"
            INSERT INTO deployments (id, user_id, chain_id, tx_hash, core_contracts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, chain_id, tx_hash, core_contracts, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(i64::from(deployment.chain_id.get()))
        .bind(format!("{:#x}", deployment.tx_hash))
        .bind(Json(&deployment.core_contracts))
        .bind(deployment.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn latest_deployment(&self) -> Result<Option<Deployment>> {
        let row: Option<DeploymentRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, chain_id, tx_hash, core_contracts, created_at
            FROM deployments
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Deployment::try_from).transpose()
    }

    async fn find_user(&self, wallet: &WalletAddress) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, wallet, created_at FROM users WHERE wallet = $1")
                .bind(wallet.canonical())
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn upsert_user(&self, wallet: &WalletAddress) -> Result<User> {
        Self::upsert_user_in(&self.pool, wallet).await
    }

    async fn latest_deployment_for_user(&self, user: UserId) -> Result<Option<Deployment>> {
        let row: Option<DeploymentRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, chain_id, tx_hash, core_contracts, created_at
            FROM deployments
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Deployment::try_from).transpose()
    }

    async fn pending_transfers_for_creator(
        &self,
        creator: &WalletAddress,
    ) -> Result<Option<PendingSettlement>> {
        let Some(user) = self.find_user(creator).await? else {
            return Ok(None);
        };

        let batches: Vec<SettlementRow> = sqlx::query_as(
            r#"
            SELECT id, items FROM settlements
            WHERE user_id = $1 AND status = 'pending'
            ORDER BY seq ASC
            "#,
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await?;

        if batches.is_empty() {
            return Ok(None);
        }

        Ok(Some(PendingSettlement {
            owner: user.id,
            wallet: user.wallet,
            settlement_ids: batches.iter().map(|batch| batch.id).collect(),
            items: batches.into_iter().flat_map(|batch| batch.items.0).collect(),
            status: SettlementStatus::Pending,
        }))
    }

    async fn mark_completed(&self, user: UserId, settlements: &[SettlementId]) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE settlements
            SET status = 'completed', updated_at = NOW()
            WHERE user_id = $1 AND id = ANY($2) AND status = 'pending'
            "#,
        )
        .bind(user)
        .bind(settlements)
        .execute(&self.pool)
        .await?;
        info!(
            message = "settlements completed",
            user = %user,
            rows = result.rows_affected()
        );
        Ok(())
    }

    async fn create_pending_settlement(
        &self,
        user: UserId,
        items: Vec<TransferItem>,
    ) -> Result<PendingSettlement> {
        let wallet = self.wallet_of(user).await?;
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO settlements (id, user_id, items, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(user)
        .bind(Json(&items))
        .bind(SettlementStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(PendingSettlement {
            owner: user,
            wallet,
            settlement_ids: vec![id],
            items,
            status: SettlementStatus::Pending,
        })
    }

    async fn get_or_create_secret(&self, user: UserId, candidate: Vec<u8>) -> Result<Vec<u8>> {
        sqlx::query(
            r#"
            INSERT INTO user_secrets (user_id, secret)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user)
        .bind(&candidate)
        .execute(&self.pool)
        .await?;

        let secret: Vec<u8> =
            sqlx::query_scalar("SELECT secret FROM user_secrets WHERE user_id = $1")
                .bind(user)
                .fetch_one(&self.pool)
                .await?;
        Ok(secret)
    }

    async fn save_sealed_payload(&self, user: UserId, payload: SealedPayload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sealed_payloads (id, user_id, algo, iv, tag, ciphertext)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user)
        .bind(payload.algo)
        .bind(payload.iv)
        .bind(payload.tag)
        .bind(payload.ciphertext)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CorrelationStore for PostgresLedger {
    async fn push_awaiting(&self, creator: Address) -> Result<()> {
        sqlx::query("INSERT INTO awaiting_funds (creator) VALUES ($1)")
            .bind(WalletAddress::from(creator).canonical())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take_awaiting(&self, order: DequeueOrder) -> Result<Option<Address>> {
        let sql = match order {
            DequeueOrder::Fifo => TAKE_OLDEST_AWAITING,
            DequeueOrder::Lifo => TAKE_NEWEST_AWAITING,
        };
        let creator: Option<String> = sqlx::query_scalar(sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(creator.as_deref().map(Address::from_str).transpose()?)
    }

    async fn awaiting_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM awaiting_funds")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[async_trait::async_trait]
impl FailureLog for PostgresLedger {
    async fn record_failure(&self, failure: SettlementFailure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_failures (id, creator, stage, error, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(failure.creator.map(|c| WalletAddress::from(c).canonical()))
        .bind(failure.stage.as_str())
        .bind(failure.error)
        .bind(failure.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<SettlementFailure>> {
        let rows: Vec<FailureRow> = sqlx::query_as(
            r#"
            SELECT creator, stage, error, occurred_at
            FROM settlement_failures
            ORDER BY seq DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SettlementFailure::try_from).collect()
    }
}
