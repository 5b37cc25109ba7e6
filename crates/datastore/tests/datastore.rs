use alloy_primitives::{Address, TxHash, address, b256};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use testcontainers_modules::{
    postgres,
    testcontainers::{ContainerAsync, runners::AsyncRunner},
};
use whisperpay_core::{
    CoreContracts, FailureStage, NewDeployment, SealedPayload, SettlementFailure, TransferItem,
    WalletAddress, derive_chain_id,
};
use whisperpay_datastore::{CorrelationStore, DequeueOrder, FailureLog, Ledger, PostgresLedger};

struct TestHarness {
    _postgres_instance: ContainerAsync<postgres::Postgres>,
    ledger: PostgresLedger,
}

async fn setup_ledger() -> anyhow::Result<TestHarness> {
    let postgres_instance = postgres::Postgres::default().start().await?;
    let connection_string = format!(
        "postgres://postgres:postgres@{}:{}/postgres",
        postgres_instance.get_host().await?,
        postgres_instance.get_host_port_ipv4(5432).await?
    );

    let pool = PgPool::connect(&connection_string).await?;
    let ledger = PostgresLedger::new(pool);

    assert!(ledger.run_migrations().await.is_ok());
    Ok(TestHarness {
        _postgres_instance: postgres_instance,
        ledger,
    })
}

const OWNER: Address = address!("0x2bEb0e1fD3430E8655624A7FCB4E8820397551f8");
const OTHER: Address = address!("0x59C899f52F2c40cBE5090bbc9A4f830B64a20Fc4");
const TX_HASH: TxHash = b256!("0x3ea7e1482485387e61150ee8e5c8cad48a14591789ac02cc2504046d96d0a5f4");

fn deployment(owner: Address, offset_secs: i64) -> NewDeployment {
    let owner = WalletAddress::from(owner);
    NewDeployment {
        owner,
        chain_id: derive_chain_id(&owner),
        tx_hash: TX_HASH,
        core_contracts: CoreContracts::new()
            .with("rollup", Address::repeat_byte(0x01))
            .with("inbox", Address::repeat_byte(0x02)),
        created_at: Utc::now() + Duration::seconds(offset_secs),
    }
}

fn item(byte: u8, amount: &str) -> TransferItem {
    TransferItem {
        recipient: Address::repeat_byte(byte),
        amount: amount.to_string(),
    }
}

#[tokio::test]
async fn append_and_read_deployments() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;

    let first = harness.ledger.append_deployment(deployment(OWNER, 0)).await?;
    let second = harness.ledger.append_deployment(deployment(OTHER, 5)).await?;

    let latest = harness.ledger.latest_deployment().await?;
    assert_eq!(latest.map(|d| d.id), Some(second.id));

    let own = harness
        .ledger
        .latest_deployment_for_user(first.owner)
        .await?
        .expect("deployment exists");
    assert_eq!(own.id, first.id);
    assert_eq!(own.tx_hash, TX_HASH);
    assert_eq!(own.core_contracts.inbox(), Some(Address::repeat_byte(0x02)));
    assert_eq!(own.chain_id, derive_chain_id(&WalletAddress::from(OWNER)));

    let user = harness
        .ledger
        .find_user(&WalletAddress::from(OWNER))
        .await?
        .expect("user created by deployment");
    assert_eq!(user.id, first.owner);
    Ok(())
}

#[tokio::test]
async fn users_are_case_insensitive() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;

    let mixed = WalletAddress::parse("0x2bEb0e1fD3430E8655624A7FCB4E8820397551f8")?;
    let lower = WalletAddress::parse("0x2beb0e1fd3430e8655624a7fcb4e8820397551f8")?;

    let created = harness.ledger.upsert_user(&mixed).await?;
    let found = harness.ledger.find_user(&lower).await?;
    assert_eq!(found.map(|u| u.id), Some(created.id));
    assert_eq!(harness.ledger.upsert_user(&lower).await?.id, created.id);
    Ok(())
}

#[tokio::test]
async fn pending_settlements_merge_and_complete() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;
    let wallet = WalletAddress::from(OWNER);
    let user = harness.ledger.upsert_user(&wallet).await?;

    assert!(
        harness
            .ledger
            .pending_transfers_for_creator(&wallet)
            .await?
            .is_none()
    );

    harness
        .ledger
        .create_pending_settlement(user.id, vec![item(0xa1, "0.1")])
        .await?;
    harness
        .ledger
        .create_pending_settlement(user.id, vec![item(0xa2, "0.25")])
        .await?;

    let pending = harness
        .ledger
        .pending_transfers_for_creator(&wallet)
        .await?
        .expect("pending items");
    assert_eq!(pending.owner, user.id);
    assert_eq!(pending.items, vec![item(0xa1, "0.1"), item(0xa2, "0.25")]);

    assert_eq!(pending.settlement_ids.len(), 2);

    harness
        .ledger
        .mark_completed(user.id, &pending.settlement_ids)
        .await?;
    harness
        .ledger
        .mark_completed(user.id, &pending.settlement_ids)
        .await?;
    assert!(
        harness
            .ledger
            .pending_transfers_for_creator(&wallet)
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn completion_only_touches_settlements_that_were_read() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;
    let wallet = WalletAddress::from(OWNER);
    let user = harness.ledger.upsert_user(&wallet).await?;

    harness
        .ledger
        .create_pending_settlement(user.id, vec![item(0xa1, "0.1")])
        .await?;
    let read = harness
        .ledger
        .pending_transfers_for_creator(&wallet)
        .await?
        .expect("pending items");
    harness
        .ledger
        .create_pending_settlement(user.id, vec![item(0xbb, "5")])
        .await?;

    harness
        .ledger
        .mark_completed(user.id, &read.settlement_ids)
        .await?;

    let left = harness
        .ledger
        .pending_transfers_for_creator(&wallet)
        .await?
        .expect("later batch still pending");
    assert_eq!(left.items, vec![item(0xbb, "5")]);
    Ok(())
}

#[tokio::test]
async fn secrets_and_sealed_payloads() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;
    let user = harness.ledger.upsert_user(&WalletAddress::from(OWNER)).await?;

    let key = harness.ledger.get_or_create_secret(user.id, vec![7; 32]).await?;
    let again = harness.ledger.get_or_create_secret(user.id, vec![9; 32]).await?;
    assert_eq!(key, vec![7; 32]);
    assert_eq!(again, key);

    let payload = SealedPayload {
        algo: "aes-256-gcm".to_string(),
        iv: "aXY=".to_string(),
        tag: "dGFn".to_string(),
        ciphertext: "Y3Q=".to_string(),
    };
    harness.ledger.save_sealed_payload(user.id, payload).await?;
    Ok(())
}

#[tokio::test]
async fn awaiting_creators_fifo_and_lifo() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;

    for byte in 1..=3u8 {
        harness.ledger.push_awaiting(Address::repeat_byte(byte)).await?;
    }
    assert_eq!(harness.ledger.awaiting_count().await?, 3);

    assert_eq!(
        harness.ledger.take_awaiting(DequeueOrder::Fifo).await?,
        Some(Address::repeat_byte(1))
    );
    assert_eq!(
        harness.ledger.take_awaiting(DequeueOrder::Lifo).await?,
        Some(Address::repeat_byte(3))
    );
    assert_eq!(
        harness.ledger.take_awaiting(DequeueOrder::Fifo).await?,
        Some(Address::repeat_byte(2))
    );
    assert_eq!(harness.ledger.take_awaiting(DequeueOrder::Fifo).await?, None);
    Ok(())
}

#[tokio::test]
async fn failures_round_trip_newest_first() -> anyhow::Result<()> {
    let harness = setup_ledger().await?;

    harness
        .ledger
        .record_failure(SettlementFailure::new(
            None,
            FailureStage::UnmatchedFunds,
            "funds arrived with no awaiting creator",
        ))
        .await?;
    harness
        .ledger
        .record_failure(SettlementFailure::new(
            Some(OWNER),
            FailureStage::ItemTransfer,
            "insufficient funds",
        ))
        .await?;

    let failures = harness.ledger.recent_failures(10).await?;
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].stage, FailureStage::ItemTransfer);
    assert_eq!(failures[0].creator, Some(OWNER));
    assert_eq!(failures[1].creator, None);
    Ok(())
}
