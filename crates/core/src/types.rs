use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain_id::DerivedChainId;
use crate::error::WhisperError;

pub type UserId = Uuid;

pub type SettlementId = Uuid;

/// A 20-byte wallet address, always rendered in lowercase canonical form.
///
/// Parsing accepts any letter case, so `0xABCdEF..` and `0xabcdef..` are the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WalletAddress(Address);

impl WalletAddress {
    pub fn parse(input: &str) -> Result<Self, WhisperError> {
        let input = input.trim();
        let hex = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .ok_or_else(|| WhisperError::validation("Invalid EVM address"))?;
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WhisperError::validation("Invalid EVM address"));
        }
        let address =
            Address::from_str(hex).map_err(|_| WhisperError::validation("Invalid EVM address"))?;
        Ok(Self(address))
    }

    pub const fn address(&self) -> Address {
        self.0
    }

    /// `0x`-prefixed lowercase hex, the form used as the ledger key.
    pub fn canonical(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<WalletAddress> for Address {
    fn from(wallet: WalletAddress) -> Self {
        wallet.0
    }
}

impl From<WalletAddress> for String {
    fn from(wallet: WalletAddress) -> Self {
        wallet.canonical()
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = WhisperError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl FromStr for WalletAddress {
    type Err = WhisperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub wallet: WalletAddress,
    pub created_at: DateTime<Utc>,
}

/// Named core contracts returned by the rollup provisioner (`inbox`, `rollup`, `bridge`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreContracts(BTreeMap<String, Address>);

impl CoreContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, address: Address) -> Self {
        self.0.insert(name.into(), address);
        self
    }

    pub fn get(&self, name: &str) -> Option<Address> {
        self.0.get(name).copied()
    }

    /// The parent-chain inbox that accepts retryable tickets for this rollup.
    pub fn inbox(&self) -> Option<Address> {
        self.get("inbox")
    }
}

impl FromIterator<(String, Address)> for CoreContracts {
    fn from_iter<T: IntoIterator<Item = (String, Address)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Input to `Ledger::append_deployment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeployment {
    pub owner: WalletAddress,
    pub chain_id: DerivedChainId,
    pub tx_hash: TxHash,
    pub core_contracts: CoreContracts,
    pub created_at: DateTime<Utc>,
}

/// An append-only record of one provisioned rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: Uuid,
    pub owner: UserId,
    pub chain_id: DerivedChainId,
    pub tx_hash: TxHash,
    pub core_contracts: CoreContracts,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Completed,
}

impl SettlementStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(anyhow::anyhow!("unknown settlement status: {other}")),
        }
    }
}

/// One payment of a batch: a recipient and a decimal ETH amount such as `"0.01"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub recipient: Address,
    pub amount: String,
}

/// The unpaid transfers of one user, in the order they were queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub owner: UserId,
    pub wallet: WalletAddress,
    /// The settlement records `items` were read from. Only these may be completed.
    pub settlement_ids: Vec<SettlementId>,
    pub items: Vec<TransferItem>,
    pub status: SettlementStatus,
}

/// Output of the payload sealer. All binary fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub algo: String,
    pub iv: String,
    pub tag: String,
    pub ciphertext: String,
}

impl SealedPayload {
    /// `iv:tag:ciphertext`, the compact form handed back to callers.
    pub fn compact(&self) -> String {
        format!("{}:{}:{}", self.iv, self.tag, self.ciphertext)
    }
}

/// Where in the settlement flow a background failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    RouterTransfer,
    /// The router transfer went out but the creator could not be queued.
    CreatorEnqueue,
    UnmatchedFunds,
    PendingLookup,
    ItemTransfer,
    PostOpsUpdate,
    MarkCompleted,
}

impl FailureStage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RouterTransfer => "router_transfer",
            Self::CreatorEnqueue => "creator_enqueue",
            Self::UnmatchedFunds => "unmatched_funds",
            Self::PendingLookup => "pending_lookup",
            Self::ItemTransfer => "item_transfer",
            Self::PostOpsUpdate => "post_ops_update",
            Self::MarkCompleted => "mark_completed",
        }
    }
}

impl FromStr for FailureStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "router_transfer" => Self::RouterTransfer,
            "creator_enqueue" => Self::CreatorEnqueue,
            "unmatched_funds" => Self::UnmatchedFunds,
            "pending_lookup" => Self::PendingLookup,
            "item_transfer" => Self::ItemTransfer,
            "post_ops_update" => Self::PostOpsUpdate,
            "mark_completed" => Self::MarkCompleted,
            other => anyhow::bail!("unknown failure stage: {other}"),
        })
    }
}

/// A structured record of a swallowed settlement failure, kept so an operator can reconcile
/// creators that were dropped from automatic processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementFailure {
    pub creator: Option<Address>,
    pub stage: FailureStage,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

impl SettlementFailure {
    pub fn new(creator: Option<Address>, stage: FailureStage, error: impl Into<String>) -> Self {
        Self {
            creator,
            stage,
            error: error.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_address_is_case_insensitive() {
        let upper = WalletAddress::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        let mixed = WalletAddress::parse("0xABCdEF0123456789abcdef0123456789AbCdEf01").unwrap();
        let lower = WalletAddress::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap();

        assert_eq!(upper, mixed);
        assert_eq!(mixed, lower);
        assert_eq!(mixed.canonical(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(mixed.to_string(), mixed.canonical());
    }

    #[test]
    fn wallet_address_rejects_malformed_input() {
        for input in [
            "",
            "0x",
            "abcdef0123456789abcdef0123456789abcdef01",
            "0xabcdef0123456789abcdef0123456789abcdef",
            "0xabcdef0123456789abcdef0123456789abcdef0123",
            "0xzzcdef0123456789abcdef0123456789abcdef01",
        ] {
            let err = WalletAddress::parse(input).unwrap_err();
            assert!(matches!(err, WhisperError::Validation(_)), "{input}");
        }
    }

    #[test]
    fn wallet_address_serializes_canonically() {
        let wallet = WalletAddress::parse("0xABCdEF0123456789abcdef0123456789AbCdEf01").unwrap();
        let json = serde_json::to_string(&wallet).unwrap();
        assert_eq!(json, "\"0xabcdef0123456789abcdef0123456789abcdef01\"");

        let back: WalletAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wallet);
    }

    #[test]
    fn core_contracts_expose_inbox() {
        let inbox = Address::repeat_byte(0x11);
        let contracts = CoreContracts::new()
            .with("rollup", Address::repeat_byte(0x22))
            .with("inbox", inbox);

        assert_eq!(contracts.inbox(), Some(inbox));
        assert_eq!(CoreContracts::new().inbox(), None);
    }

    #[test]
    fn sealed_payload_compact_form() {
        let sealed = SealedPayload {
            algo: "AES-256-GCM".into(),
            iv: "aXY=".into(),
            tag: "dGFn".into(),
            ciphertext: "Y3Q=".into(),
        };
        assert_eq!(sealed.compact(), "aXY=:dGFn:Y3Q=");
    }

    #[test]
    fn failure_stage_names_round_trip() {
        let stage: FailureStage = "creator_enqueue".parse().unwrap();
        assert_eq!(stage, FailureStage::CreatorEnqueue);
        assert_eq!(stage.as_str(), "creator_enqueue");
        assert_eq!(
            serde_json::to_string(&stage).unwrap(),
            "\"creator_enqueue\""
        );
        assert!("enqueue".parse::<FailureStage>().is_err());
    }
}
