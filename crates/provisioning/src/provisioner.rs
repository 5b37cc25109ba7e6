use alloy_primitives::{Address, TxHash, keccak256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use whisperpay_core::{CoreContracts, DerivedChainId, WalletAddress};

/// What a rollup deployment produced on the parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedRollup {
    pub tx_hash: TxHash,
    pub core_contracts: CoreContracts,
}

/// Deploys the rollup contracts of one user.
#[async_trait]
pub trait RollupProvisioner: Send + Sync {
    async fn provision(
        &self,
        owner: &WalletAddress,
        chain_id: DerivedChainId,
    ) -> anyhow::Result<ProvisionedRollup>;
}

/// Deterministic stand-in for a real deployment.
///
/// The transaction hash is `keccak256("<lowercase owner>-<chain id>")` and the core contract
/// addresses are slices of that hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRollupProvisioner;

impl MockRollupProvisioner {
    pub fn derive(owner: &WalletAddress, chain_id: DerivedChainId) -> ProvisionedRollup {
        let seed = format!("{}-{}", owner.canonical(), chain_id);
        let hash = keccak256(seed.as_bytes());

        let core_contracts = CoreContracts::new()
            .with("rollup", Address::from_slice(&hash[0..20]))
            .with("sequencerInbox", Address::from_slice(&hash[4..24]))
            .with("bridge", Address::from_slice(&hash[8..28]));

        ProvisionedRollup {
            tx_hash: hash,
            core_contracts,
        }
    }
}

#[async_trait]
impl RollupProvisioner for MockRollupProvisioner {
    async fn provision(
        &self,
        owner: &WalletAddress,
        chain_id: DerivedChainId,
    ) -> anyhow::Result<ProvisionedRollup> {
        Ok(Self::derive(owner, chain_id))
    }
}
