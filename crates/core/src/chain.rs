use std::collections::BTreeMap;
use std::fmt;

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, TxHash};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::{BlockNumberOrTag, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::WhisperError;

/// Parent chains accepted when none are configured: Ethereum mainnet, Sepolia, Arbitrum One and
/// Arbitrum Sepolia.
pub const DEFAULT_PARENT_CHAINS: [u64; 4] = [1, 11_155_111, 42_161, 421_614];

const KNOWN_CHAINS: [(u64, &str); 4] = [
    (1, "mainnet"),
    (11_155_111, "sepolia"),
    (42_161, "arbitrum"),
    (421_614, "arbitrum-sepolia"),
];

/// The parent-chain operations the bridge and the settlement flow depend on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the operator account that signs every outgoing transaction.
    fn sender(&self) -> Address;

    async fn chain_id(&self) -> Result<u64>;

    /// Base fee of the latest block, `None` on chains without an EIP-1559 fee market.
    async fn base_fee(&self) -> Result<Option<u128>>;

    async fn gas_price(&self) -> Result<u128>;

    /// Signs and broadcasts `tx` from [`ChainClient::sender`], returning once the node accepted it.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;
}

/// [`ChainClient`] over an HTTP JSON-RPC endpoint and a single operator key.
pub struct ParentChainClient {
    provider: DynProvider,
    sender: Address,
    // Held across nonce assignment and broadcast so concurrent handlers never reuse a nonce.
    submit_lock: Mutex<()>,
}

impl fmt::Debug for ParentChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentChainClient")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl ParentChainClient {
    pub fn new(rpc_url: Url, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("operator private key is not a valid secp256k1 key")?;
        let sender = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url)
            .erased();

        Ok(Self {
            provider,
            sender,
            submit_lock: Mutex::new(()),
        })
    }

    /// The underlying provider, used for log subscriptions.
    pub const fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

#[async_trait]
impl ChainClient for ParentChainClient {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn base_fee(&self) -> Result<Option<u128>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?;
        Ok(block
            .and_then(|block| block.header.base_fee_per_gas)
            .map(u128::from))
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let _guard = self.submit_lock.lock().await;
        let pending = self.provider.send_transaction(tx).await?;
        let tx_hash = *pending.tx_hash();
        debug!(message = "transaction broadcast", tx_hash = %tx_hash);
        Ok(tx_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub chain_id: u64,
    pub name: String,
}

/// Fixed lookup table of the parent chains this deployment may talk to.
#[derive(Debug, Clone)]
pub struct SupportedChains {
    chains: BTreeMap<u64, ChainParams>,
}

impl SupportedChains {
    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        let chains = ids
            .into_iter()
            .map(|chain_id| {
                let name = KNOWN_CHAINS
                    .iter()
                    .find(|(id, _)| *id == chain_id)
                    .map(|(_, name)| (*name).to_string())
                    .unwrap_or_else(|| format!("chain-{chain_id}"));
                (chain_id, ChainParams { chain_id, name })
            })
            .collect();
        Self { chains }
    }

    pub fn resolve(&self, chain_id: u64) -> Result<&ChainParams, WhisperError> {
        self.chains
            .get(&chain_id)
            .ok_or(WhisperError::UnsupportedChain(chain_id))
    }

    /// Reads the live network id from `client` and resolves it against the table.
    pub async fn resolve_live(
        &self,
        client: &dyn ChainClient,
    ) -> Result<&ChainParams, WhisperError> {
        let chain_id = client.chain_id().await.map_err(WhisperError::submission)?;
        self.resolve(chain_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.keys().copied()
    }
}

impl Default for SupportedChains {
    fn default() -> Self {
        Self::from_ids(DEFAULT_PARENT_CHAINS)
    }
}
