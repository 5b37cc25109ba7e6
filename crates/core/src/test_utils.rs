//! Reusable mocks for the collaborator traits.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, TxHash, keccak256};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;

use crate::chain::ChainClient;

/// Operator address used by [`MockChainClient`] unless overridden.
pub const MOCK_OPERATOR: Address = Address::repeat_byte(0x0a);

#[derive(Debug)]
struct MockChainState {
    chain_id: u64,
    base_fee: Option<u128>,
    gas_price: Option<u128>,
    failing_recipients: HashSet<Address>,
    failing_selectors: HashSet<[u8; 4]>,
    sent: Vec<TransactionRequest>,
    attempts: usize,
}

/// Records every transaction it is asked to send and fails on demand.
#[derive(Debug, Clone)]
pub struct MockChainClient {
    sender: Address,
    state: Arc<Mutex<MockChainState>>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            sender: MOCK_OPERATOR,
            state: Arc::new(Mutex::new(MockChainState {
                chain_id: 421_614,
                base_fee: Some(100_000_000),
                gas_price: Some(100_000_000),
                failing_recipients: HashSet::new(),
                failing_selectors: HashSet::new(),
                sent: Vec::new(),
                attempts: 0,
            })),
        }
    }

    pub fn with_chain_id(self, chain_id: u64) -> Self {
        self.state.lock().unwrap().chain_id = chain_id;
        self
    }

    pub fn with_base_fee(self, base_fee: Option<u128>) -> Self {
        self.state.lock().unwrap().base_fee = base_fee;
        self
    }

    /// `None` makes `gas_price` fail.
    pub fn with_gas_price(self, gas_price: Option<u128>) -> Self {
        self.state.lock().unwrap().gas_price = gas_price;
        self
    }

    /// Every transaction sent to `to` is rejected.
    pub fn failing_for(self, to: Address) -> Self {
        self.state.lock().unwrap().failing_recipients.insert(to);
        self
    }

    /// Every transaction whose calldata starts with `selector` is rejected.
    pub fn failing_selector(self, selector: [u8; 4]) -> Self {
        self.state.lock().unwrap().failing_selectors.insert(selector);
        self
    }

    /// Successfully broadcast transactions, in order.
    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Every send attempt, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn base_fee(&self) -> anyhow::Result<Option<u128>> {
        Ok(self.state.lock().unwrap().base_fee)
    }

    async fn gas_price(&self) -> anyhow::Result<u128> {
        self.state
            .lock()
            .unwrap()
            .gas_price
            .ok_or_else(|| anyhow::anyhow!("eth_gasPrice unavailable"))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> anyhow::Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;

        let to = tx.to.and_then(|kind| kind.to().copied());
        if let Some(to) = to
            && state.failing_recipients.contains(&to)
        {
            anyhow::bail!("execution reverted: transfer to {to} rejected");
        }
        let selector = tx
            .input
            .input()
            .and_then(|input| input.get(..4))
            .and_then(|head| <[u8; 4]>::try_from(head).ok());
        if let Some(selector) = selector
            && state.failing_selectors.contains(&selector)
        {
            anyhow::bail!("execution reverted");
        }

        let tx_hash = keccak256((state.attempts as u64).to_be_bytes());
        state.sent.push(tx);
        Ok(tx_hash)
    }
}
