use std::fmt;

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::types::WalletAddress;

/// Derived chain ids live in `[0, CHAIN_ID_MODULUS)`.
pub const CHAIN_ID_MODULUS: u64 = 2_147_483_647;

/// Chain id of the rollup provisioned for one wallet.
///
/// Stable for a given wallet, but not unique: distinct wallets may collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivedChainId(u32);

impl DerivedChainId {
    pub const fn new(value: u32) -> Option<Self> {
        if (value as u64) < CHAIN_ID_MODULUS {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DerivedChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<DerivedChainId> for u64 {
    fn from(id: DerivedChainId) -> Self {
        id.0 as Self
    }
}

/// Keccak-256 over the 20 address bytes, first 8 bytes of the digest read big-endian, reduced
/// modulo [`CHAIN_ID_MODULUS`].
pub fn derive_chain_id(wallet: &WalletAddress) -> DerivedChainId {
    let digest = keccak256(wallet.address());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    DerivedChainId((u64::from_be_bytes(head) % CHAIN_ID_MODULUS) as u32)
}
