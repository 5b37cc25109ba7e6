use std::sync::Arc;

use alloy_primitives::{TxHash, U256};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use whisperpay_core::{
    CoreContracts, DerivedChainId, NewDeployment, TransferItem, WalletAddress, WhisperError,
    WhisperResult, derive_chain_id, parse_eth_amount,
};
use whisperpay_datastore::Ledger;

use crate::provisioner::RollupProvisioner;
use crate::sealer::PayloadSealer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReceipt {
    pub chain_id: DerivedChainId,
    pub core_contracts: CoreContracts,
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub message: String,
    pub rollup_exists: bool,
    pub chain_id: Option<DerivedChainId>,
}

impl DeploymentStatus {
    fn missing(message: &str) -> Self {
        Self {
            message: message.to_string(),
            rollup_exists: false,
            chain_id: None,
        }
    }
}

/// One requested payment as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItem {
    pub recipient: String,
    /// Decimal ETH string.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedPayment {
    pub message: String,
    pub chain_id: DerivedChainId,
    /// `iv:tag:ciphertext`, base64.
    pub encrypted_message: String,
}

/// Provisions per-user rollups and queues the payments settled by the orchestrator.
pub struct DeploymentService {
    ledger: Arc<dyn Ledger>,
    provisioner: Option<Arc<dyn RollupProvisioner>>,
    sealer: Arc<dyn PayloadSealer>,
}

impl std::fmt::Debug for DeploymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentService")
            .field("provisioner", &self.provisioner.is_some())
            .finish_non_exhaustive()
    }
}

impl DeploymentService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        provisioner: Option<Arc<dyn RollupProvisioner>>,
        sealer: Arc<dyn PayloadSealer>,
    ) -> Self {
        Self {
            ledger,
            provisioner,
            sealer,
        }
    }

    pub async fn deploy_for_user(&self, wallet: &str) -> WhisperResult<DeploymentReceipt> {
        let owner = WalletAddress::parse(wallet)?;
        let chain_id = derive_chain_id(&owner);
        let provisioner = self
            .provisioner
            .as_ref()
            .ok_or_else(|| WhisperError::configuration("no rollup provisioner configured"))?;

        let rollup = provisioner
            .provision(&owner, chain_id)
            .await
            .map_err(|e| {
                warn!(message = "Rollup provisioning failed", owner = %owner, error = %e);
                WhisperError::Provisioning(format!("{e:#}"))
            })?;

        self.ledger
            .append_deployment(NewDeployment {
                owner,
                chain_id,
                tx_hash: rollup.tx_hash,
                core_contracts: rollup.core_contracts.clone(),
                created_at: Utc::now(),
            })
            .await
            .map_err(WhisperError::ledger)?;

        info!(
            message = "Rollup deployed",
            owner = %owner,
            chain_id = %chain_id,
            tx_hash = %rollup.tx_hash
        );

        Ok(DeploymentReceipt {
            chain_id,
            core_contracts: rollup.core_contracts,
            tx_hash: rollup.tx_hash,
        })
    }

    pub async fn status(&self, wallet: &str) -> WhisperResult<DeploymentStatus> {
        let wallet = WalletAddress::parse(wallet)?;
        let Some(user) = self
            .ledger
            .find_user(&wallet)
            .await
            .map_err(WhisperError::ledger)?
        else {
            return Ok(DeploymentStatus::missing("User not found"));
        };

        let deployment = self
            .ledger
            .latest_deployment_for_user(user.id)
            .await
            .map_err(WhisperError::ledger)?;
        Ok(match deployment {
            Some(deployment) => DeploymentStatus {
                message: "Deployment found".to_string(),
                rollup_exists: true,
                chain_id: Some(deployment.chain_id),
            },
            None => DeploymentStatus::missing("No deployment found for this user"),
        })
    }

    /// Seals `items` under the user's key and queues them for the next settlement.
    pub async fn queue_payment(
        &self,
        wallet: &str,
        items: Vec<PaymentItem>,
    ) -> WhisperResult<QueuedPayment> {
        let wallet = WalletAddress::parse(wallet)?;
        if items.is_empty() {
            return Err(WhisperError::validation("items are required"));
        }
        let items = items
            .iter()
            .enumerate()
            .map(|(i, item)| validate_item(i, item))
            .collect::<WhisperResult<Vec<_>>>()?;

        let user = self
            .ledger
            .upsert_user(&wallet)
            .await
            .map_err(WhisperError::ledger)?;
        let key = self
            .ledger
            .get_or_create_secret(user.id, self.sealer.generate_key())
            .await
            .map_err(WhisperError::ledger)?;

        let plaintext = serde_json::to_vec(&items)
            .map_err(|e| WhisperError::Ledger(format!("payload encoding failed: {e}")))?;
        let sealed = self
            .sealer
            .seal(&key, &plaintext)
            .map_err(|e| WhisperError::Ledger(format!("payload sealing failed: {e:#}")))?;
        let encrypted_message = sealed.compact();

        self.ledger
            .save_sealed_payload(user.id, sealed)
            .await
            .map_err(WhisperError::ledger)?;
        self.ledger
            .create_pending_settlement(user.id, items)
            .await
            .map_err(WhisperError::ledger)?;

        info!(message = "Payment queued", wallet = %wallet);

        Ok(QueuedPayment {
            message: "Encrypted successfully".to_string(),
            chain_id: derive_chain_id(&wallet),
            encrypted_message,
        })
    }
}

fn validate_item(index: usize, item: &PaymentItem) -> WhisperResult<TransferItem> {
    let recipient = WalletAddress::parse(&item.recipient).map_err(|_| {
        WhisperError::validation(format!("items[{index}].recipient must be a valid address"))
    })?;
    let amount = parse_eth_amount(&item.amount).ok().filter(|wei| *wei > U256::ZERO);
    if amount.is_none() {
        return Err(WhisperError::validation(format!(
            "items[{index}].amount must be a positive ETH amount"
        )));
    }
    Ok(TransferItem {
        recipient: recipient.address(),
        amount: item.amount.trim().to_string(),
    })
}
