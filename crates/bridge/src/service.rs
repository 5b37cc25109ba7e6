use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use whisperpay_core::{
    ChainClient, DerivedChainId, SupportedChains, WalletAddress, WhisperError, WhisperResult,
    parse_eth_amount,
};
use whisperpay_datastore::Ledger;

use crate::fees::{FeeQuote, quote_live};
use crate::inbox::TicketSubmitter;
use crate::metrics::BridgeMetrics;

/// The only asset the bridge moves today.
pub const SUPPORTED_TOKEN: &str = "eth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Asset symbol, matched case-insensitively.
    pub token: String,
    /// Decimal ETH string, e.g. `"0.01"`.
    pub amount: String,
    /// Recipient on the rollup.
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReceipt {
    pub submission_status: String,
    /// Chain id of the rollup the ticket targets.
    pub chain_id: DerivedChainId,
    pub inbox: Address,
    pub tx_hash: TxHash,
    pub quote: FeeQuote,
}

/// Moves ETH from the parent chain into the latest deployed rollup.
pub struct BridgeService {
    ledger: Arc<dyn Ledger>,
    client: Option<Arc<dyn ChainClient>>,
    chains: SupportedChains,
    metrics: BridgeMetrics,
}

impl std::fmt::Debug for BridgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("configured", &self.client.is_some())
            .field("chains", &self.chains)
            .finish_non_exhaustive()
    }
}

impl BridgeService {
    /// `client` is `None` when no RPC endpoint or operator key is configured; every bridge call
    /// then fails with a configuration error after input validation.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        client: Option<Arc<dyn ChainClient>>,
        chains: SupportedChains,
    ) -> Self {
        Self {
            ledger,
            client,
            chains,
            metrics: BridgeMetrics::default(),
        }
    }

    pub async fn bridge(&self, request: BridgeRequest) -> WhisperResult<BridgeReceipt> {
        self.metrics.requests.increment(1);
        let result = self.bridge_inner(request).await;
        if let Err(e) = &result {
            if matches!(e, WhisperError::Submission(_)) {
                self.metrics.ticket_failures.increment(1);
            } else {
                self.metrics.rejected.increment(1);
            }
            warn!(message = "Bridge request failed", error = %e);
        }
        result
    }

    async fn bridge_inner(&self, request: BridgeRequest) -> WhisperResult<BridgeReceipt> {
        if !request.token.trim().eq_ignore_ascii_case(SUPPORTED_TOKEN) {
            return Err(WhisperError::validation("Only ETH supported currently"));
        }
        if request.amount.trim().is_empty() {
            return Err(WhisperError::validation("amount is required"));
        }
        let recipient = WalletAddress::parse(&request.to)
            .map_err(|_| WhisperError::validation("to must be a valid address"))?;
        let amount = parse_eth_amount(&request.amount)?;

        let deployment = self
            .ledger
            .latest_deployment()
            .await
            .map_err(WhisperError::ledger)?
            .ok_or_else(|| WhisperError::validation("No L3 deployment found"))?;
        let inbox = deployment
            .core_contracts
            .inbox()
            .ok_or_else(|| WhisperError::validation("Inbox address not found"))?;

        let client = self
            .client
            .clone()
            .ok_or_else(|| WhisperError::configuration("Missing RPC or private key"))?;
        let parent = self.chains.resolve_live(client.as_ref()).await?;

        let start = Instant::now();
        let fees = quote_live(client.as_ref(), amount, 0).await?;
        self.metrics.quote_duration.record(start.elapsed().as_secs_f64());

        let start = Instant::now();
        let tx_hash = TicketSubmitter::new(client)
            .submit(inbox, recipient.address(), &fees)
            .await
            .map_err(WhisperError::submission)?;
        self.metrics.submit_duration.record(start.elapsed().as_secs_f64());
        self.metrics.tickets_submitted.increment(1);

        info!(
            message = "Bridged to rollup",
            parent_chain = %parent.name,
            rollup_chain_id = %deployment.chain_id,
            recipient = %recipient,
            tx_hash = %tx_hash
        );

        Ok(BridgeReceipt {
            submission_status: "submitted".to_string(),
            chain_id: deployment.chain_id,
            inbox,
            tx_hash,
            quote: fees,
        })
    }
}
