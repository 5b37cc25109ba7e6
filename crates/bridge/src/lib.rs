//! Parent-chain to rollup bridging through retryable tickets.
pub mod fees;
pub mod inbox;
pub mod metrics;
pub mod service;

pub use fees::{FeeQuote, quote, quote_live};
pub use inbox::{IInbox, TicketSubmitter, build_ticket};
pub use service::{BridgeReceipt, BridgeRequest, BridgeService};
