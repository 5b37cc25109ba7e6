pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use traits::{CorrelationStore, DequeueOrder, FailureLog, Ledger};
