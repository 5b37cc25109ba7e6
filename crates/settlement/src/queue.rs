use std::collections::VecDeque;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use whisperpay_datastore::{CorrelationStore, DequeueOrder};

/// Carries job creators from the "job created" event to the matching "funds arrived" event.
///
/// The dequeue order is fixed per instance.
#[async_trait]
pub trait CorrelationQueue: Send + Sync {
    fn order(&self) -> DequeueOrder;

    async fn enqueue(&self, creator: Address) -> Result<()>;

    /// Removes and returns the next creator. `None` leaves the queue untouched.
    async fn dequeue(&self) -> Result<Option<Address>>;

    async fn depth(&self) -> Result<usize>;
}

/// Process-local queue. Entries are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCorrelationQueue {
    order: DequeueOrder,
    entries: Mutex<VecDeque<Address>>,
}

impl InMemoryCorrelationQueue {
    pub fn new(order: DequeueOrder) -> Self {
        Self {
            order,
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl CorrelationQueue for InMemoryCorrelationQueue {
    fn order(&self) -> DequeueOrder {
        self.order
    }

    async fn enqueue(&self, creator: Address) -> Result<()> {
        self.entries.lock().await.push_back(creator);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Address>> {
        let mut entries = self.entries.lock().await;
        Ok(match self.order {
            DequeueOrder::Fifo => entries.pop_front(),
            DequeueOrder::Lifo => entries.pop_back(),
        })
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

/// Queue persisted in the ledger's awaiting-funds table, so in-flight settlements survive a
/// restart.
pub struct LedgerCorrelationQueue {
    order: DequeueOrder,
    store: Arc<dyn CorrelationStore>,
}

impl std::fmt::Debug for LedgerCorrelationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerCorrelationQueue")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl LedgerCorrelationQueue {
    pub fn new(store: Arc<dyn CorrelationStore>, order: DequeueOrder) -> Self {
        Self { order, store }
    }
}

#[async_trait]
impl CorrelationQueue for LedgerCorrelationQueue {
    fn order(&self) -> DequeueOrder {
        self.order
    }

    async fn enqueue(&self, creator: Address) -> Result<()> {
        self.store.push_awaiting(creator).await
    }

    async fn dequeue(&self) -> Result<Option<Address>> {
        self.store.take_awaiting(self.order).await
    }

    async fn depth(&self) -> Result<usize> {
        self.store.awaiting_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisperpay_datastore::InMemoryLedger;

    fn creator(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    async fn drain(queue: &dyn CorrelationQueue) -> Vec<Address> {
        let mut out = Vec::new();
        while let Some(next) = queue.dequeue().await.unwrap() {
            out.push(next);
        }
        out
    }

    async fn fill(queue: &dyn CorrelationQueue) {
        for byte in 1..=3 {
            queue.enqueue(creator(byte)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn fifo_settles_oldest_first() {
        let memory = InMemoryCorrelationQueue::new(DequeueOrder::Fifo);
        let ledger =
            LedgerCorrelationQueue::new(Arc::new(InMemoryLedger::new()), DequeueOrder::Fifo);
        for queue in [&memory as &dyn CorrelationQueue, &ledger] {
            fill(queue).await;
            assert_eq!(queue.depth().await.unwrap(), 3);
            assert_eq!(drain(queue).await, vec![creator(1), creator(2), creator(3)]);
        }
    }

    #[tokio::test]
    async fn lifo_settles_newest_first() {
        let memory = InMemoryCorrelationQueue::new(DequeueOrder::Lifo);
        let ledger =
            LedgerCorrelationQueue::new(Arc::new(InMemoryLedger::new()), DequeueOrder::Lifo);
        for queue in [&memory as &dyn CorrelationQueue, &ledger] {
            fill(queue).await;
            assert_eq!(drain(queue).await, vec![creator(3), creator(2), creator(1)]);
        }
    }

    #[tokio::test]
    async fn single_entry_comes_back_and_empty_is_none() {
        let queue = InMemoryCorrelationQueue::default();
        assert_eq!(queue.order(), DequeueOrder::Fifo);
        assert_eq!(queue.dequeue().await.unwrap(), None);
        assert_eq!(queue.depth().await.unwrap(), 0);

        queue.enqueue(creator(9)).await.unwrap();
        assert_eq!(queue.dequeue().await.unwrap(), Some(creator(9)));
        assert_eq!(queue.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn ledger_queue_shares_state_with_its_store() {
        let store = Arc::new(InMemoryLedger::new());
        let first = LedgerCorrelationQueue::new(store.clone(), DequeueOrder::Fifo);
        first.enqueue(creator(5)).await.unwrap();

        // A queue rebuilt over the same store, as after a restart.
        let second = LedgerCorrelationQueue::new(store, DequeueOrder::Fifo);
        assert_eq!(second.dequeue().await.unwrap(), Some(creator(5)));
    }
}
