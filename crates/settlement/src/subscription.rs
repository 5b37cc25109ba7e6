use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types::{Filter, Log};
use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use whisperpay_core::{SupportedChains, WhisperResult};

use crate::dealer::{funds_arrived_filter, job_created_filter};
use crate::orchestrator::SettlementOrchestrator;

const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

/// Batches of logs in the order the node delivered them.
pub type LogStream = Pin<Box<dyn Stream<Item = Vec<Log>> + Send>>;

/// An installed log filter and the batches it yields. The stream ends when the filter is lost.
pub struct LogWatch {
    pub filter_id: U256,
    pub logs: LogStream,
}

impl std::fmt::Debug for LogWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWatch")
            .field("filter_id", &self.filter_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn watch(&self, filter: &Filter) -> anyhow::Result<LogWatch>;

    /// Removes a filter installed by [`LogSource::watch`].
    async fn unwatch(&self, filter_id: U256) -> anyhow::Result<()>;
}

/// Polls an installed `eth_newFilter` at a fixed interval.
#[derive(Clone)]
pub struct PollingLogSource {
    provider: DynProvider,
    poll_interval: Duration,
}

impl std::fmt::Debug for PollingLogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingLogSource")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PollingLogSource {
    pub const fn new(provider: DynProvider, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
        }
    }
}

#[async_trait]
impl LogSource for PollingLogSource {
    async fn watch(&self, filter: &Filter) -> anyhow::Result<LogWatch> {
        let filter_id = self.provider.new_filter(filter).await?;
        let poll_interval = self.poll_interval;

        // A failed poll usually means the node dropped the filter, so the stream ends there.
        let logs = futures_util::stream::unfold(self.provider.clone(), move |provider| async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                match provider.get_filter_changes::<Log>(filter_id).await {
                    Ok(logs) if logs.is_empty() => continue,
                    Ok(logs) => return Some((logs, provider)),
                    Err(e) => {
                        warn!(
                            message = "Polling event filter failed",
                            filter_id = %filter_id,
                            error = %e
                        );
                        return None;
                    }
                }
            }
        });

        Ok(LogWatch {
            filter_id,
            logs: Box::pin(logs),
        })
    }

    async fn unwatch(&self, filter_id: U256) -> anyhow::Result<()> {
        let removed = self.provider.uninstall_filter(filter_id).await?;
        debug!(message = "Event filter uninstalled", filter_id = %filter_id, removed);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    JobCreated,
    FundsArrived,
}

impl EventKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::JobCreated => "job_created",
            Self::FundsArrived => "funds_arrived",
        }
    }
}

/// Delay between attempts to (re)install a filter.
pub fn resubscribe_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(MAX_RESUBSCRIBE_DELAY)
        .without_max_times()
}

/// The two dealer-event watchers, started together and stopped together.
///
/// Each watcher runs in its own task, so a slow handler on one never delays the other. A watcher
/// keeps re-installing its filter, with backoff, until shutdown.
#[derive(Debug)]
pub struct SubscriptionSet {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SubscriptionSet {
    /// Resolves the parent chain and starts both watchers on the orchestrator's dealer.
    ///
    /// Fails without starting anything when the parent chain is not supported.
    pub async fn start(
        orchestrator: Arc<SettlementOrchestrator>,
        source: Arc<dyn LogSource>,
        chains: &SupportedChains,
    ) -> WhisperResult<Self> {
        Self::start_with_backoff(orchestrator, source, chains, resubscribe_backoff()).await
    }

    pub async fn start_with_backoff(
        orchestrator: Arc<SettlementOrchestrator>,
        source: Arc<dyn LogSource>,
        chains: &SupportedChains,
        backoff: ExponentialBuilder,
    ) -> WhisperResult<Self> {
        let parent = chains.resolve_live(orchestrator.client()).await?;
        info!(
            message = "Starting dealer event watchers",
            parent_chain = %parent.name,
            dealer = %orchestrator.dealer()
        );

        let (shutdown, _) = watch::channel(false);
        let tasks = [
            (EventKind::JobCreated, job_created_filter(orchestrator.dealer())),
            (EventKind::FundsArrived, funds_arrived_filter(orchestrator.dealer())),
        ]
        .into_iter()
        .map(|(kind, filter)| {
            let watcher = Watcher {
                kind,
                filter,
                source: source.clone(),
                orchestrator: orchestrator.clone(),
                backoff,
            };
            (kind.as_str(), tokio::spawn(watcher.run(shutdown.subscribe())))
        })
        .collect();

        Ok(Self { shutdown, tasks })
    }

    /// Names of the watchers whose task is still alive.
    pub fn running(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Signals both watchers and waits for them to uninstall their filters.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(message = "Event watcher ended abnormally", event = name, error = %e);
            }
        }
        info!(message = "Dealer event watchers stopped");
    }
}

struct Watcher {
    kind: EventKind,
    filter: Filter,
    source: Arc<dyn LogSource>,
    orchestrator: Arc<SettlementOrchestrator>,
    backoff: ExponentialBuilder,
}

impl Watcher {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let event = self.kind.as_str();
        info!(message = "Event watcher started", event);

        let mut delays = self.backoff.build();
        loop {
            let installed = tokio::select! {
                _ = shutdown.changed() => break,
                installed = self.source.watch(&self.filter) => installed,
            };
            match installed {
                Ok(watch) => {
                    let filter_id = watch.filter_id;
                    info!(message = "Event filter installed", event, filter_id = %filter_id);
                    let (delivered, stopped) = self.consume(watch.logs, &mut shutdown).await;
                    if let Err(e) = self.source.unwatch(filter_id).await {
                        warn!(
                            message = "Failed to uninstall event filter",
                            event,
                            filter_id = %filter_id,
                            error = %e
                        );
                    }
                    if stopped {
                        break;
                    }
                    if delivered {
                        delays = self.backoff.build();
                    }
                    warn!(message = "Event stream ended", event);
                }
                Err(e) => warn!(message = "Failed to install event filter", event, error = %e),
            }

            let delay = delays.next().unwrap_or(MAX_RESUBSCRIBE_DELAY);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(message = "Event watcher stopped", event);
    }

    /// Hands batches to the orchestrator until the stream ends or shutdown is signalled.
    ///
    /// Returns whether any batch arrived and whether shutdown stopped it.
    async fn consume(
        &self,
        mut logs: LogStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (bool, bool) {
        let mut delivered = false;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return (delivered, true),
                batch = logs.next() => {
                    let Some(batch) = batch else {
                        return (delivered, false);
                    };
                    delivered = true;
                    match self.kind {
                        EventKind::JobCreated => {
                            self.orchestrator.handle_job_created_logs(batch).await
                        }
                        EventKind::FundsArrived => {
                            self.orchestrator.handle_funds_arrived_logs(batch).await
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dealer::IDealer;
    use crate::queue::{CorrelationQueue, InMemoryCorrelationQueue};
    use alloy_primitives::{Address, B256};
    use alloy_sol_types::SolEvent;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Mutex, mpsc};
    use whisperpay_core::WhisperError;
    use whisperpay_core::test_utils::MockChainClient;
    use whisperpay_datastore::{DequeueOrder, InMemoryLedger};

    const DEALER: Address = Address::repeat_byte(0xde);

    fn fast_backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .without_max_times()
    }

    /// Hands out one channel-backed stream per event signature.
    #[derive(Default)]
    struct ChannelLogSource {
        streams: Mutex<HashMap<B256, mpsc::UnboundedReceiver<Vec<Log>>>>,
        installed: AtomicUsize,
        rejected: AtomicUsize,
        uninstalled: Mutex<Vec<U256>>,
    }

    impl ChannelLogSource {
        async fn feed(&self, signature: B256) -> mpsc::UnboundedSender<Vec<Log>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams.lock().await.insert(signature, rx);
            tx
        }
    }

    #[async_trait]
    impl LogSource for ChannelLogSource {
        async fn watch(&self, filter: &Filter) -> anyhow::Result<LogWatch> {
            let mut streams = self.streams.lock().await;
            let signature = streams
                .keys()
                .copied()
                .find(|signature| filter.topics[0].matches(signature));
            let Some(receiver) = signature.and_then(|signature| streams.remove(&signature)) else {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("eth_newFilter not supported");
            };
            let filter_id = U256::from(self.installed.fetch_add(1, Ordering::SeqCst) + 1);
            Ok(LogWatch {
                filter_id,
                logs: Box::pin(futures_util::stream::unfold(
                    receiver,
                    |mut receiver| async move {
                        receiver.recv().await.map(|batch| (batch, receiver))
                    },
                )),
            })
        }

        async fn unwatch(&self, filter_id: U256) -> anyhow::Result<()> {
            self.uninstalled.lock().await.push(filter_id);
            Ok(())
        }
    }

    /// Installs every filter, but each stream ends right away.
    #[derive(Default)]
    struct EndingLogSource {
        installed: AtomicUsize,
        uninstalled: AtomicUsize,
    }

    #[async_trait]
    impl LogSource for EndingLogSource {
        async fn watch(&self, _filter: &Filter) -> anyhow::Result<LogWatch> {
            let id = self.installed.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(LogWatch {
                filter_id: U256::from(id),
                logs: Box::pin(futures_util::stream::empty()),
            })
        }

        async fn unwatch(&self, _filter_id: U256) -> anyhow::Result<()> {
            self.uninstalled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job_created(creator: Address) -> Log {
        let event = IDealer::L3Interaction {
            _backendDigest: B256::ZERO,
            _jobDigest: B256::ZERO,
            _chainId: U256::from(1u64),
            _jobCreator: creator,
        };
        Log {
            inner: alloy_primitives::Log {
                address: DEALER,
                data: event.encode_log_data(),
            },
            ..Default::default()
        }
    }

    fn orchestrator(
        mock: MockChainClient,
    ) -> (Arc<SettlementOrchestrator>, Arc<InMemoryCorrelationQueue>) {
        let queue = Arc::new(InMemoryCorrelationQueue::new(DequeueOrder::Fifo));
        let orchestrator = SettlementOrchestrator::new(
            Arc::new(mock),
            Arc::new(InMemoryLedger::new()),
            queue.clone(),
            DEALER,
        );
        (Arc::new(orchestrator), queue)
    }

    async fn wait_for(counter: &AtomicUsize, at_least: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn unsupported_parent_chain_starts_nothing() {
        let (orchestrator, _) = orchestrator(MockChainClient::new().with_chain_id(10));
        let source = Arc::new(ChannelLogSource::default());
        let err = SubscriptionSet::start(orchestrator, source, &SupportedChains::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WhisperError::UnsupportedChain(10)));
    }

    #[tokio::test]
    async fn watcher_that_cannot_install_keeps_retrying() {
        let (orchestrator, _) = orchestrator(MockChainClient::new());
        let source = Arc::new(ChannelLogSource::default());
        let _funds = source
            .feed(IDealer::FundsTransferredToMediator::SIGNATURE_HASH)
            .await;

        let set = SubscriptionSet::start_with_backoff(
            orchestrator,
            source.clone(),
            &SupportedChains::default(),
            fast_backoff(),
        )
        .await
        .unwrap();

        wait_for(&source.rejected, 3).await;
        assert!(source.rejected.load(Ordering::SeqCst) >= 3);
        assert_eq!(source.installed.load(Ordering::SeqCst), 1);
        assert_eq!(set.running(), vec!["job_created", "funds_arrived"]);

        set.shutdown().await;
        assert_eq!(*source.uninstalled.lock().await, vec![U256::from(1u64)]);
    }

    #[tokio::test]
    async fn ended_streams_are_reinstalled() {
        let (orchestrator, _) = orchestrator(MockChainClient::new());
        let source = Arc::new(EndingLogSource::default());

        let set = SubscriptionSet::start_with_backoff(
            orchestrator,
            source.clone(),
            &SupportedChains::default(),
            fast_backoff(),
        )
        .await
        .unwrap();

        wait_for(&source.installed, 6).await;
        assert!(source.installed.load(Ordering::SeqCst) >= 6);
        assert_eq!(set.running(), vec!["job_created", "funds_arrived"]);

        set.shutdown().await;
        // Every filter that was installed was also removed.
        assert_eq!(
            source.uninstalled.load(Ordering::SeqCst),
            source.installed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn running_skips_finished_watchers() {
        let (shutdown, _) = watch::channel(false);
        let done = tokio::spawn(async {});
        let busy = tokio::spawn(std::future::pending::<()>());
        while !done.is_finished() {
            tokio::task::yield_now().await;
        }

        let set = SubscriptionSet {
            shutdown,
            tasks: vec![("job_created", done), ("funds_arrived", busy)],
        };
        assert_eq!(set.running(), vec!["funds_arrived"]);
        for (_, handle) in &set.tasks {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn delivered_batches_reach_the_orchestrator() {
        let mock = MockChainClient::new();
        let (orchestrator, queue) = orchestrator(mock.clone());
        let source = Arc::new(ChannelLogSource::default());
        let jobs = source.feed(IDealer::L3Interaction::SIGNATURE_HASH).await;
        let _funds = source
            .feed(IDealer::FundsTransferredToMediator::SIGNATURE_HASH)
            .await;

        jobs.send(vec![
            job_created(Address::repeat_byte(1)),
            job_created(Address::repeat_byte(2)),
        ])
        .unwrap();

        let set = SubscriptionSet::start(orchestrator, source.clone(), &SupportedChains::default())
            .await
            .unwrap();
        assert_eq!(set.running(), vec!["job_created", "funds_arrived"]);

        for _ in 0..100 {
            if queue.depth().await.unwrap() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.depth().await.unwrap(), 2);
        assert_eq!(mock.sent().len(), 2);

        set.shutdown().await;
        let mut uninstalled = source.uninstalled.lock().await.clone();
        uninstalled.sort();
        assert_eq!(uninstalled, vec![U256::from(1u64), U256::from(2u64)]);
    }
}
