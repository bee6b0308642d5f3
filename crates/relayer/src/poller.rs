//! Block range scanner delivering contract events to their routes.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use futures::future::try_join_all;
use parking_lot::Mutex;
use pn_config::{PollerConfig, RpcConfig};
use pn_rpc_client::ChainClient;
use pn_store::checkpoint::CheckpointStore;
use pn_types::event::{ContractEvent, EventKey, Ledger, RawEvent};
use pn_utils::exponential_backoff::ExponentialBackoff;
use tokio::{
    sync::{
        oneshot::{self, error::TryRecvError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{info_span, instrument, Instrument};

use crate::router::{EventHandler, WatchItem};

type Routed = (ContractEvent, Arc<dyn EventHandler>, (u64, u64));

/// Cooperative stop flag that also wakes sleeping loops.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub struct StopHandle {
    tx: watch::Sender<bool>,
}

pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopHandle {
    pub fn stop(&self) {
        // receivers may be gone already
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` or until stopped, whichever comes first.
    pub async fn sleep(&mut self, duration: Duration) {
        if self.is_stopped() {
            return;
        }
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {}
            changed = self.rx.changed() => {
                // a dropped handle never stops us, finish the sleep
                if changed.is_err() {
                    sleep.await;
                }
            }
        }
    }
}

/// Handlers spawned by pollers. Shutdown waits for them, nothing aborts them.
#[derive(Default)]
pub struct HandlerTracker {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HandlerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn in_flight(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    pub async fn wait_all(&self) {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    log::error!("event handler task failed: {}", err);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Nothing new, or the head read lags the checkpoint.
    Idle,
    /// Scanned a chunk and the head is still ahead.
    Behind,
    /// Scanned up to the head.
    CaughtUp,
}

pub struct ChainPoller {
    ledger: Ledger,
    client: Arc<dyn ChainClient>,
    watch_items: Vec<WatchItem>,
    checkpoints: Arc<dyn CheckpointStore>,
    tracker: Arc<HandlerTracker>,
    config: PollerConfig,
    backoff: ExponentialBackoff,
    /// Latest head read, shared with readers that need the chain height.
    observed_head: Arc<AtomicU64>,
    /// First block not yet scanned; resolved on the first tick.
    next_block: Option<u64>,
    /// Completion of the latest handler task of each key. The next task of a
    /// key waits on it.
    tails: HashMap<EventKey, oneshot::Receiver<()>>,
}

impl ChainPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Ledger,
        client: Arc<dyn ChainClient>,
        watch_items: Vec<WatchItem>,
        checkpoints: Arc<dyn CheckpointStore>,
        tracker: Arc<HandlerTracker>,
        config: PollerConfig,
        rpc_config: &RpcConfig,
        observed_head: Arc<AtomicU64>,
    ) -> Self {
        let backoff =
            ExponentialBackoff::new(rpc_config.backoff_base()).with_max_sleep(rpc_config.backoff_max());
        ChainPoller {
            ledger,
            client,
            watch_items,
            checkpoints,
            tracker,
            config,
            backoff,
            observed_head,
            next_block: None,
            tails: HashMap::new(),
        }
    }

    /// Scan from `from_block` instead of the persisted checkpoint.
    pub fn with_start_block(mut self, from_block: Option<u64>) -> Self {
        if from_block.is_some() {
            self.next_block = from_block;
        }
        self
    }

    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    fn resolve_start(&self, head: u64) -> Result<u64> {
        if let Some(checkpoint) = self.checkpoints.load(self.ledger)? {
            return Ok(checkpoint.saturating_add(1));
        }
        let start = head.saturating_sub(self.config.catch_up_margin);
        log::warn!(
            "[{}] no checkpoint found, start from block {} ({} behind head)",
            self.ledger,
            start,
            self.config.catch_up_margin
        );
        Ok(start)
    }

    pub async fn run(mut self, mut stop: StopSignal) {
        log::info!("[{}] poller started", self.ledger);
        loop {
            if stop.is_stopped() {
                break;
            }

            let tick_span = info_span!("poller_tick", ledger = %self.ledger);
            match self.tick().instrument(tick_span).await {
                Ok(TickStatus::Behind) => {
                    self.backoff.reset();
                }
                Ok(TickStatus::Idle | TickStatus::CaughtUp) => {
                    self.backoff.reset();
                    stop.sleep(self.config.poll_interval()).await;
                }
                Err(err) => {
                    let backoff_sleep = self.backoff.next_sleep();
                    log::error!(
                        "[{}] polling error, will retry in {}ms: {:#}",
                        self.ledger,
                        backoff_sleep.as_millis(),
                        err
                    );
                    stop.sleep(backoff_sleep).await;
                }
            }
        }
        log::info!("[{}] poller stopped", self.ledger);
    }

    /// Scan at most one chunk. Events of the chunk are all fetched before any
    /// is dispatched, and the checkpoint only moves after dispatch.
    pub async fn tick(&mut self) -> Result<TickStatus> {
        let head = self
            .client
            .current_block_number()
            .await
            .context("read head")?;
        self.observed_head.fetch_max(head, Ordering::SeqCst);

        let from = match self.next_block {
            Some(block) => block,
            None => {
                let start = self.resolve_start(head)?;
                self.next_block = Some(start);
                start
            }
        };
        if from > head {
            log::debug!("[{}] head {} not beyond block {}", self.ledger, head, from);
            return Ok(TickStatus::Idle);
        }
        let to = head.min(from.saturating_add(self.config.chunk_size.max(1) - 1));

        let events = self.fetch_events(from, to).await?;
        let dispatched = self.dispatch(events);

        self.next_block = Some(to.saturating_add(1));
        self.save_checkpoint(to).await;
        log::debug!(
            "[{}] scanned blocks {}..={}, dispatched {} events",
            self.ledger,
            from,
            to,
            dispatched
        );

        if to < head {
            Ok(TickStatus::Behind)
        } else {
            Ok(TickStatus::CaughtUp)
        }
    }

    async fn save_checkpoint(&self, block_number: u64) {
        let checkpoints = Arc::clone(&self.checkpoints);
        let ledger = self.ledger;
        match tokio::task::spawn_blocking(move || checkpoints.save(ledger, block_number)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!("[{}] {:#}", ledger, err),
            Err(err) => log::error!("[{}] checkpoint task failed: {}", ledger, err),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<(usize, RawEvent)>> {
        let client = &self.client;
        let queries = self.watch_items.iter().enumerate().flat_map(move |(index, item)| {
            item.routes().map(move |(kind, route)| async move {
                let events = client
                    .get_past_events(item.contract(), kind.name(), &route.filter, from, to)
                    .await
                    .with_context(|| format!("get {} events", kind))?;
                Ok::<_, anyhow::Error>(events.into_iter().map(move |e| (index, e)))
            })
        });
        let mut events: Vec<(usize, RawEvent)> =
            try_join_all(queries).await?.into_iter().flatten().collect();
        events.sort_by_key(|(_, e)| e.position());
        Ok(events)
    }

    /// Spawn one handler task per event key. A task handles its events in
    /// chain order, after every earlier task of the same key.
    fn dispatch(&mut self, events: Vec<(usize, RawEvent)>) -> usize {
        let mut groups: HashMap<EventKey, Vec<Routed>> = HashMap::new();
        let mut dispatched = 0;
        for (index, raw) in events {
            match self.watch_items[index].route(&raw) {
                Ok(Some((event, handler))) => {
                    groups
                        .entry(event.key())
                        .or_default()
                        .push((event, handler, raw.position()));
                    dispatched += 1;
                }
                Ok(None) => {}
                Err(err) => log::error!("[{}] {:#}", self.ledger, err),
            }
        }

        self.tails
            .retain(|_, done| matches!(done.try_recv(), Err(TryRecvError::Empty)));
        for (key, batch) in groups {
            let (done_tx, done_rx) = oneshot::channel::<()>();
            let previous = self.tails.insert(key, done_rx);
            let ledger = self.ledger;
            self.tracker.spawn(async move {
                if let Some(previous) = previous {
                    // closed once the earlier task ends, panicked or not
                    let _ = previous.await;
                }
                for (event, handler, position) in batch {
                    let kind = event.kind();
                    if let Err(err) = handler.handle(event).await {
                        log::error!(
                            "[{}] handle {} at {:?} failed: {:#}",
                            ledger,
                            kind,
                            position,
                            err
                        );
                    }
                }
                drop(done_tx);
            });
        }
        dispatched
    }
}
