use std::sync::{atomic::AtomicU64, Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pn_config::{PollerConfig, RpcConfig};
use pn_relayer::{
    poller::{ChainPoller, HandlerTracker, TickStatus},
    router::{EventHandler, WatchItem},
};
use pn_rpc_client::ChainClient;
use pn_store::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use pn_types::{
    callback::DomainEvent,
    event::{ContractEvent, EventFilter, EventKind, Ledger},
    payload::Signature,
    Address, H256, U256,
};

use crate::testing_tool::{
    chain::MockChain,
    common::{app_contract, primary_contract, setup, token, user, TestEnv},
};

fn poller(
    ledger: Ledger,
    client: &Arc<MockChain>,
    watch_item: WatchItem,
    checkpoints: Arc<dyn CheckpointStore>,
    tracker: &Arc<HandlerTracker>,
    chunk_size: u64,
) -> ChainPoller {
    let config = PollerConfig {
        poll_interval_ms: 10,
        catch_up_margin: 10,
        chunk_size,
    };
    ChainPoller::new(
        ledger,
        Arc::clone(client) as Arc<dyn ChainClient>,
        vec![watch_item],
        checkpoints,
        Arc::clone(tracker),
        config,
        &RpcConfig::default(),
        Arc::new(AtomicU64::new(0)),
    )
}

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<EventKind>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: ContractEvent) -> Result<()> {
        let kind = event.kind();
        self.seen.lock().push(kind);
        if kind == EventKind::ChannelClosed {
            bail!("handler failure");
        }
        Ok(())
    }
}

fn recording_item(handler: &Arc<RecordingHandler>) -> WatchItem {
    let mut item = WatchItem::new(primary_contract());
    item.register(
        EventKind::ChannelClosed,
        EventFilter::new(),
        Arc::clone(handler) as Arc<dyn EventHandler>,
    )
    .register(
        EventKind::ProviderNewDeposit,
        EventFilter::new(),
        Arc::clone(handler) as Arc<dyn EventHandler>,
    );
    item
}

fn channel_closed(block: u8) -> ContractEvent {
    ContractEvent::ChannelClosed {
        channel_id: H256::repeat_byte(block),
        closer: user(),
        balance: U256::zero(),
        nonce: 0,
    }
}

fn provider_deposit(amount: u64) -> ContractEvent {
    ContractEvent::ProviderNewDeposit {
        token: token(),
        amount: amount.into(),
    }
}

fn transfer_to_provider(env: &TestEnv, nonce: u64) -> ContractEvent {
    ContractEvent::Transfer {
        from: user(),
        to: env.provider(),
        channel_id: env.channel_id(),
        balance: (10 * nonce).into(),
        nonce,
        additional_hash: H256::zero(),
        signature: Signature::zero(),
    }
}

fn delivered_nonces(env: &TestEnv) -> Vec<u64> {
    env.events()
        .iter()
        .filter_map(|e| match e {
            DomainEvent::Transfer { nonce, .. } => Some(*nonce),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channel_events_keep_chain_order() {
    for _ in 0..20 {
        let env = setup(0);
        env.stub_channel(1, U256::zero(), 0);
        for nonce in 1..=4 {
            env.app
                .push_event(app_contract(), &transfer_to_provider(&env, nonce), 3, nonce);
        }
        for nonce in 5..=6 {
            env.app
                .push_event(app_contract(), &transfer_to_provider(&env, nonce), 4, nonce);
        }
        env.app.set_head(4);

        let tracker = Arc::new(HandlerTracker::new());
        let mut poller = poller(
            Ledger::App,
            &env.app,
            env.coordinator().app_watch_item(),
            env.checkpoints.clone(),
            &tracker,
            1,
        )
        .with_start_block(Some(3));
        // the second chunk is dispatched while the first may still run
        assert_eq!(poller.tick().await.unwrap(), TickStatus::Behind);
        assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
        tracker.wait_all().await;

        assert_eq!(delivered_nonces(&env), vec![1, 2, 3, 4, 5, 6]);
        let channel = env
            .coordinator()
            .store()
            .get_channel(&env.channel_id())
            .await
            .unwrap();
        assert_eq!(channel.received.nonce, 6);
    }
}

#[tokio::test]
async fn test_restart_rescans_after_checkpoint() {
    let env = setup(0);
    env.stub_channel(1, U256::zero(), 0);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.json");
    FileCheckpointStore::open(&path)
        .unwrap()
        .save(Ledger::App, 4)
        .unwrap();

    // blocks 5..=6 were dispatched before a crash that left the checkpoint at 4
    let message = ContractEvent::SendMessage {
        session_id: H256::repeat_byte(9),
        from: user(),
        to: env.provider(),
        content: "already handled".to_string(),
    };
    env.app.push_event(app_contract(), &message, 4, 0);
    env.app
        .push_event(app_contract(), &transfer_to_provider(&env, 1), 5, 0);
    env.app
        .push_event(app_contract(), &transfer_to_provider(&env, 2), 6, 0);
    env.app.set_head(6);

    let tracker = Arc::new(HandlerTracker::new());
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::open(&path).unwrap());
    let mut poller = poller(
        Ledger::App,
        &env.app,
        env.coordinator().app_watch_item(),
        checkpoints,
        &tracker,
        100,
    );
    assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
    tracker.wait_all().await;

    assert_eq!(delivered_nonces(&env), vec![1, 2]);
    assert!(!env
        .events()
        .iter()
        .any(|e| matches!(e, DomainEvent::Message { .. })));
    let reopened = FileCheckpointStore::open(&path).unwrap();
    assert_eq!(reopened.load(Ledger::App).unwrap(), Some(6));
}

#[tokio::test]
async fn test_redelivered_range_is_idempotent() {
    let env = setup(0);
    env.stub_channel(1, U256::zero(), 0);
    let transfer = ContractEvent::Transfer {
        from: user(),
        to: env.provider(),
        channel_id: env.channel_id(),
        balance: 30u64.into(),
        nonce: 1,
        additional_hash: H256::zero(),
        signature: Signature::zero(),
    };
    let message = |to: Address| ContractEvent::SendMessage {
        session_id: H256::repeat_byte(9),
        from: user(),
        to,
        content: "hello".to_string(),
    };
    env.app.push_event(app_contract(), &transfer, 3, 0);
    env.app.push_event(app_contract(), &message(env.provider()), 5, 1);
    env.app.push_event(app_contract(), &message(Address::repeat_byte(0xee)), 5, 2);
    env.app.set_head(6);

    let tracker = Arc::new(HandlerTracker::new());
    let checkpoints: Arc<dyn CheckpointStore> = env.checkpoints.clone();
    let mut first = poller(
        Ledger::App,
        &env.app,
        env.coordinator().app_watch_item(),
        Arc::clone(&checkpoints),
        &tracker,
        100,
    );
    assert_eq!(first.tick().await.unwrap(), TickStatus::CaughtUp);
    tracker.wait_all().await;
    assert_eq!(checkpoints.load(Ledger::App).unwrap(), Some(6));

    // a restart that lost the checkpoint scans the same range again
    let mut replay = poller(
        Ledger::App,
        &env.app,
        env.coordinator().app_watch_item(),
        Arc::clone(&checkpoints),
        &tracker,
        100,
    )
    .with_start_block(Some(0));
    assert_eq!(replay.tick().await.unwrap(), TickStatus::CaughtUp);
    tracker.wait_all().await;

    let events = env.events();
    assert_eq!(events.len(), 3, "{:?}", events);
    let transfers = events
        .iter()
        .filter(|e| matches!(e, DomainEvent::Transfer { .. }))
        .count();
    assert_eq!(transfers, 1);
    // messages carry no nonce and are delivered on every scan
    assert!(events.iter().all(|e| match e {
        DomainEvent::Message { to, .. } => *to == env.provider(),
        _ => true,
    }));

    let mut resumed = poller(
        Ledger::App,
        &env.app,
        env.coordinator().app_watch_item(),
        checkpoints,
        &tracker,
        100,
    );
    assert_eq!(resumed.tick().await.unwrap(), TickStatus::Idle);
    assert_eq!(resumed.next_block(), Some(7));
}

#[tokio::test]
async fn test_handler_failure_does_not_stop_the_scan() {
    let chain = Arc::new(MockChain::new());
    chain.push_event(primary_contract(), &channel_closed(1), 1, 0);
    chain.push_event(primary_contract(), &provider_deposit(10), 2, 0);
    chain.set_head(2);

    let handler = Arc::new(RecordingHandler::default());
    let tracker = Arc::new(HandlerTracker::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::default());
    let mut poller = poller(
        Ledger::Primary,
        &chain,
        recording_item(&handler),
        checkpoints.clone(),
        &tracker,
        100,
    );

    assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
    tracker.wait_all().await;

    let mut seen = handler.seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![EventKind::ChannelClosed, EventKind::ProviderNewDeposit]);
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), Some(2));
}

#[tokio::test]
async fn test_stale_head_keeps_checkpoint() {
    let chain = Arc::new(MockChain::new());
    chain.set_head(8);
    let handler = Arc::new(RecordingHandler::default());
    let tracker = Arc::new(HandlerTracker::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::default());
    checkpoints.save(Ledger::Primary, 10).unwrap();

    let mut poller = poller(
        Ledger::Primary,
        &chain,
        recording_item(&handler),
        checkpoints.clone(),
        &tracker,
        100,
    );
    assert_eq!(poller.tick().await.unwrap(), TickStatus::Idle);
    assert_eq!(poller.next_block(), Some(11));
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), Some(10));

    chain.set_head(11);
    assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), Some(11));
}

#[tokio::test]
async fn test_failed_query_does_not_advance() {
    let chain = Arc::new(MockChain::new());
    chain.push_event(primary_contract(), &provider_deposit(10), 4, 0);
    chain.set_head(4);
    chain.fail_event_queries(1);

    let handler = Arc::new(RecordingHandler::default());
    let tracker = Arc::new(HandlerTracker::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::default());
    let mut poller = poller(
        Ledger::Primary,
        &chain,
        recording_item(&handler),
        checkpoints.clone(),
        &tracker,
        100,
    )
    .with_start_block(Some(1));

    assert!(poller.tick().await.is_err());
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), None);
    assert_eq!(poller.next_block(), Some(1));

    assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
    tracker.wait_all().await;
    assert_eq!(*handler.seen.lock(), vec![EventKind::ProviderNewDeposit]);
}

#[tokio::test]
async fn test_scan_is_chunked() {
    let chain = Arc::new(MockChain::new());
    chain.set_head(5);
    let handler = Arc::new(RecordingHandler::default());
    let tracker = Arc::new(HandlerTracker::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::default());
    let mut poller = poller(
        Ledger::Primary,
        &chain,
        recording_item(&handler),
        checkpoints.clone(),
        &tracker,
        2,
    )
    .with_start_block(Some(1));

    assert_eq!(poller.tick().await.unwrap(), TickStatus::Behind);
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), Some(2));
    assert_eq!(poller.tick().await.unwrap(), TickStatus::Behind);
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), Some(4));
    assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
    assert_eq!(checkpoints.load(Ledger::Primary).unwrap(), Some(5));
}

#[tokio::test]
async fn test_missing_checkpoint_starts_near_head() {
    let chain = Arc::new(MockChain::new());
    chain.set_head(100);
    let handler = Arc::new(RecordingHandler::default());
    let tracker = Arc::new(HandlerTracker::new());
    let mut poller = poller(
        Ledger::Primary,
        &chain,
        recording_item(&handler),
        Arc::new(MemoryCheckpointStore::default()),
        &tracker,
        1000,
    );

    assert_eq!(poller.next_block(), None);
    assert_eq!(poller.tick().await.unwrap(), TickStatus::CaughtUp);
    // catch up margin of 10 blocks
    assert_eq!(poller.next_block(), Some(101));
    assert_eq!(poller.tick().await.unwrap(), TickStatus::Idle);
}
