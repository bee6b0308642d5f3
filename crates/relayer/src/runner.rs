use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use pn_config::Config;
use pn_rpc_client::{
    jsonrpc_client::JsonRpcChainClient,
    retry::{RetryClient, RetryPolicy},
    ChainClient,
};
use pn_store::checkpoint::{CheckpointStore, FileCheckpointStore};
use pn_types::{
    callback::CallbackKind,
    channel::{Channel, PaymentNetwork},
    event::Ledger,
    submission::{PendingSubmission, TxOutcome},
    Address, U256,
};
use pn_utils::wallet::Signer;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use crate::{
    callback::Callback,
    coordinator::{ChainContext, Coordinator},
    error::Result as RelayResult,
    poller::{stop_signal, ChainPoller, HandlerTracker, StopHandle, StopSignal},
};

/// Owns the coordinator, both chain pollers and the handler tasks they
/// spawn.
pub struct Relayer {
    config: Config,
    coordinator: Arc<Coordinator>,
    primary: Arc<dyn ChainClient>,
    app: Arc<dyn ChainClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    tracker: Arc<HandlerTracker>,
    stop_handle: StopHandle,
    stop_signal: StopSignal,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl Relayer {
    pub fn init(config: Config) -> Result<Self> {
        let signer = Signer::from_config(&config.wallet).with_context(|| "init wallet")?;
        let policy = RetryPolicy::from_config(&config.rpc);

        let primary = JsonRpcChainClient::with_url(
            "primary",
            &config.primary_chain.rpc_url,
            policy.request_timeout,
        )?;
        let app =
            JsonRpcChainClient::with_url("app", &config.app_chain.rpc_url, policy.request_timeout)?;
        let primary: Arc<dyn ChainClient> =
            Arc::new(RetryClient::new("primary", primary, policy.clone()));
        let app: Arc<dyn ChainClient> = Arc::new(RetryClient::new("app", app, policy));

        let checkpoints = FileCheckpointStore::open(&config.checkpoint.path)
            .with_context(|| "open checkpoint store")?;

        Ok(Self::with_clients(
            config,
            signer,
            primary,
            app,
            Arc::new(checkpoints),
        ))
    }

    pub fn with_clients(
        config: Config,
        signer: Signer,
        primary: Arc<dyn ChainClient>,
        app: Arc<dyn ChainClient>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let coordinator = Coordinator::new(
            signer,
            ChainContext {
                client: Arc::clone(&primary),
                contract: config.primary_chain.contract_address,
            },
            ChainContext {
                client: Arc::clone(&app),
                contract: config.app_chain.contract_address,
            },
            config.primary_chain.token_address,
            config.protocol.clone(),
        );
        let (stop_handle, stop_signal) = stop_signal();
        Relayer {
            config,
            coordinator: Arc::new(coordinator),
            primary,
            app,
            checkpoints,
            tracker: Arc::new(HandlerTracker::new()),
            stop_handle,
            stop_signal,
            pollers: Mutex::new(Vec::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn tracker(&self) -> &Arc<HandlerTracker> {
        &self.tracker
    }

    pub fn register_callback(&self, kind: CallbackKind, callback: Callback) {
        self.coordinator.register_callback(kind, callback);
    }

    pub async fn deposit(&self, amount: U256, token: Address) -> RelayResult<TxOutcome> {
        self.coordinator.deposit(amount, token).await
    }

    pub async fn propose_withdraw(&self, amount: U256, token: Address) -> RelayResult<TxOutcome> {
        self.coordinator.propose_withdraw(amount, token).await
    }

    pub async fn propose_rebalance(
        &self,
        user: Address,
        amount: U256,
        token: Address,
    ) -> RelayResult<TxOutcome> {
        self.coordinator.propose_rebalance(user, amount, token).await
    }

    pub async fn send_asset(&self, to: Address, amount: U256, token: Address) -> RelayResult<TxOutcome> {
        self.coordinator.send_asset(to, amount, token).await
    }

    pub async fn close_channel(&self, user: Address, token: Address) -> RelayResult<TxOutcome> {
        self.coordinator.close_channel(user, token).await
    }

    pub async fn get_payment_network_info(&self, token: Address) -> RelayResult<PaymentNetwork> {
        self.coordinator.get_payment_network_info(token).await
    }

    pub async fn get_channel_info(
        &self,
        user: Address,
        token: Address,
    ) -> RelayResult<Option<Channel>> {
        self.coordinator.get_channel_info(user, token).await
    }

    pub fn get_transaction_history(&self, token: Address) -> Vec<PendingSubmission> {
        self.coordinator.get_transaction_history(token)
    }

    fn poller(&self, ledger: Ledger, from_block: Option<u64>) -> ChainPoller {
        let (client, watch_item) = match ledger {
            Ledger::Primary => (&self.primary, self.coordinator.primary_watch_item()),
            Ledger::App => (&self.app, self.coordinator.app_watch_item()),
        };
        let observed_head = match ledger {
            Ledger::Primary => self.coordinator.primary_head(),
            Ledger::App => Default::default(),
        };
        ChainPoller::new(
            ledger,
            Arc::clone(client),
            vec![watch_item],
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.tracker),
            self.config.poller.clone(),
            &self.config.rpc,
            observed_head,
        )
        .with_start_block(from_block)
    }

    /// Spawn both pollers. Explicit start blocks override the checkpoints.
    pub fn start(&self, from_primary: Option<u64>, from_app: Option<u64>) -> Result<()> {
        let mut pollers = self.pollers.lock();
        if !pollers.is_empty() {
            bail!("relayer already started");
        }
        if self.stop_handle.is_stopped() {
            bail!("relayer already stopped");
        }
        for (ledger, from_block) in [(Ledger::Primary, from_primary), (Ledger::App, from_app)] {
            let poller = self.poller(ledger, from_block);
            let stop = self.stop_signal.clone();
            let span = info_span!("poller", ledger = %ledger);
            pollers.push(tokio::spawn(poller.run(stop).instrument(span)));
        }
        log::info!(
            "relayer started as provider {:?}",
            self.coordinator.provider()
        );
        Ok(())
    }

    /// Stop polling, then wait for in flight handlers to finish.
    pub async fn stop(&self) {
        self.stop_handle.stop();
        let pollers: Vec<_> = std::mem::take(&mut *self.pollers.lock());
        for poller in pollers {
            if let Err(err) = poller.await {
                log::error!("poller task failed: {}", err);
            }
        }
        self.wait_handlers().await;
        log::info!("relayer stopped");
    }

    pub async fn wait_handlers(&self) {
        self.tracker.wait_all().await;
    }
}

pub async fn run(config: Config, from_primary: Option<u64>, from_app: Option<u64>) -> Result<()> {
    let relayer = Relayer::init(config)?;
    relayer.start(from_primary, from_app)?;
    sigint_or_sigterm().await;
    relayer.stop().await;
    log::info!("Exiting...");
    Ok(())
}

async fn sigint_or_sigterm() {
    let int = tokio::signal::ctrl_c();
    #[cfg(unix)]
    let mut term =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                log::error!("creating SIGTERM stream: {}", err);
                let _ = int.await;
                return;
            }
        };
    #[cfg(unix)]
    tokio::select! {
        _ = int => {}
        _ = term.recv() => {}
    }
    #[cfg(not(unix))]
    let _ = int.await;

    log::info!("received sigint or sigterm, shutting down");
}
