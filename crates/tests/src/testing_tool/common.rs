use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use pn_config::{Config, FeeRateConfig};
use pn_relayer::{Coordinator, Relayer};
use pn_rpc_client::ChainClient;
use pn_store::checkpoint::MemoryCheckpointStore;
use pn_types::{
    callback::{CallbackKind, DomainEvent},
    channel::{ChannelId, PaymentNetwork},
    Address, H256, U256,
};
use pn_utils::wallet::Signer;
use serde_json::json;

use super::chain::MockChain;

pub const PROVIDER_KEY: [u8; 32] = [0x11; 32];
pub const CALLBACK_KINDS: [CallbackKind; 10] = [
    CallbackKind::UserDeposit,
    CallbackKind::UserWithdraw,
    CallbackKind::UserForceWithdraw,
    CallbackKind::ProviderDeposit,
    CallbackKind::ProviderWithdraw,
    CallbackKind::Transfer,
    CallbackKind::Message,
    CallbackKind::InitSession,
    CallbackKind::JoinSession,
    CallbackKind::CloseSession,
];

pub fn primary_contract() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn app_contract() -> Address {
    Address::repeat_byte(0xa2)
}

pub fn token() -> Address {
    Address::repeat_byte(0x70)
}

pub fn user() -> Address {
    Address::repeat_byte(0x05)
}

pub struct TestEnv {
    pub relayer: Relayer,
    pub primary: Arc<MockChain>,
    pub app: Arc<MockChain>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub events: Arc<Mutex<Vec<DomainEvent>>>,
}

pub fn test_config(fee_rate_bps: u32) -> Config {
    let mut config = Config::default();
    config.primary_chain.contract_address = primary_contract();
    config.primary_chain.token_address = token();
    config.app_chain.contract_address = app_contract();
    config.poller.poll_interval_ms = 10;
    config.poller.catch_up_margin = 0;
    config.rpc.backoff_base_ms = 5;
    config.rpc.backoff_max_ms = 20;
    if fee_rate_bps > 0 {
        config.protocol.fee_rates.push(FeeRateConfig {
            token: token(),
            rate_bps: fee_rate_bps,
        });
    }
    config
}

pub fn setup(fee_rate_bps: u32) -> TestEnv {
    let primary = Arc::new(MockChain::new());
    let app = Arc::new(MockChain::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::default());
    let signer = Signer::from_slice(&PROVIDER_KEY).unwrap();
    let relayer = Relayer::with_clients(
        test_config(fee_rate_bps),
        signer,
        Arc::clone(&primary) as Arc<dyn ChainClient>,
        Arc::clone(&app) as Arc<dyn ChainClient>,
        checkpoints.clone(),
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in CALLBACK_KINDS {
        let events = Arc::clone(&events);
        relayer.register_callback(
            kind,
            Arc::new(move |event: DomainEvent| events.lock().push(event)),
        );
    }

    app.set_view(
        app_contract(),
        "feeProofMap",
        vec![json!(token())],
        json!({"amount": "0", "nonce": 0}),
    );

    TestEnv {
        relayer,
        primary,
        app,
        checkpoints,
        events,
    }
}

impl TestEnv {
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        self.relayer.coordinator()
    }

    pub fn provider(&self) -> Address {
        self.coordinator().provider()
    }

    pub fn channel_id(&self) -> ChannelId {
        self.coordinator().channel_id(&user(), &token())
    }

    /// Contract views of the channel between the provider and `user()`.
    pub fn stub_channel(&self, status: u64, received_balance: U256, received_nonce: u64) {
        let id = self.channel_id();
        self.primary.set_view(
            primary_contract(),
            "channelMap",
            vec![json!(id)],
            json!({"user": user(), "token": token(), "status": status}),
        );
        self.app.set_view(
            app_contract(),
            "balanceProofMap",
            vec![json!(id), json!(self.provider())],
            json!({"balance": "0", "nonce": 0}),
        );
        self.app.set_view(
            app_contract(),
            "balanceProofMap",
            vec![json!(id), json!(user())],
            json!({
                "balance": received_balance.to_string(),
                "nonce": received_nonce,
                "additionalHash": H256::zero(),
            }),
        );
        self.app.set_view(
            app_contract(),
            "rebalanceProofMap",
            vec![json!(id)],
            json!({"amount": "0", "nonce": 0}),
        );
    }

    pub fn stub_payment_network(&self, network: &PaymentNetwork) {
        self.app.set_view(
            app_contract(),
            "paymentNetworkMap",
            vec![json!(token())],
            serde_json::to_value(network).unwrap(),
        );
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Wait until `predicate` holds on the delivered callbacks.
    pub async fn wait_events<F>(&self, predicate: F)
    where
        F: Fn(&[DomainEvent]) -> bool,
    {
        for _ in 0..200 {
            if predicate(&self.events.lock()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timeout, delivered events: {:?}", self.events());
    }
}
