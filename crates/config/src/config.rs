use std::{path::PathBuf, time::Duration};

use pn_types::Address;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub wallet: WalletConfig,
    pub primary_chain: PrimaryChainConfig,
    pub app_chain: AppChainConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    pub privkey_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrimaryChainConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    /// Default fungible asset.
    pub token_address: Address,
}

impl Default for PrimaryChainConfig {
    fn default() -> Self {
        PrimaryChainConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: Address::zero(),
            token_address: Address::zero(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppChainConfig {
    pub rpc_url: String,
    pub contract_address: Address,
}

impl Default for AppChainConfig {
    fn default() -> Self {
        AppChainConfig {
            rpc_url: "http://127.0.0.1:8546".to_string(),
            contract_address: Address::zero(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub poll_interval_ms: u64,
    /// Blocks behind head to resume from when no checkpoint was persisted.
    pub catch_up_margin: u64,
    pub chunk_size: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            poll_interval_ms: 3000,
            catch_up_margin: 10,
            chunk_size: 1000,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub request_timeout_ms: u64,
    pub receipt_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            request_timeout_ms: 15_000,
            receipt_timeout_ms: 120_000,
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 16_000,
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeRateConfig {
    pub token: Address,
    /// Basis points of every incoming transfer.
    pub rate_bps: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Blocks added to the latest observed primary block to form the
    /// validity horizon of withdraw proposals and attestations.
    pub confirm_block_margin: u64,
    /// Submissions kept for `get_transaction_history`, oldest finished ones
    /// are dropped first.
    pub submission_history_limit: usize,
    pub fee_rates: Vec<FeeRateConfig>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            confirm_block_margin: 100,
            submission_history_limit: 10_000,
            fee_rates: Vec::new(),
        }
    }
}

impl ProtocolConfig {
    pub fn fee_rate(&self, token: &Address) -> u32 {
        self.fee_rates
            .iter()
            .find(|r| &r.token == token)
            .map(|r| r.rate_bps)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            path: PathBuf::from("./checkpoint.json"),
        }
    }
}
