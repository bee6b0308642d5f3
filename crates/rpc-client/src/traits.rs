use anyhow::{Context, Result};
use async_trait::async_trait;
use pn_types::{
    event::{EventFilter, RawEvent},
    serde_helpers::u64_quantity,
    Address, H256, U256,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A contract method invocation. ABI encoding happens in the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCall {
    pub method: String,
    pub args: Vec<Value>,
}

impl ContractCall {
    pub fn new(method: &str, args: Vec<Value>) -> Self {
        ContractCall {
            method: method.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: H256,
    #[serde(with = "u64_quantity")]
    pub block_number: u64,
    /// Present when execution failed.
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Read-only contract view.
    async fn call(&self, contract: &Address, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Broadcast a contract call. `None` means the gateway returned no hash.
    async fn send_transaction(
        &self,
        to: &Address,
        value: U256,
        call: ContractCall,
    ) -> Result<Option<H256>>;

    async fn await_receipt(&self, tx_hash: &H256) -> Result<Receipt>;

    async fn get_past_events(
        &self,
        contract: &Address,
        name: &str,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>>;

    async fn current_block_number(&self) -> Result<u64>;
}

/// Call a view and decode its result.
pub async fn view<T: DeserializeOwned>(
    client: &dyn ChainClient,
    contract: &Address,
    method: &str,
    args: Vec<Value>,
) -> Result<T> {
    let value = client.call(contract, method, args).await?;
    serde_json::from_value(value).with_context(|| format!("decode {} result", method))
}
