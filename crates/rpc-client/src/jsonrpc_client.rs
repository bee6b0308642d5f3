//! Chain gateway client speaking JSON-RPC 2.0 over HTTP.

use std::time::Duration;

use anyhow::Result;
use async_jsonrpc_client::{HttpClient, Params as ClientParams, Transport};
use async_trait::async_trait;
use pn_types::{
    event::{EventFilter, RawEvent},
    serde_helpers::u64_quantity,
    Address, H256, U256,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    error::RPCRequestError,
    traits::{ChainClient, ContractCall, Receipt},
    utils::to_result,
};

#[derive(Deserialize)]
struct Quantity(#[serde(with = "u64_quantity")] u64);

#[derive(Clone)]
pub struct JsonRpcChainClient {
    name: &'static str,
    client: HttpClient,
}

impl JsonRpcChainClient {
    pub fn new(name: &'static str, client: HttpClient) -> Self {
        Self { name, client }
    }

    pub fn with_url(name: &'static str, url: &str, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder().timeout(timeout).build(url)?;
        Ok(Self::new(name, client))
    }

    fn client(&self) -> &HttpClient {
        &self.client
    }

    #[instrument(skip_all, fields(client = self.name, method = method))]
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<ClientParams>,
    ) -> Result<T> {
        let response = self
            .client()
            .request(method, params)
            .await
            .map_err(|err| RPCRequestError::new(self.name, method.to_string(), err))?;
        let response_str = response.to_string();
        match to_result::<T>(response) {
            Ok(r) => Ok(r),
            Err(err) => {
                log::error!(
                    "[{}] Failed to parse response, method: {}, response: {}",
                    self.name,
                    method,
                    response_str
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn call(&self, contract: &Address, method: &str, args: Vec<Value>) -> Result<Value> {
        self.request(
            "call",
            Some(ClientParams::Array(vec![
                json!(contract),
                json!(method),
                Value::Array(args),
            ])),
        )
        .await
    }

    async fn send_transaction(
        &self,
        to: &Address,
        value: U256,
        call: ContractCall,
    ) -> Result<Option<H256>> {
        self.request(
            "sendTransaction",
            Some(ClientParams::Array(vec![
                json!(to),
                json!(value),
                json!(call),
            ])),
        )
        .await
    }

    async fn await_receipt(&self, tx_hash: &H256) -> Result<Receipt> {
        self.request(
            "awaitReceipt",
            Some(ClientParams::Array(vec![json!(tx_hash)])),
        )
        .await
    }

    async fn get_past_events(
        &self,
        contract: &Address,
        name: &str,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let options = json!({
            "filter": filter,
            "fromBlock": from_block,
            "toBlock": to_block,
        });
        self.request(
            "getPastEvents",
            Some(ClientParams::Array(vec![json!(contract), json!(name), options])),
        )
        .await
    }

    async fn current_block_number(&self) -> Result<u64> {
        let Quantity(number) = self.request("currentBlockNumber", None).await?;
        Ok(number)
    }
}
