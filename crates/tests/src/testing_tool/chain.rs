//! In-memory chain gateway.

use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pn_rpc_client::{error::RPCRequestError, ChainClient, ContractCall, Receipt};
use pn_types::{
    event::{ContractEvent, EventFilter, RawEvent},
    Address, H256, U256,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SentTx {
    pub to: Address,
    pub value: U256,
    pub method: String,
    pub args: Vec<Value>,
    pub tx_hash: H256,
}

#[derive(Default)]
struct MockState {
    head: u64,
    head_error: bool,
    views: HashMap<(Address, String), Vec<(Vec<Value>, Value)>>,
    view_calls: usize,
    sent: Vec<SentTx>,
    send_failures: HashMap<String, String>,
    lost_sends: HashMap<String, String>,
    receipt_failures: HashMap<String, String>,
    lost_receipts: HashMap<String, String>,
    view_failures: HashMap<String, usize>,
    events: Vec<RawEvent>,
    event_failures: usize,
    receipt_delay: Duration,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn fail_head(&self, fail: bool) {
        self.state.lock().head_error = fail;
    }

    /// Answer `method(args)` on `contract` with `value`, replacing a previous
    /// answer for the same arguments.
    pub fn set_view(&self, contract: Address, method: &str, args: Vec<Value>, value: Value) {
        let mut state = self.state.lock();
        let answers = state
            .views
            .entry((contract, method.to_string()))
            .or_default();
        answers.retain(|(a, _)| a != &args);
        answers.push((args, value));
    }

    pub fn view_calls(&self) -> usize {
        self.state.lock().view_calls
    }

    pub fn fail_send(&self, method: &str, reason: &str) {
        self.state
            .lock()
            .send_failures
            .insert(method.to_string(), reason.to_string());
    }

    pub fn fail_receipt(&self, method: &str, error: &str) {
        self.state
            .lock()
            .receipt_failures
            .insert(method.to_string(), error.to_string());
    }

    /// Fail broadcasting `method` the way a dropped connection does.
    pub fn lose_send(&self, method: &str, error: &str) {
        self.state
            .lock()
            .lost_sends
            .insert(method.to_string(), error.to_string());
    }

    /// Broadcast `method` normally but fail reading its receipt.
    pub fn lose_receipt(&self, method: &str, error: &str) {
        self.state
            .lock()
            .lost_receipts
            .insert(method.to_string(), error.to_string());
    }

    /// Fail the next `n` reads of the view `method`.
    pub fn fail_view(&self, method: &str, n: usize) {
        self.state.lock().view_failures.insert(method.to_string(), n);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.send_failures.clear();
        state.lost_sends.clear();
        state.receipt_failures.clear();
        state.lost_receipts.clear();
        state.view_failures.clear();
    }

    pub fn set_receipt_delay(&self, delay: Duration) {
        self.state.lock().receipt_delay = delay;
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    pub fn sent_with(&self, method: &str) -> Vec<SentTx> {
        self.sent().into_iter().filter(|tx| tx.method == method).collect()
    }

    pub fn push_event(&self, contract: Address, event: &ContractEvent, block: u64, log_index: u64) {
        let raw = event
            .to_raw(contract, block, log_index)
            .expect("encode event");
        self.state.lock().events.push(raw);
    }

    /// Fail the next `n` event queries.
    pub fn fail_event_queries(&self, n: usize) {
        self.state.lock().event_failures = n;
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn call(&self, contract: &Address, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut state = self.state.lock();
        state.view_calls += 1;
        if let Some(remaining) = state.view_failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("connection reset");
            }
        }
        state
            .views
            .get(&(*contract, method.to_string()))
            .and_then(|answers| answers.iter().find(|(a, _)| a == &args))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| anyhow!("no view {} {:?} on {:?}", method, args, contract))
    }

    async fn send_transaction(
        &self,
        to: &Address,
        value: U256,
        call: ContractCall,
    ) -> Result<Option<H256>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.send_failures.get(&call.method) {
            bail!("{}", reason);
        }
        if let Some(error) = state.lost_sends.get(&call.method) {
            return Err(RPCRequestError::new(
                "mock",
                "sendTransaction".to_string(),
                anyhow!("{}", error),
            )
            .into());
        }
        let tx_hash = H256::from_low_u64_be(state.sent.len() as u64 + 1);
        state.sent.push(SentTx {
            to: *to,
            value,
            method: call.method,
            args: call.args,
            tx_hash,
        });
        Ok(Some(tx_hash))
    }

    async fn await_receipt(&self, tx_hash: &H256) -> Result<Receipt> {
        let delay = self.state.lock().receipt_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        let tx = state
            .sent
            .iter()
            .find(|tx| &tx.tx_hash == tx_hash)
            .ok_or_else(|| anyhow!("unknown transaction {:?}", tx_hash))?;
        if let Some(error) = state.lost_receipts.get(&tx.method) {
            bail!("{}", error);
        }
        Ok(Receipt {
            transaction_hash: *tx_hash,
            block_number: state.head,
            error: state.receipt_failures.get(&tx.method).cloned(),
        })
    }

    async fn get_past_events(
        &self,
        contract: &Address,
        name: &str,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let mut state = self.state.lock();
        if state.event_failures > 0 {
            state.event_failures -= 1;
            bail!("events unavailable");
        }
        Ok(state
            .events
            .iter()
            .filter(|e| &e.address == contract && e.event == name)
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .filter(|e| filter.matches(&e.return_values))
            .cloned()
            .collect())
    }

    async fn current_block_number(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.head_error {
            bail!("head unavailable");
        }
        Ok(state.head)
    }
}
