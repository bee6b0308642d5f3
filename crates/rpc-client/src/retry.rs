//! Deadline and retry policy applied to every chain call.
//!
//! Reads are idempotent and retried with exponential backoff on transient
//! failures. Broadcasts only get a deadline: a lost response must never lead
//! to a second broadcast, so their failures reach the caller unchanged.

use std::{future::Future, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use pn_config::RpcConfig;
use pn_types::{
    event::{EventFilter, RawEvent},
    Address, H256, U256,
};
use pn_utils::exponential_backoff::ExponentialBackoff;
use serde_json::Value;

use crate::{
    error::{is_transient, ClientError},
    traits::{ChainClient, ContractCall, Receipt},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub receipt_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RpcConfig) -> Self {
        RetryPolicy {
            request_timeout: config.request_timeout(),
            receipt_timeout: config.receipt_timeout(),
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_base).with_max_sleep(self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RpcConfig::default())
    }
}

pub struct RetryClient<C> {
    name: &'static str,
    inner: C,
    policy: RetryPolicy,
}

impl<C: ChainClient> RetryClient<C> {
    pub fn new(name: &'static str, inner: C, policy: RetryPolicy) -> Self {
        RetryClient {
            name,
            inner,
            policy,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn with_timeout<T, Fut>(&self, method: &'static str, timeout: Duration, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(ClientError::Timeout {
                client: self.name,
                method,
                timeout,
            }
            .into()),
        }
    }

    async fn retry_read<T, F, Fut>(&self, method: &'static str, timeout: Duration, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.policy.backoff();
        loop {
            match self.with_timeout(method, timeout, f()).await {
                Ok(r) => return Ok(r),
                Err(err) if is_transient(&err) && backoff.attempts() < self.policy.max_retries => {
                    let sleep = backoff.next_sleep();
                    log::warn!(
                        "[{}] {} failed (attempt {}), retry in {:?}: {:#}",
                        self.name,
                        method,
                        backoff.attempts(),
                        sleep,
                        err
                    );
                    tokio::time::sleep(sleep).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for RetryClient<C> {
    async fn call(&self, contract: &Address, method: &str, args: Vec<Value>) -> Result<Value> {
        let timeout = self.policy.request_timeout;
        self.retry_read("call", timeout, move || {
            self.inner.call(contract, method, args.clone())
        })
        .await
    }

    async fn send_transaction(
        &self,
        to: &Address,
        value: U256,
        call: ContractCall,
    ) -> Result<Option<H256>> {
        let timeout = self.policy.request_timeout;
        self.with_timeout(
            "sendTransaction",
            timeout,
            self.inner.send_transaction(to, value, call),
        )
        .await
    }

    async fn await_receipt(&self, tx_hash: &H256) -> Result<Receipt> {
        let timeout = self.policy.receipt_timeout;
        self.retry_read("awaitReceipt", timeout, move || {
            self.inner.await_receipt(tx_hash)
        })
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
        let timeout = self.policy.request_timeout;
        self.retry_read("getPastEvents", timeout, move || {
            self.inner
                .get_past_events(contract, name, filter, from_block, to_block)
        })
        .await
    }

    async fn current_block_number(&self) -> Result<u64> {
        let timeout = self.policy.request_timeout;
        self.retry_read("currentBlockNumber", timeout, move || {
            self.inner.current_block_number()
        })
        .await
    }
}
