use std::time::Duration;

use thiserror::Error;

// NOTE: Error only for [client].request() not to_result()
#[derive(Error, Debug)]
#[error("{client} error, method: {method} error: {source}")]
pub struct RPCRequestError {
    pub client: &'static str,
    pub method: String,
    pub source: anyhow::Error,
}

impl RPCRequestError {
    pub fn new<E: Into<anyhow::Error>>(client: &'static str, method: String, source: E) -> Self {
        RPCRequestError {
            client,
            method,
            source: source.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{client} request {method} timed out after {timeout:?}")]
    Timeout {
        client: &'static str,
        method: &'static str,
        timeout: Duration,
    },
}

/// Transport failures and elapsed deadlines are worth retrying, JSON-RPC
/// error objects and decode failures are not.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.is::<RPCRequestError>() || e.is::<ClientError>())
}
