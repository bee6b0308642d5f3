use std::sync::Arc;

use pn_rpc_client::{error::is_transient, ChainClient, ContractCall};
use pn_store::submission_log::SubmissionLog;
use pn_types::{
    event::Ledger,
    submission::{SubmissionContext, SubmissionKind, SubmissionStatus, TxOutcome},
    Address, H256, U256,
};
use serde_json::Value;
use tracing::instrument;

enum BroadcastError {
    /// The gateway refused the call.
    Rejected(String),
    /// No answer within the deadline or the connection broke. The call may
    /// have been broadcast.
    Lost(String),
}

impl BroadcastError {
    fn into_outcome(self) -> TxOutcome {
        match self {
            BroadcastError::Rejected(reason) => TxOutcome::SendTxFail { reason },
            BroadcastError::Lost(error) => TxOutcome::ConfirmUnknown {
                tx_hash: None,
                error,
            },
        }
    }
}

#[derive(Clone)]
pub struct Submitter {
    primary: Arc<dyn ChainClient>,
    app: Arc<dyn ChainClient>,
    submissions: Arc<SubmissionLog>,
}

impl Submitter {
    pub fn new(
        primary: Arc<dyn ChainClient>,
        app: Arc<dyn ChainClient>,
        submissions: Arc<SubmissionLog>,
    ) -> Self {
        Submitter {
            primary,
            app,
            submissions,
        }
    }

    pub fn submissions(&self) -> &Arc<SubmissionLog> {
        &self.submissions
    }

    /// Broadcast on the primary chain. No receipt is awaited, the effect is
    /// observed later through primary events.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn submit_primary(
        &self,
        to: Address,
        value: U256,
        kind: SubmissionKind,
        context: SubmissionContext,
        args: Vec<Value>,
    ) -> TxOutcome {
        match self.broadcast(Ledger::Primary, to, value, kind, context, args).await {
            Ok(tx_hash) => {
                log::info!("[primary] sent {} tx {:?}", kind, tx_hash);
                TxOutcome::Sent { tx_hash }
            }
            Err(err) => err.into_outcome(),
        }
    }

    /// Broadcast on the application chain and wait for the receipt.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn submit_app(
        &self,
        to: Address,
        kind: SubmissionKind,
        context: SubmissionContext,
        args: Vec<Value>,
    ) -> TxOutcome {
        let tx_hash = match self
            .broadcast(Ledger::App, to, U256::zero(), kind, context, args)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(err) => return err.into_outcome(),
        };

        let outcome = match self.app.await_receipt(&tx_hash).await {
            Ok(receipt) => match receipt.error {
                None => TxOutcome::ConfirmSuccess { tx_hash },
                Some(error) => TxOutcome::ConfirmFail { tx_hash, error },
            },
            Err(err) => TxOutcome::ConfirmUnknown {
                tx_hash: Some(tx_hash),
                error: format!("await receipt: {:#}", err),
            },
        };
        match &outcome {
            TxOutcome::ConfirmSuccess { .. } => {
                log::info!("[app] {} tx {:?} confirmed", kind, tx_hash);
                self.submissions
                    .update_status(&tx_hash, SubmissionStatus::Confirmed);
            }
            TxOutcome::ConfirmFail { error, .. } => {
                log::warn!("[app] {} tx {:?} failed: {}", kind, tx_hash, error);
                self.submissions
                    .update_status(&tx_hash, SubmissionStatus::Failed(error.clone()));
            }
            TxOutcome::ConfirmUnknown { error, .. } => {
                log::warn!("[app] {} tx {:?} outcome unknown: {}", kind, tx_hash, error);
            }
            _ => {}
        }
        outcome
    }

    async fn broadcast(
        &self,
        ledger: Ledger,
        to: Address,
        value: U256,
        kind: SubmissionKind,
        context: SubmissionContext,
        args: Vec<Value>,
    ) -> Result<H256, BroadcastError> {
        let client = match ledger {
            Ledger::Primary => &self.primary,
            Ledger::App => &self.app,
        };
        let call = ContractCall::new(kind.method(), args);
        match client.send_transaction(&to, value, call).await {
            Ok(Some(tx_hash)) => {
                self.submissions.record(tx_hash, ledger, kind, context);
                Ok(tx_hash)
            }
            Ok(None) => {
                log::error!("[{}] {} returned no transaction hash", ledger, kind);
                Err(BroadcastError::Rejected(
                    "no transaction hash returned".to_string(),
                ))
            }
            Err(err) if is_transient(&err) => {
                log::error!("[{}] send {} lost: {:#}", ledger, kind, err);
                Err(BroadcastError::Lost(format!("{:#}", err)))
            }
            Err(err) => {
                log::error!("[{}] send {} failed: {:#}", ledger, kind, err);
                Err(BroadcastError::Rejected(format!("{:#}", err)))
            }
        }
    }
}
