use std::{fmt, time::SystemTime};

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::{channel::ChannelId, event::Ledger};

/// Contract call a submission carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionKind {
    Approve,
    ProviderDeposit,
    ProposeWithdraw,
    ProposeRebalance,
    Transfer,
    CloseChannel,
    SubmitFee,
    ConfirmUserWithdraw,
    ConfirmCooperativeSettle,
    ProviderWithdraw,
}

impl SubmissionKind {
    pub fn method(self) -> &'static str {
        match self {
            SubmissionKind::Approve => "approve",
            SubmissionKind::ProviderDeposit => "providerDeposit",
            SubmissionKind::ProposeWithdraw => "providerProposeWithdraw",
            SubmissionKind::ProposeRebalance => "proposeRebalance",
            SubmissionKind::Transfer => "transfer",
            SubmissionKind::CloseChannel => "closeChannel",
            SubmissionKind::SubmitFee => "submitFee",
            SubmissionKind::ConfirmUserWithdraw => "confirmUserWithdraw",
            SubmissionKind::ConfirmCooperativeSettle => "confirmCooperativeSettle",
            SubmissionKind::ProviderWithdraw => "providerWithdraw",
        }
    }
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionContext {
    Channel { channel_id: ChannelId, token: Address },
    Token { token: Address },
}

impl SubmissionContext {
    pub fn token(&self) -> Address {
        match self {
            SubmissionContext::Channel { token, .. } => *token,
            SubmissionContext::Token { token } => *token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionStatus {
    Sent,
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub tx_hash: H256,
    pub ledger: Ledger,
    pub kind: SubmissionKind,
    pub context: SubmissionContext,
    pub submitted_at: SystemTime,
    pub status: SubmissionStatus,
}

/// Result of handing a call to the chain gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Broadcast only, no receipt awaited.
    Sent { tx_hash: H256 },
    ConfirmSuccess { tx_hash: H256 },
    ConfirmFail { tx_hash: H256, error: String },
    SendTxFail { reason: String },
    /// The broadcast or its receipt was lost. The call may still have been
    /// executed.
    ConfirmUnknown { tx_hash: Option<H256>, error: String },
}

impl TxOutcome {
    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            TxOutcome::Sent { tx_hash }
            | TxOutcome::ConfirmSuccess { tx_hash }
            | TxOutcome::ConfirmFail { tx_hash, .. } => Some(*tx_hash),
            TxOutcome::ConfirmUnknown { tx_hash, .. } => *tx_hash,
            TxOutcome::SendTxFail { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::ConfirmSuccess { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TxOutcome::ConfirmUnknown { .. })
    }
}
