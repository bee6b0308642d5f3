use pn_types::{channel::ProofError, Address, U256};
use thiserror::Error;

/// Requests the protocol refuses. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("channel not open")]
    ChannelNotOpen,
    #[error("channel of user {user:?} token {token:?} not found")]
    ChannelNotFound { user: Address, token: Address },
    #[error("withdraw amount {amount} exceeds provider onchain balance {onchain}")]
    WithdrawExceedsOnchainBalance { amount: U256, onchain: U256 },
    #[error("withdraw amount {amount} leaves onchain balance above provider balance {available}")]
    WithdrawBelowLiability { amount: U256, available: U256 },
    #[error("rebalance amount {amount} exceeds provider balance {available}")]
    InsufficientProviderBalance { amount: U256, available: U256 },
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

impl RelayError {
    pub fn policy(&self) -> Option<&PolicyViolation> {
        match self {
            RelayError::Policy(violation) => Some(violation),
            _ => None,
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
