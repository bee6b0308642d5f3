use std::fmt;

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::{
    payload::{BalanceProofPayload, RebalancePayload, Signature},
    serde_helpers::{u256_quantity, u64_quantity},
};

pub type ChannelId = H256;

/// Fee rates are expressed in basis points.
pub const FEE_RATE_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Open,
    Closing,
    Closed,
    Settled,
}

impl ChannelStatus {
    /// Status code used by the channel contracts; `0` means the channel does
    /// not exist on chain.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChannelStatus::Open),
            2 => Some(ChannelStatus::Closing),
            3 => Some(ChannelStatus::Closed),
            4 => Some(ChannelStatus::Settled),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            ChannelStatus::Open => 0,
            ChannelStatus::Closing => 1,
            ChannelStatus::Closed | ChannelStatus::Settled => 2,
        }
    }

    pub fn is_open(self) -> bool {
        self == ChannelStatus::Open
    }

    /// Status only moves forward: `Open -> Closing -> {Closed, Settled}`.
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Open => "open",
            ChannelStatus::Closing => "closing",
            ChannelStatus::Closed => "closed",
            ChannelStatus::Settled => "settled",
        };
        write!(f, "{}", s)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProofError {
    #[error("proof nonce {actual} does not follow {current}")]
    NonceNotSequential { current: u64, actual: u64 },
    #[error("proof balance {actual} is lower than {current}")]
    BalanceDecreased { current: U256, actual: U256 },
    #[error("proof balance overflow")]
    Overflow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceProof {
    pub channel_id: ChannelId,
    #[serde(with = "u256_quantity")]
    pub balance: U256,
    #[serde(with = "u64_quantity")]
    pub nonce: u64,
    #[serde(default)]
    pub additional_hash: H256,
    #[serde(default)]
    pub signature: Signature,
}

impl BalanceProof {
    pub fn payload(&self) -> BalanceProofPayload {
        BalanceProofPayload {
            channel_id: self.channel_id,
            balance: self.balance,
            nonce: self.nonce,
            additional_hash: self.additional_hash,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceProof {
    pub channel_id: ChannelId,
    #[serde(with = "u256_quantity")]
    pub amount: U256,
    #[serde(with = "u64_quantity")]
    pub nonce: u64,
    #[serde(default)]
    pub signature: Signature,
}

impl RebalanceProof {
    pub fn payload(&self, contract: Address) -> RebalancePayload {
        RebalancePayload {
            contract,
            channel_id: self.channel_id,
            amount: self.amount,
            nonce: self.nonce,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttestationKind {
    UserWithdraw,
    CooperativeSettle,
}

/// The last withdraw or cooperative settle proposal the provider co-signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub kind: AttestationKind,
    #[serde(with = "u256_quantity")]
    pub balance: U256,
    pub last_commit_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub user: Address,
    pub token: Address,
    pub status: ChannelStatus,
    /// Provider -> user transfers, signed by the provider.
    pub sent: BalanceProof,
    /// User -> provider transfers observed on the application chain.
    pub received: BalanceProof,
    pub rebalance: RebalanceProof,
    pub last_attestation: Option<Attestation>,
}

impl Channel {
    pub fn new(id: ChannelId, user: Address, token: Address, status: ChannelStatus) -> Self {
        Channel {
            id,
            user,
            token,
            status,
            sent: BalanceProof {
                channel_id: id,
                ..Default::default()
            },
            received: BalanceProof {
                channel_id: id,
                ..Default::default()
            },
            rebalance: RebalanceProof {
                channel_id: id,
                ..Default::default()
            },
            last_attestation: None,
        }
    }

    /// Unsigned successor of the outgoing balance proof.
    pub fn next_transfer(&self, amount: U256, additional_hash: H256) -> Result<BalanceProof, ProofError> {
        let balance = self
            .sent
            .balance
            .checked_add(amount)
            .ok_or(ProofError::Overflow)?;
        let nonce = self.sent.nonce.checked_add(1).ok_or(ProofError::Overflow)?;
        Ok(BalanceProof {
            channel_id: self.id,
            balance,
            nonce,
            additional_hash,
            signature: Signature::zero(),
        })
    }

    /// Unsigned successor of the rebalance proof.
    pub fn next_rebalance(&self, amount: U256) -> Result<RebalanceProof, ProofError> {
        let amount = self
            .rebalance
            .amount
            .checked_add(amount)
            .ok_or(ProofError::Overflow)?;
        let nonce = self
            .rebalance
            .nonce
            .checked_add(1)
            .ok_or(ProofError::Overflow)?;
        Ok(RebalanceProof {
            channel_id: self.id,
            amount,
            nonce,
            signature: Signature::zero(),
        })
    }

    pub fn apply_sent(&mut self, proof: BalanceProof) -> Result<(), ProofError> {
        check_successor(self.sent.nonce, self.sent.balance, proof.nonce, proof.balance)?;
        self.sent = proof;
        Ok(())
    }

    pub fn apply_rebalance(&mut self, proof: RebalanceProof) -> Result<(), ProofError> {
        check_successor(
            self.rebalance.nonce,
            self.rebalance.amount,
            proof.nonce,
            proof.amount,
        )?;
        self.rebalance = proof;
        Ok(())
    }

    /// Whether an observed incoming proof is newer than the one stored.
    pub fn is_new_received(&self, proof: &BalanceProof) -> bool {
        proof.nonce > self.received.nonce
    }

    /// Record an incoming proof. Observed proofs may skip nonces (the
    /// relayer can miss intermediate transfers), but never go backwards.
    pub fn apply_received(&mut self, proof: BalanceProof) -> Result<(), ProofError> {
        if proof.nonce <= self.received.nonce {
            return Err(ProofError::NonceNotSequential {
                current: self.received.nonce,
                actual: proof.nonce,
            });
        }
        if proof.balance < self.received.balance {
            return Err(ProofError::BalanceDecreased {
                current: self.received.balance,
                actual: proof.balance,
            });
        }
        self.received = proof;
        Ok(())
    }

    /// Moves the status forward, returns false if the transition would go
    /// backwards or stay in place.
    pub fn advance_status(&mut self, next: ChannelStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

fn check_successor(
    current_nonce: u64,
    current_balance: U256,
    nonce: u64,
    balance: U256,
) -> Result<(), ProofError> {
    if Some(nonce) != current_nonce.checked_add(1) {
        return Err(ProofError::NonceNotSequential {
            current: current_nonce,
            actual: nonce,
        });
    }
    if balance < current_balance {
        return Err(ProofError::BalanceDecreased {
            current: current_balance,
            actual: balance,
        });
    }
    Ok(())
}

/// Per-token fee stream state.
///
/// `accrued` grows with every incoming transfer; `claimed_amount` and `nonce`
/// only move when a fee proof was accepted, so a failed claim is folded into
/// the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeState {
    #[serde(with = "u256_quantity")]
    pub accrued: U256,
    #[serde(with = "u256_quantity")]
    pub claimed_amount: U256,
    pub nonce: u64,
    /// Whether the last accepted claim was read from the contract.
    #[serde(skip)]
    pub hydrated: bool,
    /// Fees accrued while the stream was not in sync with the contract.
    #[serde(skip)]
    pub pending: U256,
}

impl FeeState {
    /// Accrue the fee of an incoming `delta`. Out of sync, the amount waits in
    /// `pending` until the next [`FeeState::sync`].
    pub fn accrue(&mut self, rate_bps: u32, delta: U256) -> Option<()> {
        if self.hydrated {
            self.accrued = accrue_fee(self.accrued, rate_bps, delta)?;
        } else {
            self.pending = accrue_fee(self.pending, rate_bps, delta)?;
        }
        Some(())
    }

    /// Adopt the latest claim accepted by the contract.
    pub fn sync(&mut self, claimed_amount: U256, nonce: u64) -> Option<()> {
        self.accrued = self
            .accrued
            .max(claimed_amount)
            .checked_add(self.pending)?;
        self.pending = U256::zero();
        self.claimed_amount = claimed_amount;
        self.nonce = nonce;
        self.hydrated = true;
        Some(())
    }
}

/// `prior + floor(rate_bps * delta / 10000)`
pub fn accrue_fee(prior: U256, rate_bps: u32, delta: U256) -> Option<U256> {
    let fee = delta
        .checked_mul(U256::from(rate_bps))?
        .checked_div(U256::from(FEE_RATE_DENOMINATOR))?;
    prior.checked_add(fee)
}

/// Provider withdraw confirmations already relayed to the primary chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawState {
    #[serde(with = "u256_quantity")]
    pub balance: U256,
    pub last_commit_block: u64,
}

impl WithdrawState {
    pub fn is_relayed(&self, balance: U256, last_commit_block: u64) -> bool {
        self.balance == balance && self.last_commit_block == last_commit_block
    }
}

/// Application-chain bookkeeping for one token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNetwork {
    #[serde(with = "u256_quantity")]
    pub user_total_deposit: U256,
    #[serde(with = "u256_quantity")]
    pub user_total_withdraw: U256,
    #[serde(with = "u256_quantity")]
    pub provider_total_deposit: U256,
    #[serde(with = "u256_quantity")]
    pub provider_total_withdraw: U256,
    /// Provider funds available inside the network.
    #[serde(with = "u256_quantity")]
    pub provider_balance: U256,
    /// Provider funds held by the primary-chain contract.
    #[serde(with = "u256_quantity")]
    pub provider_onchain_balance: U256,
}

/// Contract view of a channel, used to hydrate the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub user: Address,
    pub token: Address,
    #[serde(with = "u64_quantity")]
    pub status: u64,
}
