//! Canonical signing payloads.
//!
//! Every payload is ABI-encoded as a fixed sequence of fixed-width tokens and
//! hashed with keccak256. Field order is part of the protocol; never reorder.

use std::fmt;

use ethabi::Token;
use ethereum_types::{Address, H256, U256};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{channel::ChannelId, hash::keccak256};

pub const SIGNATURE_SIZE: usize = 65;

/// Recoverable secp256k1 signature, `r || s || v`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn zero() -> Self {
        Signature([0u8; SIGNATURE_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", faster_hex::hex_string(&self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let s = s.trim_start_matches("0x");
        if s.len() != SIGNATURE_SIZE * 2 {
            return Err(format!("invalid signature length {}", s.len() / 2));
        }
        let mut inner = [0u8; SIGNATURE_SIZE];
        faster_hex::hex_decode(s.as_bytes(), &mut inner).map_err(|err| err.to_string())?;
        Ok(Signature(inner))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(D::Error::custom)
    }
}

pub trait SignPayload {
    fn tokens(&self) -> Vec<Token>;

    fn encode(&self) -> Vec<u8> {
        ethabi::encode(&self.tokens())
    }

    fn message_hash(&self) -> H256 {
        keccak256(&self.encode())
    }
}

fn bytes32(hash: &H256) -> Token {
    Token::FixedBytes(hash.as_bytes().to_vec())
}

/// `{channelID, balance, nonce, additionalHash}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceProofPayload {
    pub channel_id: ChannelId,
    pub balance: U256,
    pub nonce: u64,
    pub additional_hash: H256,
}

impl SignPayload for BalanceProofPayload {
    fn tokens(&self) -> Vec<Token> {
        vec![
            bytes32(&self.channel_id),
            Token::Uint(self.balance),
            Token::Uint(self.nonce.into()),
            bytes32(&self.additional_hash),
        ]
    }
}

/// `{contract, channelID, amount, nonce}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalancePayload {
    pub contract: Address,
    pub channel_id: ChannelId,
    pub amount: U256,
    pub nonce: u64,
}

impl SignPayload for RebalancePayload {
    fn tokens(&self) -> Vec<Token> {
        vec![
            Token::Address(self.contract),
            bytes32(&self.channel_id),
            Token::Uint(self.amount),
            Token::Uint(self.nonce.into()),
        ]
    }
}

/// `{contract, token, feeAmount, nonce}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeePayload {
    pub contract: Address,
    pub token: Address,
    pub amount: U256,
    pub nonce: u64,
}

impl SignPayload for FeePayload {
    fn tokens(&self) -> Vec<Token> {
        vec![
            Token::Address(self.contract),
            Token::Address(self.token),
            Token::Uint(self.amount),
            Token::Uint(self.nonce.into()),
        ]
    }
}

/// Provider co-signature over a user withdraw or cooperative settle proposal:
/// `{contract, channelID, balance, lastCommitBlock}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationPayload {
    pub contract: Address,
    pub channel_id: ChannelId,
    pub balance: U256,
    pub last_commit_block: u64,
}

impl SignPayload for AttestationPayload {
    fn tokens(&self) -> Vec<Token> {
        vec![
            Token::Address(self.contract),
            bytes32(&self.channel_id),
            Token::Uint(self.balance),
            Token::Uint(self.last_commit_block.into()),
        ]
    }
}
