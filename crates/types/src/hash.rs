use ethabi::Token;
use ethereum_types::{Address, H256};
use sha3::{Digest, Keccak256};

use crate::channel::ChannelId;

pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

/// Channel identity is `keccak256(abi.encode(provider, user, token))`.
pub fn channel_id(provider: &Address, user: &Address, token: &Address) -> ChannelId {
    let encoded = ethabi::encode(&[
        Token::Address(*provider),
        Token::Address(*user),
        Token::Address(*token),
    ]);
    keccak256(&encoded)
}
