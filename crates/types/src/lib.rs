pub mod callback;
pub mod channel;
pub mod event;
pub mod hash;
pub mod payload;
pub mod serde_helpers;
pub mod submission;

pub use ethereum_types::{Address, H256, U256};

/// The zero address stands for the chain's native asset.
pub fn is_native_token(token: &Address) -> bool {
    token.is_zero()
}
