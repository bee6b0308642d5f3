pub mod arena;
pub mod checkpoint;
pub mod submission_log;

use arena::LockArena;
use pn_types::{
    channel::{Channel, ChannelId, FeeState, WithdrawState},
    Address,
};
use tokio::sync::OwnedMutexGuard;

pub type ChannelGuard = OwnedMutexGuard<Option<Channel>>;
pub type FeeGuard = OwnedMutexGuard<FeeState>;
pub type WithdrawGuard = OwnedMutexGuard<WithdrawState>;

/// Channel state plus the token scoped streams.
///
/// Every read-modify-write on a channel holds its guard for the whole
/// sequence. When a token guard is needed too it is taken after the channel
/// guard.
#[derive(Default)]
pub struct ChannelStore {
    channels: LockArena<ChannelId, Option<Channel>>,
    fees: LockArena<Address, FeeState>,
    withdraws: LockArena<Address, WithdrawState>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` inside the guard means the channel was never hydrated.
    pub async fn lock_channel(&self, id: &ChannelId) -> ChannelGuard {
        self.channels.lock(id).await
    }

    pub async fn lock_fee(&self, token: &Address) -> FeeGuard {
        self.fees.lock(token).await
    }

    pub async fn lock_withdraw(&self, token: &Address) -> WithdrawGuard {
        self.withdraws.lock(token).await
    }

    pub async fn get_channel(&self, id: &ChannelId) -> Option<Channel> {
        self.channels.lock(id).await.clone()
    }

    pub async fn get_fee(&self, token: &Address) -> FeeState {
        self.fees.lock(token).await.clone()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys()
    }
}
