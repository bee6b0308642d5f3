use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallbackKind {
    UserDeposit,
    UserWithdraw,
    UserForceWithdraw,
    ProviderDeposit,
    ProviderWithdraw,
    Transfer,
    Message,
    InitSession,
    JoinSession,
    CloseSession,
}

/// Normalized notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    UserDeposit {
        channel_id: ChannelId,
        user: Address,
        token: Address,
        amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    UserWithdraw {
        channel_id: ChannelId,
        user: Address,
        token: Address,
        amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    UserForceWithdraw {
        channel_id: ChannelId,
        user_amount: U256,
        provider_amount: U256,
    },
    ProviderDeposit {
        token: Address,
        amount: U256,
    },
    ProviderWithdraw {
        token: Address,
        amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        channel_id: ChannelId,
        from: Address,
        token: Address,
        /// Increase of the cumulative balance carried by this transfer.
        amount: U256,
        balance: U256,
        nonce: u64,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        session_id: H256,
        from: Address,
        to: Address,
        content: String,
    },
    InitSession,
    JoinSession,
    CloseSession,
}

impl DomainEvent {
    pub fn kind(&self) -> CallbackKind {
        match self {
            DomainEvent::UserDeposit { .. } => CallbackKind::UserDeposit,
            DomainEvent::UserWithdraw { .. } => CallbackKind::UserWithdraw,
            DomainEvent::UserForceWithdraw { .. } => CallbackKind::UserForceWithdraw,
            DomainEvent::ProviderDeposit { .. } => CallbackKind::ProviderDeposit,
            DomainEvent::ProviderWithdraw { .. } => CallbackKind::ProviderWithdraw,
            DomainEvent::Transfer { .. } => CallbackKind::Transfer,
            DomainEvent::Message { .. } => CallbackKind::Message,
            DomainEvent::InitSession => CallbackKind::InitSession,
            DomainEvent::JoinSession => CallbackKind::JoinSession,
            DomainEvent::CloseSession => CallbackKind::CloseSession,
        }
    }
}
