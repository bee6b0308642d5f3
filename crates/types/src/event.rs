//! Contract events as returned by the chain gateway, and their typed form.

use std::{collections::BTreeMap, fmt};

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    channel::ChannelId,
    payload::Signature,
    serde_helpers::{u256_quantity, u64_quantity},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ledger {
    Primary,
    App,
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ledger::Primary => write!(f, "primary"),
            Ledger::App => write!(f, "app"),
        }
    }
}

/// An event log entry with its decoded but untyped return values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub address: Address,
    #[serde(with = "u64_quantity")]
    pub block_number: u64,
    #[serde(with = "u64_quantity")]
    pub log_index: u64,
    #[serde(default)]
    pub transaction_hash: H256,
    #[serde(default)]
    pub return_values: Map<String, Value>,
}

impl RawEvent {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    pub fn decode(&self) -> Result<ContractEvent, serde_json::Error> {
        let mut tagged = Map::with_capacity(2);
        tagged.insert("event".to_string(), Value::String(self.event.clone()));
        tagged.insert(
            "returnValues".to_string(),
            Value::Object(self.return_values.clone()),
        );
        serde_json::from_value(Value::Object(tagged))
    }
}

/// Partial equality over return values. `0x` strings are compared without
/// regard to case; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter(pub BTreeMap<String, Value>);

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn with_address(self, field: &str, address: &Address) -> Self {
        self.with(field, format!("{:?}", address))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, return_values: &Map<String, Value>) -> bool {
        self.0.iter().all(|(field, expected)| {
            return_values
                .get(field)
                .map(|actual| value_eq(expected, actual))
                .unwrap_or(false)
        })
    }
}

fn value_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::String(a), Value::String(b)) if a.starts_with("0x") || b.starts_with("0x") => {
            a.eq_ignore_ascii_case(b)
        }
        (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => {
            a.to_string() == *b
        }
        _ => expected == actual,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ChannelOpened,
    UserNewDeposit,
    UserWithdraw,
    CooperativeSettled,
    ChannelClosed,
    ChannelSettled,
    ProviderNewDeposit,
    ProviderWithdraw,
    Transfer,
    UserProposeWithdraw,
    ProposeCooperativeSettle,
    ConfirmProviderWithdraw,
    InitSession,
    JoinSession,
    CloseSession,
    SendMessage,
}

impl EventKind {
    pub const PRIMARY: [EventKind; 8] = [
        EventKind::ChannelOpened,
        EventKind::UserNewDeposit,
        EventKind::UserWithdraw,
        EventKind::CooperativeSettled,
        EventKind::ChannelClosed,
        EventKind::ChannelSettled,
        EventKind::ProviderNewDeposit,
        EventKind::ProviderWithdraw,
    ];

    pub const APP: [EventKind; 8] = [
        EventKind::Transfer,
        EventKind::UserProposeWithdraw,
        EventKind::ProposeCooperativeSettle,
        EventKind::ConfirmProviderWithdraw,
        EventKind::InitSession,
        EventKind::JoinSession,
        EventKind::CloseSession,
        EventKind::SendMessage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::ChannelOpened => "ChannelOpened",
            EventKind::UserNewDeposit => "UserNewDeposit",
            EventKind::UserWithdraw => "UserWithdraw",
            EventKind::CooperativeSettled => "CooperativeSettled",
            EventKind::ChannelClosed => "ChannelClosed",
            EventKind::ChannelSettled => "ChannelSettled",
            EventKind::ProviderNewDeposit => "ProviderNewDeposit",
            EventKind::ProviderWithdraw => "ProviderWithdraw",
            EventKind::Transfer => "Transfer",
            EventKind::UserProposeWithdraw => "UserProposeWithdraw",
            EventKind::ProposeCooperativeSettle => "ProposeCooperativeSettle",
            EventKind::ConfirmProviderWithdraw => "ConfirmProviderWithdraw",
            EventKind::InitSession => "InitSession",
            EventKind::JoinSession => "JoinSession",
            EventKind::CloseSession => "CloseSession",
            EventKind::SendMessage => "SendMessage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::PRIMARY
            .iter()
            .chain(Self::APP.iter())
            .copied()
            .find(|kind| kind.name() == name)
    }

    pub fn ledger(self) -> Ledger {
        if Self::PRIMARY.contains(&self) {
            Ledger::Primary
        } else {
            Ledger::App
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "returnValues")]
pub enum ContractEvent {
    // primary chain
    #[serde(rename_all = "camelCase")]
    ChannelOpened {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        user: Address,
        token: Address,
        #[serde(with = "u256_quantity")]
        amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    UserNewDeposit {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        user: Address,
        token: Address,
        #[serde(with = "u256_quantity")]
        new_deposit: U256,
        #[serde(with = "u256_quantity")]
        total_deposit: U256,
    },
    #[serde(rename_all = "camelCase")]
    UserWithdraw {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        user: Address,
        token: Address,
        #[serde(with = "u256_quantity")]
        amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    CooperativeSettled {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        user: Address,
        token: Address,
        #[serde(with = "u256_quantity")]
        balance: U256,
    },
    #[serde(rename_all = "camelCase")]
    ChannelClosed {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        closer: Address,
        #[serde(with = "u256_quantity")]
        balance: U256,
        #[serde(with = "u64_quantity")]
        nonce: u64,
    },
    #[serde(rename_all = "camelCase")]
    ChannelSettled {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        #[serde(with = "u256_quantity")]
        transfer_to_user_amount: U256,
        #[serde(with = "u256_quantity")]
        transfer_to_provider_amount: U256,
    },
    ProviderNewDeposit {
        token: Address,
        #[serde(with = "u256_quantity")]
        amount: U256,
    },
    ProviderWithdraw {
        token: Address,
        #[serde(with = "u256_quantity")]
        amount: U256,
    },

    // application chain
    #[serde(rename_all = "camelCase")]
    Transfer {
        from: Address,
        to: Address,
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        #[serde(with = "u256_quantity")]
        balance: U256,
        #[serde(with = "u64_quantity")]
        nonce: u64,
        additional_hash: H256,
        signature: Signature,
    },
    #[serde(rename_all = "camelCase")]
    UserProposeWithdraw {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        user: Address,
        #[serde(with = "u256_quantity")]
        balance: U256,
        #[serde(with = "u64_quantity")]
        last_commit_block: u64,
    },
    #[serde(rename_all = "camelCase")]
    ProposeCooperativeSettle {
        #[serde(rename = "channelID")]
        channel_id: ChannelId,
        user: Address,
        #[serde(with = "u256_quantity")]
        balance: U256,
        #[serde(with = "u64_quantity")]
        last_commit_block: u64,
    },
    #[serde(rename_all = "camelCase")]
    ConfirmProviderWithdraw {
        token: Address,
        #[serde(with = "u256_quantity")]
        balance: U256,
        #[serde(with = "u64_quantity")]
        last_commit_block: u64,
        signature: Signature,
    },
    #[serde(rename_all = "camelCase")]
    InitSession {
        #[serde(rename = "sessionID")]
        session_id: H256,
    },
    #[serde(rename_all = "camelCase")]
    JoinSession {
        #[serde(rename = "sessionID")]
        session_id: H256,
        user: Address,
    },
    #[serde(rename_all = "camelCase")]
    CloseSession {
        #[serde(rename = "sessionID")]
        session_id: H256,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        #[serde(rename = "sessionID")]
        session_id: H256,
        from: Address,
        to: Address,
        content: String,
    },
}

/// State an event applies to. Events sharing a key are handled in chain
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKey {
    Channel(ChannelId),
    Token(Address),
    Session(H256),
}

impl ContractEvent {
    pub fn key(&self) -> EventKey {
        match self {
            ContractEvent::ChannelOpened { channel_id, .. }
            | ContractEvent::UserNewDeposit { channel_id, .. }
            | ContractEvent::UserWithdraw { channel_id, .. }
            | ContractEvent::CooperativeSettled { channel_id, .. }
            | ContractEvent::ChannelClosed { channel_id, .. }
            | ContractEvent::ChannelSettled { channel_id, .. }
            | ContractEvent::Transfer { channel_id, .. }
            | ContractEvent::UserProposeWithdraw { channel_id, .. }
            | ContractEvent::ProposeCooperativeSettle { channel_id, .. } => {
                EventKey::Channel(*channel_id)
            }
            ContractEvent::ProviderNewDeposit { token, .. }
            | ContractEvent::ProviderWithdraw { token, .. }
            | ContractEvent::ConfirmProviderWithdraw { token, .. } => EventKey::Token(*token),
            ContractEvent::InitSession { session_id }
            | ContractEvent::JoinSession { session_id, .. }
            | ContractEvent::CloseSession { session_id }
            | ContractEvent::SendMessage { session_id, .. } => EventKey::Session(*session_id),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ContractEvent::ChannelOpened { .. } => EventKind::ChannelOpened,
            ContractEvent::UserNewDeposit { .. } => EventKind::UserNewDeposit,
            ContractEvent::UserWithdraw { .. } => EventKind::UserWithdraw,
            ContractEvent::CooperativeSettled { .. } => EventKind::CooperativeSettled,
            ContractEvent::ChannelClosed { .. } => EventKind::ChannelClosed,
            ContractEvent::ChannelSettled { .. } => EventKind::ChannelSettled,
            ContractEvent::ProviderNewDeposit { .. } => EventKind::ProviderNewDeposit,
            ContractEvent::ProviderWithdraw { .. } => EventKind::ProviderWithdraw,
            ContractEvent::Transfer { .. } => EventKind::Transfer,
            ContractEvent::UserProposeWithdraw { .. } => EventKind::UserProposeWithdraw,
            ContractEvent::ProposeCooperativeSettle { .. } => EventKind::ProposeCooperativeSettle,
            ContractEvent::ConfirmProviderWithdraw { .. } => EventKind::ConfirmProviderWithdraw,
            ContractEvent::InitSession { .. } => EventKind::InitSession,
            ContractEvent::JoinSession { .. } => EventKind::JoinSession,
            ContractEvent::CloseSession { .. } => EventKind::CloseSession,
            ContractEvent::SendMessage { .. } => EventKind::SendMessage,
        }
    }

    /// Encode back into gateway form, used by in-memory chains.
    pub fn to_raw(
        &self,
        address: Address,
        block_number: u64,
        log_index: u64,
    ) -> Result<RawEvent, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let return_values = match value.get("returnValues") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Ok(RawEvent {
            event: self.kind().name().to_string(),
            address,
            block_number,
            log_index,
            transaction_hash: H256::zero(),
            return_values,
        })
    }
}
