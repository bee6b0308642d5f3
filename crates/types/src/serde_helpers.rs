//! Serde adapters for the loosely formatted quantities chain gateways return.
//!
//! Quantities arrive either as JSON numbers, decimal strings or `0x`-prefixed
//! hex strings depending on the gateway, so every numeric field of a decoded
//! event or contract view goes through one of these.

use ethereum_types::U256;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Quantity {
    Num(u64),
    Str(String),
}

pub fn parse_u256(s: &str) -> Result<U256, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|err| format!("{:?}", err)),
        None => U256::from_dec_str(s).map_err(|err| format!("{:?}", err)),
    }
}

pub fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|err| err.to_string()),
        None => s.parse().map_err(|err: std::num::ParseIntError| err.to_string()),
    }
}

pub mod u256_quantity {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Quantity::deserialize(deserializer)? {
            Quantity::Num(n) => Ok(U256::from(n)),
            Quantity::Str(s) => parse_u256(&s).map_err(D::Error::custom),
        }
    }
}

pub mod u64_quantity {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Quantity::deserialize(deserializer)? {
            Quantity::Num(n) => Ok(n),
            Quantity::Str(s) => parse_u64(&s).map_err(D::Error::custom),
        }
    }
}
