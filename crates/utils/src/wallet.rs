//! Operator key and the recoverable signatures it produces over protocol
//! payloads.

use std::path::Path;

use anyhow::{anyhow, ensure, Context, Result};
use faster_hex::hex_decode;
use pn_config::WalletConfig;
use pn_types::{
    hash::keccak256,
    payload::{SignPayload, Signature, SIGNATURE_SIZE},
    Address, H256,
};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

/// Offset added to the recovery id, as expected by `ecrecover`.
const RECOVERY_ID_OFFSET: u8 = 27;

pub struct Signer {
    secp: Secp256k1<All>,
    privkey: SecretKey,
    address: Address,
}

impl Signer {
    pub fn new(privkey: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let pubkey = PublicKey::from_secret_key(&secp, &privkey);
        Signer {
            secp,
            privkey,
            address: pubkey_to_address(&pubkey),
        }
    }

    pub fn from_slice(privkey: &[u8]) -> Result<Self> {
        let privkey = SecretKey::from_slice(privkey).context("invalid privkey")?;
        Ok(Self::new(privkey))
    }

    pub fn from_privkey_path(p: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(p).context("read wallet privkey")?;
        let content = content.trim().trim_start_matches("0x");
        ensure!(content.as_bytes().len() == 64, "invalid privkey length");
        let mut decoded = [0u8; 32];
        hex_decode(content.as_bytes(), &mut decoded)
            .map_err(|err| anyhow!("invalid privkey hex: {}", err))?;
        Self::from_slice(&decoded)
    }

    pub fn from_config(config: &WalletConfig) -> Result<Self> {
        Self::from_privkey_path(&config.privkey_path)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    // sign message
    pub fn sign_message(&self, msg: &H256) -> Result<Signature> {
        let msg = Message::from_slice(msg.as_bytes())?;
        let signature = self.secp.sign_ecdsa_recoverable(&msg, &self.privkey);
        let (recid, data) = signature.serialize_compact();
        let mut inner = [0u8; SIGNATURE_SIZE];
        inner[..64].copy_from_slice(&data);
        inner[64] = recid.to_i32() as u8 + RECOVERY_ID_OFFSET;
        Ok(Signature(inner))
    }

    pub fn sign<P: SignPayload>(&self, payload: &P) -> Result<Signature> {
        self.sign_message(&payload.message_hash())
    }
}

pub fn pubkey_to_address(pubkey: &PublicKey) -> Address {
    let hash = keccak256(&pubkey.serialize_uncompressed()[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

pub fn recover_address(msg: &H256, signature: &Signature) -> Result<Address> {
    let v = signature.0[64];
    let recid = if v >= RECOVERY_ID_OFFSET {
        v - RECOVERY_ID_OFFSET
    } else {
        v
    };
    let recid = RecoveryId::from_i32(recid as i32)?;
    let signature = RecoverableSignature::from_compact(&signature.0[..64], recid)?;
    let msg = Message::from_slice(msg.as_bytes())?;
    let pubkey = Secp256k1::verification_only().recover_ecdsa(&msg, &signature)?;
    Ok(pubkey_to_address(&pubkey))
}

/// Whether `signature` over `payload` was produced by `claimed`. Addresses are
/// compared as bytes, so hex casing never matters.
pub fn verify<P: SignPayload>(payload: &P, signature: &Signature, claimed: &Address) -> bool {
    match recover_address(&payload.message_hash(), signature) {
        Ok(address) => &address == claimed,
        Err(err) => {
            log::debug!("signature recovery failed: {}", err);
            false
        }
    }
}
