//! Account-model transactions with recoverable secp256k1 signatures.

use std::sync::OnceLock;

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, Secp256k1, SecretKey};
use unityd_consensus::constants::SIGNATURE_LENGTH;
use unityd_consensus::money::Amount;
use unityd_consensus::{Address, Hash256};

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::{hash160, sha256d};

pub const TX_TYPE_TRANSFER: u8 = 1;

/// Compact signature header for a compressed key, before the recovery id is added.
const COMPRESSED_HEADER_BASE: u8 = 31;

static SECP256K1: OnceLock<Secp256k1<All>> = OnceLock::new();

fn secp() -> &'static Secp256k1<All> {
    SECP256K1.get_or_init(Secp256k1::new)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    InvalidLength(usize),
    InvalidHeader(u8),
    InvalidRecoveryId,
    InvalidSignature,
    InvalidMessage,
    RecoverFailed,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::InvalidLength(len) => {
                write!(f, "signature must be {SIGNATURE_LENGTH} bytes, got {len}")
            }
            SignatureError::InvalidHeader(byte) => write!(f, "invalid signature header {byte}"),
            SignatureError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            SignatureError::InvalidSignature => write!(f, "invalid signature"),
            SignatureError::InvalidMessage => write!(f, "invalid message"),
            SignatureError::RecoverFailed => write!(f, "failed to recover pubkey"),
        }
    }
}

impl std::error::Error for SignatureError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: Amount,
    pub data: Vec<u8>,
    pub energy_limit: u64,
    pub energy_price: u64,
    pub tx_type: u8,
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn transfer(nonce: u64, to: Address, value: Amount) -> Self {
        Self {
            nonce,
            to: Some(to),
            value,
            data: Vec::new(),
            energy_limit: 21_000,
            energy_price: 1,
            tx_type: TX_TYPE_TRANSFER,
            signature: Vec::new(),
        }
    }

    fn encode_unsigned(&self, encoder: &mut Encoder) {
        encoder.write_u64_le(self.nonce);
        match &self.to {
            Some(address) => {
                encoder.write_u8(1);
                encoder.write_address(address);
            }
            None => encoder.write_u8(0),
        }
        encoder.write_u128_le(self.value);
        encoder.write_var_bytes(&self.data);
        encoder.write_u64_le(self.energy_limit);
        encoder.write_u64_le(self.energy_price);
        encoder.write_u8(self.tx_type);
    }

    pub fn consensus_encode_into(&self, encoder: &mut Encoder) {
        self.encode_unsigned(encoder);
        encoder.write_var_bytes(&self.signature);
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode_into(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let nonce = decoder.read_u64_le()?;
        let to = match decoder.read_u8()? {
            0 => None,
            1 => Some(decoder.read_address()?),
            _ => return Err(DecodeError::InvalidData("invalid recipient marker")),
        };
        let value = decoder.read_u128_le()?;
        let data = decoder.read_var_bytes()?;
        let energy_limit = decoder.read_u64_le()?;
        let energy_price = decoder.read_u64_le()?;
        let tx_type = decoder.read_u8()?;
        let signature = decoder.read_var_bytes()?;
        Ok(Self {
            nonce,
            to,
            value,
            data,
            energy_limit,
            energy_price,
            tx_type,
            signature,
        })
    }

    /// Digest covered by the signature (every field except the signature).
    pub fn signing_hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_unsigned(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn sign(&mut self, secret: &SecretKey) -> Result<(), SignatureError> {
        let digest = self.signing_hash();
        let msg = Message::from_digest_slice(&digest).map_err(|_| SignatureError::InvalidMessage)?;
        let sig = secp().sign_ecdsa_recoverable(&msg, secret);
        let (rec_id, bytes) = sig.serialize_compact();
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.push(COMPRESSED_HEADER_BASE + rec_id.to_i32() as u8);
        out.extend_from_slice(&bytes);
        self.signature = out;
        Ok(())
    }

    pub fn signed(mut self, secret: &SecretKey) -> Result<Self, SignatureError> {
        self.sign(secret)?;
        Ok(self)
    }

    /// Recovers the signer and returns its address.
    pub fn sender(&self) -> Result<Address, SignatureError> {
        let recoverable = decode_compact_signature(&self.signature)?;
        let digest = self.signing_hash();
        let msg = Message::from_digest_slice(&digest).map_err(|_| SignatureError::InvalidMessage)?;
        let pubkey = secp()
            .recover_ecdsa(&msg, &recoverable)
            .map_err(|_| SignatureError::RecoverFailed)?;
        Ok(hash160(&pubkey.serialize()))
    }
}

pub fn address_from_secret(secret: &SecretKey) -> Address {
    let pubkey = secp256k1::PublicKey::from_secret_key(secp(), secret);
    hash160(&pubkey.serialize())
}

fn decode_compact_signature(signature: &[u8]) -> Result<RecoverableSignature, SignatureError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let header = signature[0];
    if !(COMPRESSED_HEADER_BASE..COMPRESSED_HEADER_BASE + 4).contains(&header) {
        return Err(SignatureError::InvalidHeader(header));
    }
    let rec_id = RecoveryId::from_i32(i32::from(header - COMPRESSED_HEADER_BASE))
        .map_err(|_| SignatureError::InvalidRecoveryId)?;
    RecoverableSignature::from_compact(&signature[1..], rec_id)
        .map_err(|_| SignatureError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_matches_signing_key() {
        let secret = SecretKey::from_slice(&[1u8; 32]).expect("secret");
        let tx = Transaction::transfer(0, [9u8; 20], 5)
            .signed(&secret)
            .expect("sign");
        assert_eq!(tx.signature.len(), SIGNATURE_LENGTH);
        assert_eq!(tx.sender().expect("sender"), address_from_secret(&secret));
    }

    #[test]
    fn tampered_transaction_recovers_other_sender() {
        let secret = SecretKey::from_slice(&[2u8; 32]).expect("secret");
        let mut tx = Transaction::transfer(0, [9u8; 20], 5)
            .signed(&secret)
            .expect("sign");
        tx.value = 6;
        let recovered = tx.sender();
        assert!(recovered.map_or(true, |addr| addr != address_from_secret(&secret)));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        let mut tx = Transaction::transfer(0, [9u8; 20], 5);
        assert_eq!(tx.sender(), Err(SignatureError::InvalidLength(0)));
        tx.signature = vec![0u8; SIGNATURE_LENGTH];
        assert_eq!(tx.sender(), Err(SignatureError::InvalidHeader(0)));
    }
}
