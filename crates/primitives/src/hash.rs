use ripemd::{Digest, Ripemd160};
use sha2::Sha256;
use unityd_consensus::{Address, Hash256};

pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// Double SHA-256; block, header and transaction hashes use this.
pub fn sha256d(data: &[u8]) -> Hash256 {
    Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD160(SHA256(data)); account addresses are derived this way from public keys.
pub fn hash160(data: &[u8]) -> Address {
    Ripemd160::digest(sha256(data)).into()
}
