//! Lowercase hex rendering for logs and block reports.

use std::fmt::Write;

use unityd_consensus::Hash256;

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    bytes_to_hex(hash)
}

/// Short form used in log lines: the first eight hex digits.
pub fn short_hex(hash: &Hash256) -> String {
    bytes_to_hex(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_lowercase_pairs() {
        assert_eq!(bytes_to_hex(&[0x00, 0xab, 0x10]), "00ab10");
        let mut hash = [0u8; 32];
        hash[0] = 0xde;
        hash[3] = 0x01;
        assert_eq!(short_hex(&hash), "de000001");
        assert_eq!(hash256_to_hex(&hash).len(), 64);
    }
}
