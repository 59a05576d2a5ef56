//! 2048-bit log bloom filter.

use crate::hash::sha256;

pub const BLOOM_BYTES: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Bloom(pub [u8; BLOOM_BYTES]);

impl Default for Bloom {
    fn default() -> Self {
        Self([0u8; BLOOM_BYTES])
    }
}

impl std::fmt::Debug for Bloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = self.0.iter().map(|byte| byte.count_ones()).sum::<u32>();
        write!(f, "Bloom({set} bits)")
    }
}

impl Bloom {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    /// Sets three bits selected from the SHA-256 of `input`.
    pub fn accrue(&mut self, input: &[u8]) {
        for (index, mask) in bit_positions(input) {
            self.0[index] |= mask;
        }
    }

    pub fn contains_input(&self, input: &[u8]) -> bool {
        bit_positions(input)
            .iter()
            .all(|(index, mask)| self.0[*index] & mask == *mask)
    }

    pub fn or(&mut self, other: &Bloom) {
        for (left, right) in self.0.iter_mut().zip(other.0.iter()) {
            *left |= right;
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; BLOOM_BYTES] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

fn bit_positions(input: &[u8]) -> [(usize, u8); 3] {
    let hash = sha256(input);
    let mut out = [(0usize, 0u8); 3];
    for (slot, chunk) in out.iter_mut().zip(hash.chunks_exact(2)) {
        let bit = ((usize::from(chunk[0]) << 8) | usize::from(chunk[1])) & (BLOOM_BYTES * 8 - 1);
        *slot = (BLOOM_BYTES - 1 - bit / 8, 1u8 << (bit % 8));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrued_inputs_are_found() {
        let mut bloom = Bloom::default();
        assert!(bloom.is_empty());
        bloom.accrue(b"recipient");
        assert!(!bloom.is_empty());
        assert!(bloom.contains_input(b"recipient"));

        let mut merged = Bloom::default();
        let mut other = Bloom::default();
        other.accrue(b"sender");
        merged.or(&bloom);
        merged.or(&other);
        assert!(merged.contains_input(b"recipient"));
        assert!(merged.contains_input(b"sender"));
    }
}
