use unityd_consensus::{Hash256, ZERO_HASH};

use crate::hash::sha256d;

/// Double-SHA256 merkle root; odd levels duplicate their last node. Empty input yields the zero hash.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    let mut level: Vec<Hash256> = leaves.to_vec();
    let mut buf = [0u8; 64];
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            buf[..32].copy_from_slice(left);
            buf[32..].copy_from_slice(right);
            next.push(sha256d(&buf));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(left: &Hash256, right: &Hash256) -> Hash256 {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(left);
        buf.extend_from_slice(right);
        sha256d(&buf)
    }

    #[test]
    fn empty_and_single_leaf() {
        assert_eq!(merkle_root(&[]), ZERO_HASH);
        assert_eq!(merkle_root(&[[7u8; 32]]), [7u8; 32]);
    }

    #[test]
    fn odd_level_duplicates_last() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        let expected = pair(&pair(&a, &b), &pair(&c, &c));
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }
}
