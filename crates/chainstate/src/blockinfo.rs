//! Per-level block index entries and their persisted formats.

use primitive_types::U256;
use unityd_consensus::{ChainDifficulty, Hash256, ZERO_HASH};
use unityd_primitives::encoding::{DecodeError, Decoder, Encoder};

/// On-disk layout of a level of [`BlockInfo`] entries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexFormat {
    /// `hash | cumulative | main` per entry.
    Legacy,
    /// Adds the antiparent hash and both difficulty accumulators.
    Current,
}

impl IndexFormat {
    pub fn as_u8(self) -> u8 {
        match self {
            IndexFormat::Legacy => 1,
            IndexFormat::Current => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(IndexFormat::Legacy),
            2 => Some(IndexFormat::Current),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockInfo {
    pub hash: Hash256,
    /// Nearest ancestor sealed with the other seal type.
    pub antiparent_hash: Hash256,
    pub mining_difficulty: U256,
    pub staking_difficulty: U256,
    pub cumulative_difficulty: U256,
    pub main_chain: bool,
}

impl BlockInfo {
    pub fn new(
        hash: Hash256,
        antiparent_hash: Hash256,
        difficulty: ChainDifficulty,
        main_chain: bool,
    ) -> Self {
        Self {
            hash,
            antiparent_hash,
            mining_difficulty: difficulty.mining,
            staking_difficulty: difficulty.staking,
            cumulative_difficulty: difficulty.total(),
            main_chain,
        }
    }

    pub fn chain_difficulty(&self) -> ChainDifficulty {
        ChainDifficulty::new(self.mining_difficulty, self.staking_difficulty)
    }

    pub fn with_main_chain(&self, main_chain: bool) -> Self {
        Self {
            main_chain,
            ..self.clone()
        }
    }

    /// True when the stored accumulators and their product agree with `expected`.
    pub fn matches(&self, expected: &ChainDifficulty) -> bool {
        self.mining_difficulty == expected.mining
            && self.staking_difficulty == expected.staking
            && self.cumulative_difficulty == expected.total()
    }

    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.hash);
        encoder.write_u256(&self.cumulative_difficulty);
        encoder.write_bool(self.main_chain);
        encoder.write_hash(&self.antiparent_hash);
        encoder.write_u256(&self.mining_difficulty);
        encoder.write_u256(&self.staking_difficulty);
    }

    fn decode_from(decoder: &mut Decoder, format: IndexFormat) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash()?;
        let cumulative_difficulty = decoder.read_u256()?;
        let main_chain = decoder.read_bool()?;
        match format {
            IndexFormat::Legacy => Ok(Self {
                hash,
                antiparent_hash: ZERO_HASH,
                mining_difficulty: cumulative_difficulty,
                staking_difficulty: U256::one(),
                cumulative_difficulty,
                main_chain,
            }),
            IndexFormat::Current => {
                let antiparent_hash = decoder.read_hash()?;
                let mining_difficulty = decoder.read_u256()?;
                let staking_difficulty = decoder.read_u256()?;
                Ok(Self {
                    hash,
                    antiparent_hash,
                    mining_difficulty,
                    staking_difficulty,
                    cumulative_difficulty,
                    main_chain,
                })
            }
        }
    }
}

pub fn encode_level(infos: &[BlockInfo]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(infos.len() as u64);
    for info in infos {
        info.encode_into(&mut encoder);
    }
    encoder.into_inner()
}

pub fn decode_level(bytes: &[u8], format: IndexFormat) -> Result<Vec<BlockInfo>, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let count = decoder.read_varint()?;
    let mut infos = Vec::with_capacity(count.min(16) as usize);
    for _ in 0..count {
        infos.push(BlockInfo::decode_from(&mut decoder, format)?);
    }
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(infos)
}

pub fn find_info<'a>(infos: &'a [BlockInfo], hash: &Hash256) -> Option<&'a BlockInfo> {
    infos.iter().find(|info| &info.hash == hash)
}

pub fn main_chain_info(infos: &[BlockInfo]) -> Option<&BlockInfo> {
    infos.iter().find(|info| info.main_chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use unityd_consensus::SealType;

    fn sample(tag: u8, main_chain: bool) -> BlockInfo {
        let difficulty =
            ChainDifficulty::genesis(SealType::Mining, U256::from(16u64)).extend(SealType::Staking, U256::from(tag));
        BlockInfo::new([tag; 32], [tag.wrapping_add(1); 32], difficulty, main_chain)
    }

    #[test]
    fn current_level_decodes_every_field() {
        let level = vec![sample(3, false), sample(4, true)];
        let bytes = encode_level(&level);
        let decoded = decode_level(&bytes, IndexFormat::Current).expect("decode");
        assert_eq!(decoded, level);
        assert_eq!(decoded[1].cumulative_difficulty, U256::from(16u64 * 5));
    }

    #[test]
    fn legacy_entries_decode_as_mining_only() {
        let mut encoder = Encoder::new();
        encoder.write_varint(1);
        encoder.write_hash(&[9u8; 32]);
        encoder.write_u256(&U256::from(1234u64));
        encoder.write_bool(true);
        let bytes = encoder.into_inner();

        let decoded = decode_level(&bytes, IndexFormat::Legacy).expect("legacy");
        assert_eq!(decoded.len(), 1);
        let info = &decoded[0];
        assert_eq!(info.hash, [9u8; 32]);
        assert_eq!(info.antiparent_hash, ZERO_HASH);
        assert_eq!(info.mining_difficulty, U256::from(1234u64));
        assert_eq!(info.staking_difficulty, U256::one());
        assert_eq!(info.cumulative_difficulty, U256::from(1234u64));
        assert!(info.main_chain);

        assert!(decode_level(&bytes, IndexFormat::Current).is_err());
    }

    #[test]
    fn main_flag_replacement_keeps_other_fields() {
        let info = sample(7, false);
        let main = info.with_main_chain(true);
        assert!(main.main_chain);
        assert_eq!(main.hash, info.hash);
        assert!(main.matches(&info.chain_difficulty()));
    }
}
