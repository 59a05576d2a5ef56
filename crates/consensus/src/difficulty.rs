//! Seal types and hybrid (mining x staking) total difficulty.

use primitive_types::U256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SealType {
    Mining = 1,
    Staking = 2,
}

impl SealType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Mining),
            2 => Some(Self::Staking),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mining => "mining",
            Self::Staking => "staking",
        }
    }
}

/// Per-seal difficulty accumulators of a branch, from genesis up to one block.
///
/// Each block adds its own difficulty to the accumulator of its seal type and
/// inherits the other one from its parent. The branch weight is the product.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainDifficulty {
    pub mining: U256,
    pub staking: U256,
}

impl ChainDifficulty {
    pub fn new(mining: U256, staking: U256) -> Self {
        Self { mining, staking }
    }

    /// Accumulators of a genesis block. The accumulator of the other seal type starts at one.
    pub fn genesis(seal: SealType, difficulty: U256) -> Self {
        match seal {
            SealType::Mining => Self::new(difficulty, U256::one()),
            SealType::Staking => Self::new(U256::one(), difficulty),
        }
    }

    /// Accumulators for a legacy entry that only recorded a total.
    pub fn from_total(total: U256) -> Self {
        Self::new(total, U256::one())
    }

    pub fn extend(&self, seal: SealType, difficulty: U256) -> Self {
        match seal {
            SealType::Mining => Self::new(self.mining.saturating_add(difficulty), self.staking),
            SealType::Staking => Self::new(self.mining, self.staking.saturating_add(difficulty)),
        }
    }

    pub fn total(&self) -> U256 {
        self.mining.saturating_mul(self.staking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(value: u64) -> U256 {
        U256::from(value)
    }

    #[test]
    fn mining_only_chain_is_additive() {
        let genesis = ChainDifficulty::genesis(SealType::Mining, u(16));
        assert_eq!(genesis.total(), u(16));
        let one = genesis.extend(SealType::Mining, u(100));
        let two = one.extend(SealType::Mining, u(150));
        assert_eq!(two.total(), u(266));
        assert_eq!(two.staking, U256::one());
    }

    #[test]
    fn alternating_seals_multiply() {
        let genesis = ChainDifficulty::genesis(SealType::Mining, u(2));
        let staked = genesis.extend(SealType::Staking, u(4));
        assert_eq!(staked, ChainDifficulty::new(u(2), u(5)));
        assert_eq!(staked.total(), u(10));

        let mined = staked.extend(SealType::Mining, u(3));
        assert_eq!(mined, ChainDifficulty::new(u(5), u(5)));
        assert_eq!(mined.total(), u(25));

        // parent total plus the opposite accumulator times the block difficulty
        assert_eq!(mined.total(), staked.total() + staked.staking * u(3));
    }

    #[test]
    fn totals_saturate() {
        let huge = ChainDifficulty::new(U256::MAX, u(2));
        assert_eq!(huge.total(), U256::MAX);
        assert_eq!(huge.extend(SealType::Mining, u(1)).mining, U256::MAX);
    }

    #[test]
    fn seal_type_bytes() {
        assert_eq!(SealType::from_u8(1), Some(SealType::Mining));
        assert_eq!(SealType::from_u8(2), Some(SealType::Staking));
        assert_eq!(SealType::from_u8(0), None);
        assert_eq!(SealType::Staking.as_u8(), 2);
    }
}
