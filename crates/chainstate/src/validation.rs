//! Header rules and transaction checks applied before a block is executed.

use std::collections::HashMap;

use primitive_types::U256;
use rayon::prelude::*;
use unityd_consensus::constants::{MAXIMUM_EXTRA_DATA_SIZE, SIGNATURE_LENGTH};
use unityd_consensus::{Address, ChainParams};
use unityd_primitives::block::{tx_trie_root, Block, BlockHeader};
use unityd_primitives::transaction::{SignatureError, TX_TYPE_TRANSFER};

use crate::error::StateError;
use crate::world::AccountState;

/// Allowed energy limit change between parent and child is `parent / ENERGY_LIMIT_BOUND_DIVISOR`.
pub const ENERGY_LIMIT_BOUND_DIVISOR: u64 = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderError {
    ExtraDataTooLarge(usize),
    EnergyConsumedAboveLimit,
    DifficultyBelowMinimum,
    EnergyLimitBelowBound,
    NumberMismatch,
    TimestampNotAfterParent,
    EnergyLimitOutOfBounds,
    DifficultyOutOfBounds,
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::ExtraDataTooLarge(len) => write!(f, "extra data too large ({len} bytes)"),
            HeaderError::EnergyConsumedAboveLimit => write!(f, "energy consumed above energy limit"),
            HeaderError::DifficultyBelowMinimum => write!(f, "difficulty below minimum"),
            HeaderError::EnergyLimitBelowBound => write!(f, "energy limit below lower bound"),
            HeaderError::NumberMismatch => write!(f, "block number does not follow parent"),
            HeaderError::TimestampNotAfterParent => write!(f, "timestamp not after parent"),
            HeaderError::EnergyLimitOutOfBounds => write!(f, "energy limit changed too much"),
            HeaderError::DifficultyOutOfBounds => write!(f, "difficulty changed too much"),
        }
    }
}

impl std::error::Error for HeaderError {}

#[derive(Debug)]
pub enum ValidationError {
    Header(HeaderError),
    TxTrieMismatch,
    InvalidTransaction { index: usize, reason: &'static str },
    Signature { index: usize, error: SignatureError },
    NonceMismatch { index: usize, expected: u64, found: u64 },
    State(StateError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Header(err) => write!(f, "{err}"),
            ValidationError::TxTrieMismatch => write!(f, "transaction trie root mismatch"),
            ValidationError::InvalidTransaction { index, reason } => {
                write!(f, "transaction {index}: {reason}")
            }
            ValidationError::Signature { index, error } => {
                write!(f, "transaction {index}: {error}")
            }
            ValidationError::NonceMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "transaction {index}: invalid nonce (expected {expected}, found {found})"
            ),
            ValidationError::State(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<HeaderError> for ValidationError {
    fn from(err: HeaderError) -> Self {
        ValidationError::Header(err)
    }
}

impl From<StateError> for ValidationError {
    fn from(err: StateError) -> Self {
        ValidationError::State(err)
    }
}

pub trait HeaderRule: Send + Sync {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError>;
}

pub trait ParentRule: Send + Sync {
    fn validate(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), HeaderError>;
}

pub trait GrandparentRule: Send + Sync {
    fn validate(
        &self,
        grandparent: &BlockHeader,
        parent: &BlockHeader,
        header: &BlockHeader,
    ) -> Result<(), HeaderError>;
}

/// Pluggable header checks, grouped by how much ancestry they need.
#[derive(Default)]
pub struct HeaderValidators {
    header: Vec<Box<dyn HeaderRule>>,
    parent: Vec<Box<dyn ParentRule>>,
    grandparent: Vec<Box<dyn GrandparentRule>>,
}

impl HeaderValidators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard(params: &ChainParams) -> Self {
        Self::new()
            .with_header_rule(ExtraDataRule {
                max_len: MAXIMUM_EXTRA_DATA_SIZE,
            })
            .with_header_rule(EnergyConsumedRule)
            .with_header_rule(MinimumDifficultyRule {
                minimum: params.minimum_difficulty,
            })
            .with_header_rule(EnergyLimitFloorRule {
                lower_bound: params.energy_lower_bound,
            })
            .with_parent_rule(ParentNumberRule)
            .with_parent_rule(TimestampRule)
            .with_parent_rule(EnergyLimitDeltaRule)
            .with_grandparent_rule(DifficultyAdjustmentRule {
                minimum: params.minimum_difficulty,
            })
    }

    pub fn with_header_rule(mut self, rule: impl HeaderRule + 'static) -> Self {
        self.header.push(Box::new(rule));
        self
    }

    pub fn with_parent_rule(mut self, rule: impl ParentRule + 'static) -> Self {
        self.parent.push(Box::new(rule));
        self
    }

    pub fn with_grandparent_rule(mut self, rule: impl GrandparentRule + 'static) -> Self {
        self.grandparent.push(Box::new(rule));
        self
    }

    pub fn validate_header(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        self.header.iter().try_for_each(|rule| rule.validate(header))
    }

    pub fn validate_parent(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), HeaderError> {
        self.parent
            .iter()
            .try_for_each(|rule| rule.validate(header, parent))
    }

    pub fn validate_grandparent(
        &self,
        grandparent: &BlockHeader,
        parent: &BlockHeader,
        header: &BlockHeader,
    ) -> Result<(), HeaderError> {
        self.grandparent
            .iter()
            .try_for_each(|rule| rule.validate(grandparent, parent, header))
    }

    /// Runs every rule group; grandparent rules are skipped for children of genesis.
    pub fn validate(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        grandparent: Option<&BlockHeader>,
    ) -> Result<(), HeaderError> {
        self.validate_header(header)?;
        self.validate_parent(header, parent)?;
        if let Some(grandparent) = grandparent {
            self.validate_grandparent(grandparent, parent, header)?;
        }
        Ok(())
    }
}

pub struct ExtraDataRule {
    pub max_len: usize,
}

impl HeaderRule for ExtraDataRule {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        if header.extra_data.len() > self.max_len {
            return Err(HeaderError::ExtraDataTooLarge(header.extra_data.len()));
        }
        Ok(())
    }
}

pub struct EnergyConsumedRule;

impl HeaderRule for EnergyConsumedRule {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        if header.energy_consumed > header.energy_limit {
            return Err(HeaderError::EnergyConsumedAboveLimit);
        }
        Ok(())
    }
}

pub struct MinimumDifficultyRule {
    pub minimum: u64,
}

impl HeaderRule for MinimumDifficultyRule {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        if header.difficulty < U256::from(self.minimum) {
            return Err(HeaderError::DifficultyBelowMinimum);
        }
        Ok(())
    }
}

pub struct EnergyLimitFloorRule {
    pub lower_bound: u64,
}

impl HeaderRule for EnergyLimitFloorRule {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        if header.energy_limit < self.lower_bound {
            return Err(HeaderError::EnergyLimitBelowBound);
        }
        Ok(())
    }
}

pub struct ParentNumberRule;

impl ParentRule for ParentNumberRule {
    fn validate(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), HeaderError> {
        if parent.number.checked_add(1) != Some(header.number) {
            return Err(HeaderError::NumberMismatch);
        }
        Ok(())
    }
}

pub struct TimestampRule;

impl ParentRule for TimestampRule {
    fn validate(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), HeaderError> {
        if header.timestamp <= parent.timestamp {
            return Err(HeaderError::TimestampNotAfterParent);
        }
        Ok(())
    }
}

pub struct EnergyLimitDeltaRule;

impl ParentRule for EnergyLimitDeltaRule {
    fn validate(&self, header: &BlockHeader, parent: &BlockHeader) -> Result<(), HeaderError> {
        let delta = header.energy_limit.abs_diff(parent.energy_limit);
        if delta > parent.energy_limit / ENERGY_LIMIT_BOUND_DIVISOR {
            return Err(HeaderError::EnergyLimitOutOfBounds);
        }
        Ok(())
    }
}

/// Difficulty may at most halve or double per block, once the parent itself
/// had a parent to adjust from. The minimum difficulty always stays allowed.
pub struct DifficultyAdjustmentRule {
    pub minimum: u64,
}

impl GrandparentRule for DifficultyAdjustmentRule {
    fn validate(
        &self,
        _grandparent: &BlockHeader,
        parent: &BlockHeader,
        header: &BlockHeader,
    ) -> Result<(), HeaderError> {
        let lower = (parent.difficulty / 2).max(U256::from(self.minimum));
        let upper = parent.difficulty.saturating_mul(U256::from(2u64));
        if header.difficulty < lower || header.difficulty > upper.max(lower) {
            return Err(HeaderError::DifficultyOutOfBounds);
        }
        Ok(())
    }
}

/// Checks the transaction trie root, then each transaction's type and signature
/// in parallel. Returns the recovered senders in block order.
pub fn validate_transactions(block: &Block) -> Result<Vec<Address>, ValidationError> {
    if tx_trie_root(&block.transactions) != block.header.tx_trie_root {
        return Err(ValidationError::TxTrieMismatch);
    }
    block
        .transactions
        .par_iter()
        .enumerate()
        .map(|(index, tx)| {
            if tx.tx_type != TX_TYPE_TRANSFER {
                return Err(ValidationError::InvalidTransaction {
                    index,
                    reason: "unsupported transaction type",
                });
            }
            if tx.signature.len() != SIGNATURE_LENGTH {
                return Err(ValidationError::InvalidTransaction {
                    index,
                    reason: "invalid signature length",
                });
            }
            tx.sender()
                .map_err(|error| ValidationError::Signature { index, error })
        })
        .collect()
}

/// Nonces must chain per sender, starting from the sender's nonce in `state`.
pub fn validate_nonces<A: AccountState + ?Sized>(
    block: &Block,
    senders: &[Address],
    state: &A,
) -> Result<(), ValidationError> {
    let mut expected_nonces: HashMap<Address, u64> = HashMap::new();
    for (index, (tx, sender)) in block.transactions.iter().zip(senders).enumerate() {
        let expected = match expected_nonces.get(sender) {
            Some(nonce) => *nonce,
            None => state.nonce(sender)?,
        };
        if tx.nonce != expected {
            return Err(ValidationError::NonceMismatch {
                index,
                expected,
                found: tx.nonce,
            });
        }
        expected_nonces.insert(*sender, expected.saturating_add(1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unityd_consensus::{chain_params, Network, SealType};
    use unityd_primitives::bloom::Bloom;

    fn header(number: u64, timestamp: u64, difficulty: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: [0u8; 32],
            number,
            timestamp,
            difficulty: U256::from(difficulty),
            state_root: [0u8; 32],
            tx_trie_root: [0u8; 32],
            receipts_root: [0u8; 32],
            log_bloom: Bloom::default(),
            seal_type: SealType::Mining,
            coinbase: [0u8; 20],
            energy_limit: 10_000_000,
            energy_consumed: 0,
            extra_data: Vec::new(),
            seal: Vec::new(),
        }
    }

    #[test]
    fn standard_rules_accept_a_regular_child() {
        let validators = HeaderValidators::standard(&chain_params(Network::Mainnet));
        let grandparent = header(1, 10, 100);
        let parent = header(2, 20, 100);
        let child = header(3, 30, 150);
        validators
            .validate(&child, &parent, Some(&grandparent))
            .expect("valid child");
    }

    #[test]
    fn standard_rules_reject_broken_headers() {
        let validators = HeaderValidators::standard(&chain_params(Network::Mainnet));
        let grandparent = header(1, 10, 100);
        let parent = header(2, 20, 100);

        let mut child = header(3, 30, 100);
        child.extra_data = vec![0u8; MAXIMUM_EXTRA_DATA_SIZE + 1];
        assert_eq!(
            validators.validate(&child, &parent, Some(&grandparent)),
            Err(HeaderError::ExtraDataTooLarge(MAXIMUM_EXTRA_DATA_SIZE + 1))
        );

        let child = header(4, 30, 100);
        assert_eq!(
            validators.validate(&child, &parent, Some(&grandparent)),
            Err(HeaderError::NumberMismatch)
        );

        let child = header(3, 20, 100);
        assert_eq!(
            validators.validate(&child, &parent, Some(&grandparent)),
            Err(HeaderError::TimestampNotAfterParent)
        );

        let child = header(3, 30, 201);
        assert_eq!(
            validators.validate(&child, &parent, Some(&grandparent)),
            Err(HeaderError::DifficultyOutOfBounds)
        );

        let mut child = header(3, 30, 100);
        child.energy_limit = 10_000_000 + 10_000_000 / ENERGY_LIMIT_BOUND_DIVISOR + 1;
        assert_eq!(
            validators.validate(&child, &parent, Some(&grandparent)),
            Err(HeaderError::EnergyLimitOutOfBounds)
        );
    }

    #[test]
    fn grandparent_rules_wait_for_a_grandparent() {
        let validators = HeaderValidators::standard(&chain_params(Network::Regtest));
        let genesis = header(0, 0, 1);
        let child = header(1, 10, 1_000);
        validators
            .validate(&child, &genesis, None)
            .expect("children of genesis skip the adjustment bound");
    }
}
