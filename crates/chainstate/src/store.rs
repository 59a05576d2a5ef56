//! Block store: branch-aware queries and main-chain bookkeeping over the branch index.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use primitive_types::U256;
use serde::Serialize;
use unityd_consensus::constants::BEST_BLOCK_SCAN_DEPTH;
use unityd_consensus::{ChainDifficulty, Hash256, SealType, ZERO_HASH};
use unityd_primitives::block::Block;
use unityd_primitives::hex::{hash256_to_hex, short_hex};
use unityd_storage::KeyValueStore;

use crate::blockinfo::{find_info, main_chain_info, BlockInfo};
use crate::error::ChainError;
use crate::index::BranchIndex;

/// A stored block together with its index entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedBlock {
    pub block: Block,
    pub info: BlockInfo,
}

impl IndexedBlock {
    pub fn hash(&self) -> Hash256 {
        self.info.hash
    }

    pub fn number(&self) -> u64 {
        self.block.number()
    }

    pub fn total_difficulty(&self) -> U256 {
        self.info.cumulative_difficulty
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IntegrityCheckResult {
    Correct,
    Fixed,
    MissingGenesis,
    MissingLevel,
    Error,
}

impl IntegrityCheckResult {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityCheckResult::Correct => "CORRECT",
            IntegrityCheckResult::Fixed => "FIXED",
            IntegrityCheckResult::MissingGenesis => "MISSING_GENESIS",
            IntegrityCheckResult::MissingLevel => "MISSING_LEVEL",
            IntegrityCheckResult::Error => "ERROR",
        }
    }
}

/// All operations take the store lock for their whole duration.
pub struct BlockStore<S> {
    index: Mutex<BranchIndex<S>>,
}

impl<S: KeyValueStore> BlockStore<S> {
    pub fn open(store: Arc<S>) -> Result<Self, ChainError> {
        Ok(Self {
            index: Mutex::new(BranchIndex::open(store)?),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, BranchIndex<S>>, ChainError> {
        self.index
            .lock()
            .map_err(|_| ChainError::Poisoned("block store lock poisoned"))
    }

    /// Main-chain block at the highest indexed level.
    ///
    /// Fails with [`ChainError::CorruptIndex`] when no main-chain entry exists within
    /// [`BEST_BLOCK_SCAN_DEPTH`] levels of the top.
    pub fn best_block(&self) -> Result<Option<IndexedBlock>, ChainError> {
        let index = self.lock()?;
        find_best(&index)
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        let index = self.lock()?;
        index.body(hash)
    }

    pub fn is_block_exist(&self, hash: &Hash256) -> Result<bool, ChainError> {
        let index = self.lock()?;
        index.has_body(hash)
    }

    pub fn chain_block_by_number(&self, number: u64) -> Result<Option<IndexedBlock>, ChainError> {
        let index = self.lock()?;
        chain_block(&index, number)
    }

    /// Every entry at `number` whose body is present, main chain or not.
    pub fn blocks_by_number(&self, number: u64) -> Result<Vec<IndexedBlock>, ChainError> {
        let index = self.lock()?;
        let infos = index.level(number)?.unwrap_or_default();
        let mut blocks = Vec::with_capacity(infos.len());
        for info in infos {
            match index.body(&info.hash)? {
                Some(block) => blocks.push(IndexedBlock { block, info }),
                None => unityd_log::log_warn!(
                    "Block {} indexed at level {} has no stored body",
                    hash256_to_hex(&info.hash),
                    number
                ),
            }
        }
        Ok(blocks)
    }

    /// Consecutive main-chain blocks between `first` and `last`.
    ///
    /// Descending when `first > last`. An ascending range is clamped to the best
    /// height. Returns `None` for `first == 0` or when a body is missing on the way.
    pub fn blocks_by_range(&self, first: u64, last: u64) -> Result<Option<Vec<Block>>, ChainError> {
        if first == 0 {
            return Ok(None);
        }
        let index = self.lock()?;
        let start = match main_chain_body(&index, first)? {
            Some(start) => start,
            None => return Ok(None),
        };

        if first > last {
            let mut blocks = Vec::with_capacity((first - last + 1) as usize);
            let mut current = start;
            while current.number() > last {
                let parent = match index.body(&current.parent_hash())? {
                    Some(parent) => parent,
                    None => return Ok(None),
                };
                blocks.push(current);
                current = parent;
            }
            blocks.push(current);
            return Ok(Some(blocks));
        }

        let top_hash = index
            .level(last)?
            .and_then(|infos| main_chain_info(&infos).map(|info| info.hash));
        let top = match top_hash {
            Some(hash) => match index.body(&hash)? {
                Some(top) => top,
                None => return Ok(None),
            },
            None => match find_best(&index) {
                Ok(Some(best)) if best.number() >= first => best.block,
                Ok(_) | Err(ChainError::MissingBlock(_)) => return Ok(None),
                Err(err) => return Err(err),
            },
        };
        let mut blocks = Vec::with_capacity((top.number() - first + 1) as usize);
        let mut current = top;
        while current.number() > first {
            let parent = match index.body(&current.parent_hash())? {
                Some(parent) => parent,
                None => return Ok(None),
            };
            blocks.push(current);
            current = parent;
        }
        blocks.push(current);
        blocks.reverse();
        Ok(Some(blocks))
    }

    /// Stores the body and appends an index entry at the block's height.
    ///
    /// A main-chain entry clears the flag on every other entry at that height.
    pub fn save_block(
        &self,
        block: &Block,
        difficulty: ChainDifficulty,
        main_chain: bool,
    ) -> Result<BlockInfo, ChainError> {
        let mut index = self.lock()?;
        let antiparent_hash = antiparent_for(&index, block)?;
        let info = BlockInfo::new(block.hash(), antiparent_hash, difficulty, main_chain);
        let number = block.number();
        let mut infos = if number < index.size() {
            match index.level(number)? {
                Some(infos) => infos,
                None => {
                    unityd_log::log_error!(
                        "Null block information found at {} when data should exist.",
                        number
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        infos.retain(|existing| existing.hash != info.hash);
        if main_chain {
            for existing in infos.iter_mut() {
                existing.main_chain = false;
            }
        }
        infos.push(info.clone());
        index.put_body(block)?;
        index.set_level(number, &infos)?;
        Ok(info)
    }

    pub fn block_info(&self, hash: &Hash256, number: u64) -> Result<Option<BlockInfo>, ChainError> {
        let index = self.lock()?;
        info_at(&index, hash, number)
    }

    /// Accumulators of an indexed block, `None` when the block is unknown.
    pub fn chain_difficulty_for_hash(
        &self,
        hash: &Hash256,
    ) -> Result<Option<ChainDifficulty>, ChainError> {
        let index = self.lock()?;
        let block = match index.body(hash)? {
            Some(block) => block,
            None => return Ok(None),
        };
        Ok(info_at(&index, hash, block.number())?.map(|info| info.chain_difficulty()))
    }

    /// Zero when the block is not stored or not indexed.
    pub fn total_difficulty_for_hash(&self, hash: &Hash256) -> Result<U256, ChainError> {
        Ok(self
            .chain_difficulty_for_hash(hash)?
            .map(|difficulty| difficulty.total())
            .unwrap_or_else(U256::zero))
    }

    pub fn block_hash_by_number(&self, number: u64) -> Result<Option<Hash256>, ChainError> {
        let index = self.lock()?;
        Ok(index
            .level(number)?
            .and_then(|infos| main_chain_info(&infos).map(|info| info.hash)))
    }

    pub fn max_number(&self) -> Result<Option<u64>, ChainError> {
        let index = self.lock()?;
        Ok(index.max_number())
    }

    pub fn list_hashes_end_with(&self, hash: &Hash256, qty: u64) -> Result<Vec<Hash256>, ChainError> {
        Ok(self
            .list_blocks_end_with(hash, qty)?
            .iter()
            .map(Block::hash)
            .collect())
    }

    /// Walks parents from `hash`, newest first, returning at most `qty` blocks.
    pub fn list_blocks_end_with(&self, hash: &Hash256, qty: u64) -> Result<Vec<Block>, ChainError> {
        let index = self.lock()?;
        let mut blocks = Vec::new();
        let mut next = index.body(hash)?;
        while let Some(block) = next {
            if blocks.len() as u64 >= qty {
                break;
            }
            next = if block.header.is_genesis() {
                None
            } else {
                index.body(&block.parent_hash())?
            };
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Main-chain hashes from `number` upward, stopping at the first missing level.
    pub fn list_hashes_start_with(&self, number: u64, max_blocks: u64) -> Result<Vec<Hash256>, ChainError> {
        let index = self.lock()?;
        let mut hashes = Vec::new();
        let mut level = number;
        for _ in 0..max_blocks {
            let infos = match index.level(level)? {
                Some(infos) => infos,
                None => break,
            };
            if let Some(info) = main_chain_info(&infos) {
                hashes.push(info.hash);
            }
            level = level.saturating_add(1);
        }
        Ok(hashes)
    }

    pub fn is_indexed(&self, hash: &Hash256, level: u64) -> Result<bool, ChainError> {
        let index = self.lock()?;
        Ok(info_at(&index, hash, level)?.is_some())
    }

    pub fn is_main_chain(&self, hash: &Hash256, level: u64) -> Result<bool, ChainError> {
        let index = self.lock()?;
        Ok(info_at(&index, hash, level)?.is_some_and(|info| info.main_chain))
    }

    /// The hash is indexed at `number` and `number` does not exceed the highest level.
    pub fn is_block_stored(&self, hash: &Hash256, number: u64) -> Result<bool, ChainError> {
        let index = self.lock()?;
        match index.max_number() {
            Some(max) if number <= max => Ok(info_at(&index, hash, number)?.is_some()),
            _ => Ok(false),
        }
    }

    /// Makes `fork` the main chain and returns the height of the common ancestor.
    ///
    /// Flags are rewritten level by level; there is no undo log.
    pub fn re_branch(&self, fork: &Block) -> Result<u64, ChainError> {
        let mut index = self.lock()?;
        let best = find_best(&index)?.ok_or(ChainError::CorruptIndex("rebranch on an empty index"))?;
        let mut best_line = best.block;
        let mut fork_line = fork.clone();

        while best_line.number() > fork_line.number() {
            set_main_flag(&mut index, &best_line, false)?;
            best_line = parent_of(&index, &best_line)?;
        }
        while fork_line.number() > best_line.number() {
            set_main_flag(&mut index, &fork_line, true)?;
            fork_line = parent_of(&index, &fork_line)?;
        }

        loop_back_to_common_block(&mut index, best_line, fork_line)
    }

    /// Writes one JSON object per level for the top `count` levels.
    ///
    /// Returns the number of levels written, `None` when the index is empty.
    pub fn dump_past_blocks<W: Write>(&self, count: u64, writer: &mut W) -> Result<Option<u64>, ChainError> {
        let index = self.lock()?;
        let top = match index.max_number() {
            Some(top) => top,
            None => return Ok(None),
        };
        let bottom = top.saturating_add(1).saturating_sub(count);
        let mut written = 0u64;
        for level in (bottom..=top).rev() {
            let infos = index.level(level)?.unwrap_or_default();
            let mut entries = Vec::with_capacity(infos.len());
            for info in infos {
                let block = index.body(&info.hash)?.map(|block| BlockDump::from_block(&block));
                entries.push(EntryDump {
                    hash: hash256_to_hex(&info.hash),
                    antiparent_hash: hash256_to_hex(&info.antiparent_hash),
                    total_difficulty: info.cumulative_difficulty.to_string(),
                    mining_difficulty: info.mining_difficulty.to_string(),
                    staking_difficulty: info.staking_difficulty.to_string(),
                    main_chain: info.main_chain,
                    missing_body: block.is_none(),
                    block,
                });
            }
            let report = LevelDump {
                level,
                blocks: entries,
            };
            serde_json::to_writer(&mut *writer, &report)
                .map_err(|err| ChainError::Io(std::io::Error::other(err)))?;
            writer.write_all(b"\n")?;
            written += 1;
        }
        writer.flush()?;
        Ok(Some(written))
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        let index = self.lock()?;
        index.flush()
    }
}

#[derive(Serialize)]
struct LevelDump {
    level: u64,
    blocks: Vec<EntryDump>,
}

#[derive(Serialize)]
struct EntryDump {
    hash: String,
    antiparent_hash: String,
    total_difficulty: String,
    mining_difficulty: String,
    staking_difficulty: String,
    main_chain: bool,
    missing_body: bool,
    block: Option<BlockDump>,
}

#[derive(Serialize)]
struct BlockDump {
    number: u64,
    parent_hash: String,
    timestamp: u64,
    difficulty: String,
    seal_type: &'static str,
    coinbase: String,
    state_root: String,
    tx_trie_root: String,
    receipts_root: String,
    energy_limit: u64,
    energy_consumed: u64,
    transactions: Vec<String>,
}

impl BlockDump {
    fn from_block(block: &Block) -> Self {
        let header = &block.header;
        Self {
            number: header.number,
            parent_hash: hash256_to_hex(&header.parent_hash),
            timestamp: header.timestamp,
            difficulty: header.difficulty.to_string(),
            seal_type: header.seal_type.as_str(),
            coinbase: unityd_primitives::hex::bytes_to_hex(&header.coinbase),
            state_root: hash256_to_hex(&header.state_root),
            tx_trie_root: hash256_to_hex(&header.tx_trie_root),
            receipts_root: hash256_to_hex(&header.receipts_root),
            energy_limit: header.energy_limit,
            energy_consumed: header.energy_consumed,
            transactions: block
                .transactions
                .iter()
                .map(|tx| hash256_to_hex(&tx.hash()))
                .collect(),
        }
    }
}

pub(crate) fn info_at<S: KeyValueStore>(
    index: &BranchIndex<S>,
    hash: &Hash256,
    level: u64,
) -> Result<Option<BlockInfo>, ChainError> {
    Ok(index
        .level(level)?
        .and_then(|infos| find_info(&infos, hash).cloned()))
}

pub(crate) fn find_best<S: KeyValueStore>(
    index: &BranchIndex<S>,
) -> Result<Option<IndexedBlock>, ChainError> {
    let top = match index.max_number() {
        Some(top) => top,
        None => return Ok(None),
    };
    let floor = top.saturating_sub(BEST_BLOCK_SCAN_DEPTH);
    for level in (floor..=top).rev() {
        if let Some(found) = chain_block(index, level)? {
            if level != top {
                unityd_log::log_warn!(
                    "No main chain block at level {}; best block found at level {}",
                    top,
                    level
                );
            }
            return Ok(Some(found));
        }
    }
    unityd_log::log_error!(
        "No main chain block found between levels {} and {}. The block index is corrupt.",
        floor,
        top
    );
    Err(ChainError::CorruptIndex(
        "no main chain block near the top of the index",
    ))
}

pub(crate) fn chain_block<S: KeyValueStore>(
    index: &BranchIndex<S>,
    number: u64,
) -> Result<Option<IndexedBlock>, ChainError> {
    let info = match index.level(number)? {
        Some(infos) => match main_chain_info(&infos) {
            Some(info) => info.clone(),
            None => return Ok(None),
        },
        None => return Ok(None),
    };
    let block = index
        .body(&info.hash)?
        .ok_or(ChainError::MissingBlock(info.hash))?;
    Ok(Some(IndexedBlock { block, info }))
}

/// Body of the main-chain block at `number`; `None` when the entry or its body is absent.
fn main_chain_body<S: KeyValueStore>(
    index: &BranchIndex<S>,
    number: u64,
) -> Result<Option<Block>, ChainError> {
    let hash = match index.level(number)? {
        Some(infos) => match main_chain_info(&infos) {
            Some(info) => info.hash,
            None => return Ok(None),
        },
        None => return Ok(None),
    };
    index.body(&hash)
}

pub(crate) fn parent_of<S: KeyValueStore>(
    index: &BranchIndex<S>,
    block: &Block,
) -> Result<Block, ChainError> {
    let parent_hash = block.parent_hash();
    index
        .body(&parent_hash)?
        .ok_or(ChainError::MissingBlock(parent_hash))
}

/// Antiparent of a child of `parent`: inherited when the seal types match, the parent otherwise.
pub(crate) fn child_antiparent(parent: &Block, parent_info: Option<&BlockInfo>, seal: SealType) -> Hash256 {
    if parent.header.seal_type == seal {
        parent_info.map(|info| info.antiparent_hash).unwrap_or(ZERO_HASH)
    } else {
        parent.hash()
    }
}

pub(crate) fn antiparent_for<S: KeyValueStore>(
    index: &BranchIndex<S>,
    block: &Block,
) -> Result<Hash256, ChainError> {
    if block.header.is_genesis() {
        return Ok(ZERO_HASH);
    }
    let parent = match index.body(&block.parent_hash())? {
        Some(parent) => parent,
        None => return Ok(ZERO_HASH),
    };
    let parent_info = info_at(index, &parent.hash(), parent.number())?;
    Ok(child_antiparent(&parent, parent_info.as_ref(), block.header.seal_type))
}

/// Rewrites the main flag of `block`'s entry. Logs when the entry is missing.
pub(crate) fn set_main_flag<S: KeyValueStore>(
    index: &mut BranchIndex<S>,
    block: &Block,
    main_chain: bool,
) -> Result<(), ChainError> {
    let level = block.number();
    let hash = block.hash();
    let mut infos = index.level(level)?.unwrap_or_default();
    match infos.iter().position(|info| info.hash == hash) {
        Some(position) => {
            if main_chain {
                for info in infos.iter_mut() {
                    info.main_chain = false;
                }
            }
            let updated = infos[position].with_main_chain(main_chain);
            infos[position] = updated;
            index.set_level(level, &infos)
        }
        None => {
            unityd_log::log_error!(
                "Null block information found at {} when data should exist.",
                level
            );
            Ok(())
        }
    }
}

/// Swaps flags between two equal-height lines until they meet.
pub(crate) fn loop_back_to_common_block<S: KeyValueStore>(
    index: &mut BranchIndex<S>,
    mut best_line: Block,
    mut fork_line: Block,
) -> Result<u64, ChainError> {
    while best_line.hash() != fork_line.hash() {
        set_main_flag(index, &best_line, false)?;
        set_main_flag(index, &fork_line, true)?;
        if best_line.header.is_genesis() || fork_line.header.is_genesis() {
            return Err(ChainError::CorruptIndex("branches share no common block"));
        }
        best_line = parent_of(index, &best_line)?;
        fork_line = parent_of(index, &fork_line)?;
    }
    unityd_log::log_info!(
        "branching: common block = {}/{}",
        fork_line.number(),
        short_hex(&fork_line.hash())
    );
    Ok(fork_line.number())
}
