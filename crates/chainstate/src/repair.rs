//! Destructive maintenance and targeted repairs of the block index.

use unityd_consensus::{ChainDifficulty, Hash256, ZERO_HASH};
use unityd_primitives::block::Block;
use unityd_primitives::hex::short_hex;
use unityd_storage::KeyValueStore;

use crate::blockinfo::BlockInfo;
use crate::error::ChainError;
use crate::index::BranchIndex;
use crate::store::{
    child_antiparent, find_best, info_at, loop_back_to_common_block, set_main_flag, BlockStore,
    IntegrityCheckResult,
};

impl<S: KeyValueStore> BlockStore<S> {
    /// Deletes every block and index level above `previous_level` and re-derives
    /// the main chain entry at `previous_level`.
    pub fn revert(&self, previous_level: u64) -> Result<(), ChainError> {
        let mut index = self.lock()?;
        let best = match find_best(&index)? {
            Some(best) => best,
            None => return Ok(()),
        };
        if previous_level >= best.number() {
            return Ok(());
        }

        let top = index.max_number().unwrap_or(0).max(best.number());
        let mut best_line = Some(best.block);
        for level in (previous_level + 1..=top).rev() {
            let on_best_line = best_line
                .as_ref()
                .is_some_and(|block| block.number() == level);
            match index.level(level)? {
                Some(infos) => {
                    for info in &infos {
                        index.delete_body(&info.hash)?;
                    }
                    index.remove_level(level)?;
                }
                None => {
                    unityd_log::log_error!(
                        "Null block information found at {} when data should exist.",
                        level
                    );
                    if let Some(block) = best_line.as_ref().filter(|_| on_best_line) {
                        index.delete_body(&block.hash())?;
                    }
                }
            }
            if on_best_line {
                best_line = match best_line.take() {
                    Some(block) => index.body(&block.parent_hash())?,
                    None => None,
                };
            }
        }

        let best_line = match best_line {
            Some(block) => block,
            None => {
                unityd_log::log_error!(
                    "Block at level #{} is null. Reverting further back may be required.",
                    previous_level
                );
                return Ok(());
            }
        };

        let mut infos = index.level(previous_level)?.unwrap_or_default();
        let best_hash = best_line.hash();
        if !infos.iter().any(|info| info.hash == best_hash) {
            let (difficulty, antiparent) = expected_entry(&index, &best_line)?
                .ok_or(ChainError::CorruptIndex("cannot rebuild the index entry at the revert height"))?;
            infos.push(BlockInfo::new(best_hash, antiparent, difficulty, false));
            index.set_level(previous_level, &infos)?;
        }

        let best_total = infos
            .iter()
            .find(|info| info.hash == best_hash)
            .map(|info| info.cumulative_difficulty)
            .unwrap_or_default();
        let heaviest = infos
            .iter()
            .filter(|info| info.cumulative_difficulty > best_total)
            .max_by(|left, right| left.cumulative_difficulty.cmp(&right.cumulative_difficulty))
            .map(|info| info.hash);
        match heaviest {
            None => set_main_flag(&mut index, &best_line, true),
            Some(fork_hash) => {
                let fork_line = index
                    .body(&fork_hash)?
                    .ok_or(ChainError::MissingBlock(fork_hash))?;
                loop_back_to_common_block(&mut index, best_line, fork_line).map(|_| ())
            }
        }
    }

    /// Keeps only the main chain and recomputes every level from genesis upward.
    pub fn prune_and_correct(&self) -> Result<(), ChainError> {
        let mut index = self.lock()?;
        let best = match find_best(&index)? {
            Some(best) => best,
            None => return Ok(()),
        };

        if let Some(top) = index.max_number() {
            for level in (best.number() + 1..=top).rev() {
                for info in index.level(level)?.unwrap_or_default() {
                    index.delete_body(&info.hash)?;
                }
                index.remove_level(level)?;
            }
        }

        let mut line = Vec::new();
        let mut current = Some(best.block);
        while let Some(block) = current {
            prune_side_chains(&index, &block)?;
            current = if block.header.is_genesis() {
                None
            } else {
                let parent = index.body(&block.parent_hash())?;
                if parent.is_none() {
                    unityd_log::log_error!(
                        "Missing parent of block {} at level {}; pruning stops here.",
                        short_hex(&block.hash()),
                        block.number()
                    );
                    return Ok(());
                }
                parent
            };
            line.push(block);
        }
        line.reverse();

        let mut parent: Option<(Block, BlockInfo)> = None;
        for block in line {
            let level = block.number();
            let hash = block.hash();
            let (difficulty, antiparent) = match &parent {
                Some((parent_block, parent_info)) => (
                    parent_info
                        .chain_difficulty()
                        .extend(block.header.seal_type, block.header.difficulty),
                    child_antiparent(parent_block, Some(parent_info), block.header.seal_type),
                ),
                None if block.header.is_genesis() => (
                    ChainDifficulty::genesis(block.header.seal_type, block.header.difficulty),
                    ZERO_HASH,
                ),
                None => match info_at(&index, &hash, level)? {
                    Some(info) => (info.chain_difficulty(), info.antiparent_hash),
                    None => (
                        ChainDifficulty::from_total(block.header.difficulty),
                        ZERO_HASH,
                    ),
                },
            };
            let info = BlockInfo::new(hash, antiparent, difficulty, true);
            index.set_level(level, std::slice::from_ref(&info))?;
            unityd_log::log_info!(
                "Updated total difficulty on level {} to {}.",
                level,
                info.cumulative_difficulty
            );
            parent = Some((block, info));
        }
        Ok(())
    }

    /// Verifies the stored difficulty accumulators from the best block down to
    /// genesis and rewrites every level bottom-up when any of them is wrong.
    pub fn index_integrity_check(&self) -> Result<IntegrityCheckResult, ChainError> {
        let mut index = self.lock()?;
        let best = match find_best(&index)? {
            Some(best) => best,
            None => return Ok(IntegrityCheckResult::Correct),
        };
        unityd_log::log_info!("Checking the integrity of the total difficulty information...");

        let mut correct = true;
        let mut block = best.block;
        while correct && !block.header.is_genesis() {
            let parent = index.body(&block.parent_hash())?;
            correct = match &parent {
                Some(parent) => match (
                    info_at(&index, &block.hash(), block.number())?,
                    info_at(&index, &parent.hash(), parent.number())?,
                ) {
                    (Some(info), Some(parent_info)) => info.matches(
                        &parent_info
                            .chain_difficulty()
                            .extend(block.header.seal_type, block.header.difficulty),
                    ),
                    _ => false,
                },
                None => false,
            };
            log_check(&block, correct);
            match parent {
                Some(parent) => block = parent,
                None => break,
            }
        }
        if correct && block.header.is_genesis() {
            correct = info_at(&index, &block.hash(), 0)?.is_some_and(|info| {
                info.matches(&ChainDifficulty::genesis(
                    block.header.seal_type,
                    block.header.difficulty,
                ))
            });
            log_check(&block, correct);
        }
        if correct {
            return Ok(IntegrityCheckResult::Correct);
        }

        unityd_log::log_info!("Integrity check of total difficulty found INVALID information. Correcting ...");
        rebuild_difficulties(&mut index)
    }

    /// Raises the stored index size to `max_number + 1` when it is too small.
    pub fn correct_size(&self, max_number: u64) -> Result<(), ChainError> {
        let mut index = self.lock()?;
        let stored = index.size();
        if max_number >= stored {
            index.set_size(max_number.saturating_add(1))?;
            unityd_log::log_info!(
                "Corrupted index size corrected from {} to {}.",
                stored,
                index.size()
            );
        }
        Ok(())
    }

    /// Marks `block` and its ancestors as main chain until one already is.
    pub fn correct_main_chain(&self, block: &Block) -> Result<(), ChainError> {
        let mut index = self.lock()?;
        let mut current = Some(block.clone());
        while let Some(block) = current {
            match info_at(&index, &block.hash(), block.number())? {
                Some(info) if !info.main_chain => {
                    unityd_log::log_info!(
                        "Setting block hash: {}, number: {} to main chain.",
                        short_hex(&block.hash()),
                        block.number()
                    );
                    set_main_flag(&mut index, &block, true)?;
                    current = if block.header.is_genesis() {
                        None
                    } else {
                        index.body(&block.parent_hash())?
                    };
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Inserts or replaces `block`'s entry as a side-chain entry on top of
    /// `parent_difficulty` and returns the block's accumulators.
    pub fn correct_index_entry(
        &self,
        block: &Block,
        parent_difficulty: ChainDifficulty,
    ) -> Result<ChainDifficulty, ChainError> {
        let mut index = self.lock()?;
        let level = block.number();
        let hash = block.hash();
        let difficulty = parent_difficulty.extend(block.header.seal_type, block.header.difficulty);
        let antiparent = crate::store::antiparent_for(&index, block)?;

        let mut infos = index.level(level)?.unwrap_or_default();
        if infos.iter().filter(|info| info.main_chain).count() > 1 {
            unityd_log::log_error!(
                "The database is corrupted. There are two different main chain blocks at level {}. Please stop the node and repair the block information by running the revert command",
                level
            );
        }
        infos.retain(|info| info.hash != hash);
        infos.push(BlockInfo::new(hash, antiparent, difficulty, false));
        index.set_level(level, &infos)?;
        Ok(difficulty)
    }
}

fn log_check(block: &Block, correct: bool) {
    unityd_log::log_info!(
        "Total difficulty for block hash: {} number: {} is {}.",
        short_hex(&block.hash()),
        block.number(),
        if correct { "OK" } else { "NOT OK" }
    );
}

fn prune_side_chains<S: KeyValueStore>(
    index: &BranchIndex<S>,
    block: &Block,
) -> Result<(), ChainError> {
    let level = block.number();
    let hash = block.hash();
    match index.level(level)? {
        Some(infos) => {
            for info in infos.iter().filter(|info| info.hash != hash) {
                index.delete_body(&info.hash)?;
            }
        }
        None => unityd_log::log_error!(
            "Null block information found at {} when data should exist.",
            level
        ),
    }
    Ok(())
}

/// Expected accumulators and antiparent of `block`, derived from its parent's entry.
pub(crate) fn expected_entry<S: KeyValueStore>(
    index: &BranchIndex<S>,
    block: &Block,
) -> Result<Option<(ChainDifficulty, Hash256)>, ChainError> {
    let header = &block.header;
    if header.is_genesis() {
        return Ok(Some((
            ChainDifficulty::genesis(header.seal_type, header.difficulty),
            ZERO_HASH,
        )));
    }
    let parent = match index.body(&header.parent_hash)? {
        Some(parent) => parent,
        None => return Ok(None),
    };
    let parent_info = match info_at(index, &parent.hash(), parent.number())? {
        Some(info) => info,
        None => return Ok(None),
    };
    Ok(Some((
        parent_info
            .chain_difficulty()
            .extend(header.seal_type, header.difficulty),
        child_antiparent(&parent, Some(&parent_info), header.seal_type),
    )))
}

fn rebuild_difficulties<S: KeyValueStore>(
    index: &mut BranchIndex<S>,
) -> Result<IntegrityCheckResult, ChainError> {
    let size = index.size();
    for level in 0..size {
        let infos = match index.level(level)? {
            Some(infos) => infos,
            None if level == 0 => {
                unityd_log::log_error!(
                    "Missing genesis block information. Cannot recover without deleting database."
                );
                return Ok(IntegrityCheckResult::MissingGenesis);
            }
            None => {
                unityd_log::log_error!(
                    "Missing block information at level {}. Cannot recover without reverting to block number {}.",
                    level,
                    level - 1
                );
                return Ok(IntegrityCheckResult::MissingLevel);
            }
        };

        let mut corrected = Vec::with_capacity(infos.len());
        for info in infos {
            let block = match index.body(&info.hash)? {
                Some(block) => block,
                None => {
                    unityd_log::log_error!(
                        "Block {} indexed at level {} has no stored body.",
                        short_hex(&info.hash),
                        level
                    );
                    return Ok(IntegrityCheckResult::Error);
                }
            };
            let (difficulty, antiparent) = match expected_entry(index, &block)? {
                Some(expected) => expected,
                None => {
                    unityd_log::log_error!(
                        "Parent of block {} at level {} is not indexed.",
                        short_hex(&info.hash),
                        level
                    );
                    return Ok(IntegrityCheckResult::Error);
                }
            };
            let fixed = BlockInfo::new(info.hash, antiparent, difficulty, info.main_chain);
            unityd_log::log_info!(
                "Correcting total difficulty for block hash: {} number: {} to {}.",
                short_hex(&fixed.hash),
                level,
                fixed.cumulative_difficulty
            );
            corrected.push(fixed);
        }
        index.set_level(level, &corrected)?;
    }
    unityd_log::log_info!("Total difficulty correction COMPLETE.");
    Ok(IntegrityCheckResult::Fixed)
}
