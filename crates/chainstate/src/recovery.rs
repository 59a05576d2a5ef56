//! Self-healing of missing world state and missing index entries for stored blocks.

use unityd_primitives::block::Block;
use unityd_primitives::hex::short_hex;
use unityd_storage::KeyValueStore;

use crate::chain::{Blockchain, ChainInner};
use crate::error::ChainError;
use crate::executor::BlockExecutor;
use crate::genesis::build_genesis;
use crate::world::empty_root;

impl<S, E> Blockchain<S, E>
where
    S: KeyValueStore + 'static,
    E: BlockExecutor,
{
    /// Re-executes the stored ancestors of `block` that lack a world state, starting
    /// from the closest ancestor whose root is available. Returns whether `block`'s
    /// state root is valid afterwards.
    pub(crate) fn recover_world_state(
        &self,
        inner: &mut ChainInner,
        block: &Block,
    ) -> Result<bool, ChainError> {
        if inner.repository.is_snapshot() {
            unityd_log::log_error!("World state recovery attempted with snapshot repository.");
            return Ok(false);
        }
        unityd_log::log_info!(
            "Pruned or corrupt world state at block hash: {}, number: {}. Looking for ancestor block with valid world state ...",
            short_hex(&block.hash()),
            block.number()
        );
        let original_root = inner.repository.root();

        let mut dirty = vec![block.clone()];
        let mut other = block.clone();
        loop {
            if other.header.is_genesis() {
                break;
            }
            other = match self.store().block_by_hash(&other.parent_hash())? {
                Some(parent) => parent,
                None => return Ok(false),
            };
            dirty.push(other.clone());
            if inner.repository.is_valid_root(&other.header.state_root)? {
                break;
            }
        }

        if !inner.repository.is_valid_root(&other.header.state_root)? {
            let mut scratch = inner.repository.snapshot_to(&empty_root())?;
            let rebuilt = build_genesis(self.params(), scratch.as_mut())?;
            if !other.header.is_genesis() || rebuilt.header.state_root != other.header.state_root {
                unityd_log::log_info!("Rebuild state FAILED because a valid state could not be found.");
                return Ok(false);
            }
            scratch.flush()?;
            unityd_log::log_info!("Rebuilt the genesis world state from the chain parameters.");
        }

        inner.repository.sync_to_root(&other.header.state_root)?;
        dirty.pop();
        unityd_log::log_info!(
            "Valid state found at block hash: {}, number: {}.",
            short_hex(&other.hash()),
            other.number()
        );

        while let Some(next) = dirty.pop() {
            unityd_log::log_info!(
                "Rebuilding block hash: {}, number: {}, txs: {}.",
                short_hex(&next.hash()),
                next.number(),
                next.transactions.len()
            );
            if self.add(inner, &next, true)?.is_none() {
                unityd_log::log_error!(
                    "Rebuilding block {}/{} failed.",
                    next.number(),
                    short_hex(&next.hash())
                );
                break;
            }
        }

        inner.repository.flush()?;
        if inner.repository.is_valid_root(&original_root)? {
            inner.repository.sync_to_root(&original_root)?;
        }
        Ok(inner.repository.is_valid_root(&block.header.state_root)?)
    }

    /// Rebuilds the index entries of `block` and its unindexed ancestors, then
    /// rebranches when the repaired branch outweighs the main chain.
    pub(crate) fn recover_index_entry(
        &self,
        inner: &mut ChainInner,
        block: &Block,
    ) -> Result<bool, ChainError> {
        if inner.repository.is_snapshot() {
            unityd_log::log_error!("Index recovery attempted with snapshot repository.");
            return Ok(false);
        }
        unityd_log::log_info!(
            "Missing index at block hash: {}, number: {}. Looking for ancestor block with valid index ...",
            short_hex(&block.hash()),
            block.number()
        );
        let store = self.store();

        let mut dirty = vec![block.clone()];
        let mut other = block.clone();
        loop {
            if other.header.is_genesis() {
                break;
            }
            other = match store.block_by_hash(&other.parent_hash())? {
                Some(parent) => parent,
                None => return Ok(false),
            };
            dirty.push(other.clone());
            if store.is_indexed(&other.hash(), other.number())? {
                break;
            }
        }
        if !store.is_indexed(&other.hash(), other.number())? {
            unityd_log::log_info!("Rebuild index FAILED because a valid index could not be found.");
            return Ok(false);
        }

        let max_number = store
            .max_number()?
            .unwrap_or(0)
            .max(inner.best.number())
            .max(block.number());
        store.correct_size(max_number)?;

        let anchor = match dirty.pop() {
            Some(anchor) => anchor,
            None => return Ok(false),
        };
        let mut difficulty = match store.chain_difficulty_for_hash(&anchor.hash())? {
            Some(difficulty) => difficulty,
            None => return Ok(false),
        };
        unityd_log::log_info!(
            "Valid index found at block hash: {}, number: {}.",
            short_hex(&anchor.hash()),
            anchor.number()
        );
        while let Some(next) = dirty.pop() {
            unityd_log::log_info!(
                "Rebuilding index for block hash: {}, number: {}, txs: {}.",
                short_hex(&next.hash()),
                next.number(),
                next.transactions.len()
            );
            difficulty = store.correct_index_entry(&next, difficulty)?;
        }
        store.flush()?;

        if !store.is_indexed(&block.hash(), block.number())? {
            return Ok(false);
        }

        let main = store
            .best_block()?
            .ok_or(ChainError::CorruptIndex("no best block during index recovery"))?;
        if main.total_difficulty() < difficulty.total() {
            unityd_log::log_info!(
                "branching: from = {}/{}, to = {}/{}",
                main.number(),
                short_hex(&main.hash()),
                block.number(),
                short_hex(&block.hash())
            );
            store.re_branch(block)?;
            if inner.repository.is_valid_root(&block.header.state_root)? {
                inner.repository.sync_to_root(&block.header.state_root)?;
                inner.repository.commit_block(&block.header)?;
            }
            inner.best = block.clone();
            inner.total_difficulty = difficulty;
            store.flush()?;
            self.publish(inner)?;
        } else if main.number() > block.number() {
            let next_on_main = store.chain_block_by_number(block.number() + 1)?;
            if next_on_main.is_some_and(|next| next.block.parent_hash() == block.hash()) {
                store.correct_main_chain(block)?;
                store.flush()?;
            }
        }
        Ok(true)
    }
}
