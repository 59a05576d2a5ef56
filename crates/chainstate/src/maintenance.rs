//! One-shot operator tasks over an opened chain: revert, prune, dump, re-import.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use unityd_consensus::constants::REDO_IMPORT_PROGRESS_INTERVAL;
use unityd_primitives::hex::short_hex;
use unityd_storage::KeyValueStore;

use crate::chain::{unix_now, Blockchain, ImportResult};
use crate::error::ChainError;
use crate::executor::BlockExecutor;
use crate::store::{BlockStore, IntegrityCheckResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RevertStatus {
    Success,
    Failure,
    IllegalArgument,
}

impl RevertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RevertStatus::Success => "SUCCESS",
            RevertStatus::Failure => "FAILURE",
            RevertStatus::IllegalArgument => "ILLEGAL_ARGUMENT",
        }
    }
}

/// Deletes everything above `height` and makes the block at `height` the best block.
pub fn revert_to<S, E>(chain: &Blockchain<S, E>, height: i64) -> Result<RevertStatus, ChainError>
where
    S: KeyValueStore + 'static,
    E: BlockExecutor,
{
    let store = chain.store();
    let best = match store.best_block()? {
        Some(best) => best,
        None => {
            unityd_log::log_error!("Empty database. Nothing to do.");
            return Ok(RevertStatus::IllegalArgument);
        }
    };
    let best_number = best.number();
    if height < 0 {
        unityd_log::log_error!("Negative values <{}> cannot be interpreted as block numbers. Nothing to do.", height);
        return Ok(RevertStatus::IllegalArgument);
    }
    let target = height as u64;
    if best_number == 0 {
        unityd_log::log_error!("Only genesis in database. Nothing to do.");
        return Ok(RevertStatus::IllegalArgument);
    }
    if target == best_number {
        unityd_log::log_error!(
            "The block {} is the current best block stored in the database. Nothing to do.",
            target
        );
        return Ok(RevertStatus::IllegalArgument);
    }
    if target > best_number {
        unityd_log::log_error!(
            "The block #{} is greater than the current best block #{} stored in the database. Cannot move to that block without synchronizing with peers. Start the node to sync with the network.",
            target,
            best_number
        );
        return Ok(RevertStatus::IllegalArgument);
    }

    unityd_log::log_info!("Reverting from block {} to block {}.", best_number, target);
    store.revert(target)?;
    store.flush()?;

    let reverted = store.best_block()?.map(|best| best.number());
    if reverted != Some(target) {
        unityd_log::log_error!(
            "Revert to block #{} did not complete; best block is now {:?}.",
            target,
            reverted
        );
        return Ok(RevertStatus::Failure);
    }
    chain.reload_best()?;
    unityd_log::log_info!("Revert to block #{} complete.", target);
    Ok(RevertStatus::Success)
}

/// Drops every side chain and recomputes the index from genesis upward.
pub fn prune_and_correct<S, E>(chain: &Blockchain<S, E>) -> Result<(), ChainError>
where
    S: KeyValueStore + 'static,
    E: BlockExecutor,
{
    let store = chain.store();
    if store.best_block()?.is_none() {
        unityd_log::log_info!("Empty database. Nothing to do.");
        return Ok(());
    }
    unityd_log::log_info!("Pruning side chains and correcting the block index...");
    store.prune_and_correct()?;
    store.flush()?;
    chain.reload_best()?;
    unityd_log::log_info!("Prune and correct complete.");
    Ok(())
}

/// Writes the top `count` index levels to `<datadir>/<unix-millis>-blocks-report.json`.
///
/// Returns the report path, or `None` when the index is empty.
pub fn dump_blocks<S: KeyValueStore>(
    store: &BlockStore<S>,
    count: u64,
    datadir: &Path,
) -> Result<Option<PathBuf>, ChainError> {
    if store.max_number()?.is_none() {
        unityd_log::log_info!("Empty database. Nothing to do.");
        return Ok(None);
    }
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let path = datadir.join(format!("{millis}-blocks-report.json"));
    let mut writer = BufWriter::new(File::create(&path)?);
    let levels = store.dump_past_blocks(count, &mut writer)?.unwrap_or(0);
    unityd_log::log_info!("Wrote {} levels to {}.", levels, path.display());
    Ok(Some(path))
}

/// Reverts to `start - 1` and re-imports the removed main chain blocks in order.
pub fn redo_main_chain_import<S, E>(chain: &Blockchain<S, E>, start: u64) -> Result<RevertStatus, ChainError>
where
    S: KeyValueStore + 'static,
    E: BlockExecutor,
{
    let best = chain.best_block_number();
    if start == 0 || start > best {
        unityd_log::log_error!(
            "The starting height {} must be between 1 and the best block {}.",
            start,
            best
        );
        return Ok(RevertStatus::IllegalArgument);
    }

    let blocks = match chain.store().blocks_by_range(start, best)? {
        Some(blocks) => blocks,
        None => {
            unityd_log::log_error!("Main chain blocks from {} to {} are not all stored.", start, best);
            return Ok(RevertStatus::Failure);
        }
    };
    unityd_log::log_info!("Re-importing {} main chain blocks starting at {}.", blocks.len(), start);

    let reverted = revert_to(chain, start as i64 - 1)?;
    if reverted != RevertStatus::Success {
        return Ok(RevertStatus::Failure);
    }

    let total = blocks.len();
    for (done, block) in blocks.iter().enumerate() {
        let (result, _) = chain.try_to_connect_and_fetch_summary(block, unix_now(), false)?;
        if result != ImportResult::ImportedBest {
            unityd_log::log_error!(
                "Re-import stopped at block {}/{}: {}",
                block.number(),
                short_hex(&block.hash()),
                result
            );
            return Ok(RevertStatus::Failure);
        }
        let done = done as u64 + 1;
        if done % REDO_IMPORT_PROGRESS_INTERVAL == 0 {
            unityd_log::log_info!(
                "Re-imported {} of {} blocks, now at {}.",
                done,
                total,
                block.number()
            );
        }
    }
    unityd_log::log_info!("Re-import complete at block {}.", chain.best_block_number());
    Ok(RevertStatus::Success)
}

/// Runs the difficulty integrity check and reports the outcome.
pub fn check_integrity<S: KeyValueStore>(store: &BlockStore<S>) -> Result<IntegrityCheckResult, ChainError> {
    let result = store.index_integrity_check()?;
    match result {
        IntegrityCheckResult::Correct | IntegrityCheckResult::Fixed => {
            unityd_log::log_info!("Block index integrity: {}", result.as_str())
        }
        _ => unityd_log::log_error!("Block index integrity: {}", result.as_str()),
    }
    Ok(result)
}
