//! Chain selection: block import, speculative fork evaluation, and rebranching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use primitive_types::U256;
use unityd_consensus::constants::SKIP_TRY_TO_CONNECT_WINDOW;
use unityd_consensus::money::Amount;
use unityd_consensus::{block_reward, Address, ChainDifficulty, ChainParams, Hash256, SealType};
use unityd_primitives::block::{tx_trie_root, Block, BlockHeader};
use unityd_primitives::hex::short_hex;
use unityd_primitives::receipt::{receipts_bloom, receipts_root, Receipt};
use unityd_primitives::transaction::Transaction;
use unityd_storage::KeyValueStore;

use crate::error::{ChainError, StateError};
use crate::executor::{BlockExecutor, ExecutionError, ExecutionFlags, TxExecutionSummary};
use crate::genesis::build_genesis;
use crate::maintenance::check_integrity;
use crate::store::BlockStore;
use crate::validation::{validate_nonces, validate_transactions, HeaderValidators};
use crate::world::{Account, AccountState, StateTrack, WorldState};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImportResult {
    ImportedBest,
    ImportedNotBest,
    Exist,
    NoParent,
    InvalidBlock,
}

impl ImportResult {
    pub fn is_successful(self) -> bool {
        matches!(self, ImportResult::ImportedBest | ImportResult::ImportedNotBest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportResult::ImportedBest => "IMPORTED_BEST",
            ImportResult::ImportedNotBest => "IMPORTED_NOT_BEST",
            ImportResult::Exist => "EXIST",
            ImportResult::NoParent => "NO_PARENT",
            ImportResult::InvalidBlock => "INVALID_BLOCK",
        }
    }
}

impl std::fmt::Display for ImportResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing one block.
#[derive(Clone, Debug)]
pub struct BlockSummary {
    pub block: Block,
    pub rewards: Vec<(Address, Amount)>,
    pub receipts: Vec<Receipt>,
    pub summaries: Vec<TxExecutionSummary>,
}

#[derive(Clone, Debug, Default)]
pub struct BlockchainOptions {
    /// Run the difficulty integrity check (and repair) when opening.
    pub check_integrity: bool,
}

/// Header fields a block producer chooses; everything else is derived.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub timestamp: u64,
    pub difficulty: U256,
    pub seal_type: SealType,
    pub coinbase: Address,
    pub extra_data: Vec<u8>,
    /// Defaults to the parent's energy limit.
    pub energy_limit: Option<u64>,
}

pub(crate) struct ChainInner {
    pub(crate) repository: Box<dyn WorldState>,
    pub(crate) best: Block,
    pub(crate) total_difficulty: ChainDifficulty,
    pub(crate) fork_depth: usize,
}

struct SavedState {
    repository: Box<dyn WorldState>,
    best: Block,
    total_difficulty: ChainDifficulty,
}

/// Speculative evaluation on top of a non-best parent.
///
/// While alive, the engine runs on a snapshot positioned at the parent's state.
/// Dropping the guard restores the saved repository, best block and totals;
/// [`ForkGuard::commit`] keeps the new best block and hands back the saved repository.
struct ForkGuard<'a> {
    inner: &'a mut ChainInner,
    saved: Option<SavedState>,
}

impl<'a> ForkGuard<'a> {
    fn push(
        inner: &'a mut ChainInner,
        parent: &Block,
        parent_difficulty: ChainDifficulty,
    ) -> Result<Self, StateError> {
        let snapshot = inner.repository.snapshot_to(&parent.header.state_root)?;
        let repository = std::mem::replace(&mut inner.repository, snapshot);
        let best = std::mem::replace(&mut inner.best, parent.clone());
        let total_difficulty = std::mem::replace(&mut inner.total_difficulty, parent_difficulty);
        inner.fork_depth += 1;
        Ok(Self {
            inner,
            saved: Some(SavedState {
                repository,
                best,
                total_difficulty,
            }),
        })
    }

    fn inner(&mut self) -> &mut ChainInner {
        self.inner
    }

    fn saved_best(&self) -> Option<(&Block, U256)> {
        self.saved
            .as_ref()
            .map(|saved| (&saved.best, saved.total_difficulty.total()))
    }

    fn commit(mut self) -> Option<Box<dyn WorldState>> {
        self.saved.take().map(|saved| saved.repository)
    }
}

impl Drop for ForkGuard<'_> {
    fn drop(&mut self) {
        self.inner.fork_depth = self.inner.fork_depth.saturating_sub(1);
        if let Some(saved) = self.saved.take() {
            self.inner.repository = saved.repository;
            self.inner.best = saved.best;
            self.inner.total_difficulty = saved.total_difficulty;
        }
    }
}

/// Imports run one at a time under the engine lock. Readers use the published
/// best block, which only changes after an import has fully committed.
pub struct Blockchain<S, E> {
    store: BlockStore<S>,
    inner: Mutex<ChainInner>,
    published_best: RwLock<Block>,
    best_number: AtomicU64,
    executor: E,
    validators: HeaderValidators,
    params: ChainParams,
}

impl<S, E> Blockchain<S, E>
where
    S: KeyValueStore + 'static,
    E: BlockExecutor,
{
    pub fn open(
        store: Arc<S>,
        mut repository: Box<dyn WorldState>,
        executor: E,
        validators: HeaderValidators,
        params: ChainParams,
        options: BlockchainOptions,
    ) -> Result<Self, ChainError> {
        let block_store = BlockStore::open(store)?;
        if options.check_integrity {
            check_integrity(&block_store)?;
        }

        let mut state_missing = false;
        let (best, total_difficulty) = match block_store.best_block()? {
            Some(best) => {
                let root = best.block.header.state_root;
                if repository.is_valid_root(&root)? {
                    repository.sync_to_root(&root)?;
                } else {
                    state_missing = true;
                }
                let difficulty = best.info.chain_difficulty();
                (best.block, difficulty)
            }
            None => {
                let genesis = build_genesis(&params, repository.as_mut())?;
                repository.commit_block(&genesis.header)?;
                let difficulty =
                    ChainDifficulty::genesis(genesis.header.seal_type, genesis.header.difficulty);
                block_store.save_block(&genesis, difficulty, true)?;
                block_store.flush()?;
                unityd_log::log_info!(
                    "Created genesis block {} for {}",
                    short_hex(&genesis.hash()),
                    params.network.as_str()
                );
                (genesis, difficulty)
            }
        };

        let chain = Self {
            store: block_store,
            best_number: AtomicU64::new(best.number()),
            published_best: RwLock::new(best.clone()),
            inner: Mutex::new(ChainInner {
                repository,
                best: best.clone(),
                total_difficulty,
                fork_depth: 0,
            }),
            executor,
            validators,
            params,
        };

        if state_missing {
            unityd_log::log_warn!(
                "State root of best block {}/{} is missing, recovering world state",
                best.number(),
                short_hex(&best.hash())
            );
            let mut inner = chain.lock_inner()?;
            if !chain.recover_world_state(&mut inner, &best)? {
                return Err(ChainError::State(StateError::MissingRoot(
                    best.header.state_root,
                )));
            }
            inner.repository.sync_to_root(&best.header.state_root)?;
        }
        Ok(chain)
    }

    pub(crate) fn lock_inner(&self) -> Result<MutexGuard<'_, ChainInner>, ChainError> {
        self.inner
            .lock()
            .map_err(|_| ChainError::Poisoned("chain lock poisoned"))
    }

    pub fn store(&self) -> &BlockStore<S> {
        &self.store
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Last best block published after a committed import.
    pub fn best_block(&self) -> Result<Block, ChainError> {
        self.published_best
            .read()
            .map(|best| best.clone())
            .map_err(|_| ChainError::Poisoned("published best block lock poisoned"))
    }

    pub fn best_block_number(&self) -> u64 {
        self.best_number.load(Ordering::Acquire)
    }

    pub fn total_difficulty(&self) -> Result<U256, ChainError> {
        Ok(self.lock_inner()?.total_difficulty.total())
    }

    /// Account as of the engine's current best state.
    pub fn account(&self, address: &Address) -> Result<Account, ChainError> {
        Ok(self.lock_inner()?.repository.account(address)?)
    }

    pub fn is_block_stored(&self, hash: &Hash256, number: u64) -> Result<bool, ChainError> {
        self.store.is_block_stored(hash, number)
    }

    /// Candidates too far from the best height are not worth trying yet.
    pub fn skip_try_to_connect(&self, number: u64) -> bool {
        let best = self.best_block_number();
        number > best.saturating_add(SKIP_TRY_TO_CONNECT_WINDOW)
            || number.saturating_add(SKIP_TRY_TO_CONNECT_WINDOW) < best
    }

    pub fn try_to_connect(&self, block: &Block) -> Result<ImportResult, ChainError> {
        self.try_to_connect_at(block, unix_now())
    }

    /// Imports `block` as if the wall clock read `now` (seconds).
    pub fn try_to_connect_at(&self, block: &Block, now: u64) -> Result<ImportResult, ChainError> {
        self.try_to_connect_and_fetch_summary(block, now, true)
            .map(|(result, _)| result)
    }

    pub fn try_to_connect_and_fetch_summary(
        &self,
        block: &Block,
        now: u64,
        exist_check: bool,
    ) -> Result<(ImportResult, Option<BlockSummary>), ChainError> {
        let mut inner = self.lock_inner()?;
        let (result, summary) = self.try_to_connect_internal(&mut inner, block, now, exist_check)?;
        if result == ImportResult::ImportedBest {
            self.publish(&inner)?;
        }
        unityd_log::log_debug!(
            "Import of block {}/{}: {}",
            block.number(),
            short_hex(&block.hash()),
            result
        );
        Ok((result, summary))
    }

    pub(crate) fn publish(&self, inner: &ChainInner) -> Result<(), ChainError> {
        let mut published = self
            .published_best
            .write()
            .map_err(|_| ChainError::Poisoned("published best block lock poisoned"))?;
        *published = inner.best.clone();
        self.best_number.store(inner.best.number(), Ordering::Release);
        Ok(())
    }

    fn try_to_connect_internal(
        &self,
        inner: &mut ChainInner,
        block: &Block,
        now: u64,
        exist_check: bool,
    ) -> Result<(ImportResult, Option<BlockSummary>), ChainError> {
        let hash = block.hash();
        let number = block.number();

        if exist_check {
            let known = match self.store.max_number()? {
                Some(max) => max >= number && self.store.is_block_exist(&hash)?,
                None => false,
            };
            if known {
                if !inner.repository.is_valid_root(&block.header.state_root)? {
                    unityd_log::log_warn!(
                        "State root of known block {}/{} is invalid, recovering world state",
                        number,
                        short_hex(&hash)
                    );
                    let recovered = self.recover_world_state(inner, block)?;
                    unityd_log::log_info!(
                        "World state recovery for block {}/{} {}",
                        number,
                        short_hex(&hash),
                        if recovered { "succeeded" } else { "failed" }
                    );
                }
                if !self.store.is_indexed(&hash, number)? {
                    unityd_log::log_warn!(
                        "Known block {}/{} is missing from the index, recovering index entry",
                        number,
                        short_hex(&hash)
                    );
                    let recovered = self.recover_index_entry(inner, block)?;
                    unityd_log::log_info!(
                        "Index recovery for block {}/{} {}",
                        number,
                        short_hex(&hash),
                        if recovered { "succeeded" } else { "failed" }
                    );
                }
                return Ok((ImportResult::Exist, None));
            }
        }

        if block.header.timestamp > now.saturating_add(self.params.clock_drift_buffer_secs) {
            unityd_log::log_warn!(
                "Block {}/{} is stamped {} seconds in the future",
                number,
                short_hex(&hash),
                block.header.timestamp - now
            );
            return Ok((ImportResult::InvalidBlock, None));
        }

        let parent_hash = block.parent_hash();
        if parent_hash == inner.best.hash() {
            let root = inner.best.header.state_root;
            inner.repository.sync_to_root(&root)?;
            return Ok(match self.add_block(inner, block)? {
                Some(summary) => (ImportResult::ImportedBest, Some(summary)),
                None => (ImportResult::InvalidBlock, None),
            });
        }

        if self.store.is_block_exist(&parent_hash)? {
            let old_total = inner.total_difficulty.total();
            return Ok(match self.try_connect_and_fork(inner, block)? {
                Some(summary) if inner.total_difficulty.total() > old_total => {
                    (ImportResult::ImportedBest, Some(summary))
                }
                Some(summary) => (ImportResult::ImportedNotBest, Some(summary)),
                None => (ImportResult::InvalidBlock, None),
            });
        }

        Ok((ImportResult::NoParent, None))
    }

    fn try_connect_and_fork(
        &self,
        inner: &mut ChainInner,
        block: &Block,
    ) -> Result<Option<BlockSummary>, ChainError> {
        let parent_hash = block.parent_hash();
        let parent = self
            .store
            .block_by_hash(&parent_hash)?
            .ok_or(ChainError::MissingBlock(parent_hash))?;
        let parent_difficulty = match self.store.chain_difficulty_for_hash(&parent_hash)? {
            Some(difficulty) => difficulty,
            None => {
                unityd_log::log_warn!(
                    "Parent {}/{} of block {} is not indexed",
                    parent.number(),
                    short_hex(&parent_hash),
                    short_hex(&block.hash())
                );
                return Ok(None);
            }
        };
        if !inner.repository.is_valid_root(&parent.header.state_root)? {
            unityd_log::log_warn!(
                "State of parent {}/{} is not available for fork evaluation",
                parent.number(),
                short_hex(&parent_hash)
            );
            return Ok(None);
        }

        let mut guard = ForkGuard::push(&mut *inner, &parent, parent_difficulty)?;
        let summary = match self.add_block(guard.inner(), block)? {
            Some(summary) => summary,
            None => return Ok(None),
        };
        let new_total = guard.inner().total_difficulty.total();
        let (old_best_number, old_best_hash, saved_total) = match guard.saved_best() {
            Some((best, total)) => (best.number(), best.hash(), total),
            None => return Ok(Some(summary)),
        };
        if new_total <= saved_total {
            return Ok(Some(summary));
        }

        unityd_log::log_info!(
            "branching: from = {}/{}, to = {}/{}",
            old_best_number,
            short_hex(&old_best_hash),
            block.number(),
            short_hex(&block.hash())
        );
        self.store.re_branch(block)?;
        if let Some(repository) = guard.commit() {
            inner.repository = repository;
        }
        inner.repository.sync_to_root(&block.header.state_root)?;
        inner.repository.commit_block(&block.header)?;
        self.store.flush()?;
        Ok(Some(summary))
    }

    /// Executes `block` on the current repository and records it in the store.
    /// Outside fork evaluation the block becomes the main chain tip.
    fn add_block(&self, inner: &mut ChainInner, block: &Block) -> Result<Option<BlockSummary>, ChainError> {
        let summary = match self.add(inner, block, false)? {
            Some(summary) => summary,
            None => return Ok(None),
        };
        let total_difficulty = inner
            .total_difficulty
            .extend(block.header.seal_type, block.header.difficulty);
        let main_chain = inner.fork_depth == 0;
        self.store.save_block(block, total_difficulty, main_chain)?;
        inner.repository.flush()?;
        if main_chain {
            inner.repository.commit_block(&block.header)?;
        }
        inner.best = block.clone();
        inner.total_difficulty = total_difficulty;
        self.store.flush()?;
        unityd_log::log_debug!(
            "Added block {}/{} with total difficulty {}",
            block.number(),
            short_hex(&block.hash()),
            total_difficulty.total()
        );
        Ok(Some(summary))
    }

    /// Validates and executes `block` on `inner.repository`.
    ///
    /// With `rebuild` set the block is replayed onto an existing ancestor state:
    /// the best-block continuity and final state-root checks are skipped and the
    /// resulting state is committed for the block.
    pub(crate) fn add(
        &self,
        inner: &mut ChainInner,
        block: &Block,
        rebuild: bool,
    ) -> Result<Option<BlockSummary>, ChainError> {
        if block.header.is_genesis() {
            return Ok(Some(BlockSummary {
                block: block.clone(),
                rewards: Vec::new(),
                receipts: Vec::new(),
                summaries: Vec::new(),
            }));
        }
        if !self.is_valid(inner, block)? {
            unityd_log::log_error!(
                "Attempting to add INVALID block {}/{}.",
                block.number(),
                short_hex(&block.hash())
            );
            return Ok(None);
        }
        if !rebuild && inner.best.hash() != block.parent_hash() {
            unityd_log::log_error!(
                "Attempting to add NON-SEQUENTIAL block {}/{}.",
                block.number(),
                short_hex(&block.hash())
            );
            return Ok(None);
        }

        let original_root = inner.repository.root();
        let coinbase = block.header.coinbase;
        let reward = block_reward(block.number(), &self.params);
        let (summaries, receipts) = {
            let mut track = StateTrack::new(inner.repository.as_mut());
            let summaries = self
                .executor
                .execute(block, &mut track, ExecutionFlags::block_import())
                .map_err(execution_error)?;
            if let Some(index) = summaries.iter().position(|summary| summary.rejected) {
                unityd_log::log_warn!(
                    "Block {}/{} contains rejected transaction {}: {}",
                    block.number(),
                    short_hex(&block.hash()),
                    index,
                    summaries[index].receipt.error
                );
                track.rollback();
                return Ok(None);
            }
            track.add_balance(&coinbase, reward)?;

            let receipts: Vec<Receipt> = summaries
                .iter()
                .map(|summary| summary.receipt.clone())
                .collect();
            let energy_used = summaries
                .iter()
                .fold(0u64, |total, summary| total.saturating_add(summary.energy_used));
            let mismatch = if receipts_root(&receipts) != block.header.receipts_root {
                Some("receipts root")
            } else if receipts_bloom(&receipts) != block.header.log_bloom {
                Some("log bloom")
            } else if energy_used != block.header.energy_consumed {
                Some("energy consumed")
            } else {
                None
            };
            if let Some(field) = mismatch {
                unityd_log::log_warn!(
                    "Block {}/{} has a mismatched {}",
                    block.number(),
                    short_hex(&block.hash()),
                    field
                );
                track.rollback();
                return Ok(None);
            }
            track.flush()?;
            (summaries, receipts)
        };

        if !rebuild && inner.repository.root() != block.header.state_root {
            unityd_log::log_warn!(
                "Block {}/{} state root mismatch: expected {}, computed {}",
                block.number(),
                short_hex(&block.hash()),
                short_hex(&block.header.state_root),
                short_hex(&inner.repository.root())
            );
            inner.repository.set_root(&original_root)?;
            return Ok(None);
        }
        if rebuild {
            inner.repository.commit_block(&block.header)?;
        }

        Ok(Some(BlockSummary {
            block: block.clone(),
            rewards: vec![(coinbase, reward)],
            receipts,
            summaries,
        }))
    }

    fn is_valid(&self, inner: &ChainInner, block: &Block) -> Result<bool, ChainError> {
        let parent = match self.store.block_by_hash(&block.parent_hash())? {
            Some(parent) => parent,
            None => {
                unityd_log::log_warn!(
                    "Parent of block {}/{} is not stored",
                    block.number(),
                    short_hex(&block.hash())
                );
                return Ok(false);
            }
        };
        let grandparent = if parent.header.is_genesis() {
            None
        } else {
            self.store.block_by_hash(&parent.parent_hash())?
        };
        if let Err(err) = self.validators.validate(
            &block.header,
            &parent.header,
            grandparent.as_ref().map(|grandparent| &grandparent.header),
        ) {
            unityd_log::log_warn!(
                "Invalid header for block {}/{}: {}",
                block.number(),
                short_hex(&block.hash()),
                err
            );
            return Ok(false);
        }

        let senders = match validate_transactions(block) {
            Ok(senders) => senders,
            Err(err) => {
                unityd_log::log_warn!(
                    "Invalid transactions in block {}/{}: {}",
                    block.number(),
                    short_hex(&block.hash()),
                    err
                );
                return Ok(false);
            }
        };
        if senders.is_empty() {
            return Ok(true);
        }

        let nonces = if inner.best.hash() == parent.hash() {
            validate_nonces(block, &senders, inner.repository.as_ref())
        } else {
            match inner.repository.snapshot_to(&parent.header.state_root) {
                Ok(snapshot) => validate_nonces(block, &senders, snapshot.as_ref()),
                Err(StateError::MissingRoot(_)) => {
                    unityd_log::log_warn!(
                        "State of parent {}/{} is not available for nonce checks",
                        parent.number(),
                        short_hex(&parent.hash())
                    );
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
        };
        match nonces {
            Ok(()) => Ok(true),
            Err(err) => {
                unityd_log::log_warn!(
                    "Invalid nonce in block {}/{}: {}",
                    block.number(),
                    short_hex(&block.hash()),
                    err
                );
                Ok(false)
            }
        }
    }

    /// Builds a block on `parent` from the transactions that execute successfully.
    ///
    /// Roots, bloom and energy consumed are filled in; the seal is left empty.
    pub fn create_new_block(
        &self,
        parent: &Block,
        transactions: Vec<Transaction>,
        template: BlockTemplate,
    ) -> Result<Block, ChainError> {
        let mut repository = {
            let inner = self.lock_inner()?;
            inner.repository.snapshot_to(&parent.header.state_root)?
        };
        let mut block = Block {
            header: BlockHeader {
                parent_hash: parent.hash(),
                number: parent.number().saturating_add(1),
                timestamp: template.timestamp,
                difficulty: template.difficulty,
                state_root: parent.header.state_root,
                tx_trie_root: tx_trie_root(&[]),
                receipts_root: receipts_root(&[]),
                log_bloom: Default::default(),
                seal_type: template.seal_type,
                coinbase: template.coinbase,
                energy_limit: template.energy_limit.unwrap_or(parent.header.energy_limit),
                energy_consumed: 0,
                extra_data: template.extra_data,
                seal: Vec::new(),
            },
            transactions,
        };

        let flags = ExecutionFlags::block_import();
        let summaries = loop {
            let summaries = {
                let mut track = StateTrack::new(repository.as_mut());
                let summaries = self
                    .executor
                    .execute(&block, &mut track, flags)
                    .map_err(execution_error)?;
                track.rollback();
                summaries
            };
            if !summaries.iter().any(|summary| summary.rejected) {
                break summaries;
            }
            let transactions = std::mem::take(&mut block.transactions);
            block.transactions = transactions
                .into_iter()
                .zip(&summaries)
                .filter(|(_, summary)| !summary.rejected)
                .map(|(tx, _)| tx)
                .collect();
        };

        let reward = block_reward(block.number(), &self.params);
        {
            let mut track = StateTrack::new(repository.as_mut());
            self.executor
                .execute(&block, &mut track, flags)
                .map_err(execution_error)?;
            track.add_balance(&block.header.coinbase, reward)?;
            track.flush()?;
        }

        let receipts: Vec<Receipt> = summaries
            .iter()
            .map(|summary| summary.receipt.clone())
            .collect();
        block.header.state_root = repository.root();
        block.header.tx_trie_root = tx_trie_root(&block.transactions);
        block.header.receipts_root = receipts_root(&receipts);
        block.header.log_bloom = receipts_bloom(&receipts);
        block.header.energy_consumed = summaries
            .iter()
            .fold(0u64, |total, summary| total.saturating_add(summary.energy_used));
        repository.flush()?;
        Ok(block)
    }

    /// First ancestor whose body is not stored, `None` when history reaches genesis.
    pub fn find_missing_ancestor(&self, block: &Block) -> Result<Option<(Hash256, u64)>, ChainError> {
        let mut current = block.clone();
        while !current.header.is_genesis() {
            let parent_hash = current.parent_hash();
            match self.store.block_by_hash(&parent_hash)? {
                Some(parent) => current = parent,
                None => return Ok(Some((parent_hash, current.number() - 1))),
            }
        }
        Ok(None)
    }

    /// Points the engine at the store's current best block, after the index was
    /// changed underneath it.
    pub fn reload_best(&self) -> Result<(), ChainError> {
        let mut inner = self.lock_inner()?;
        let best = self
            .store
            .best_block()?
            .ok_or(ChainError::CorruptIndex("no best block after reload"))?;
        let best_block = best.block;
        let root = best_block.header.state_root;
        inner.best = best_block.clone();
        inner.total_difficulty = best.info.chain_difficulty();
        if !inner.repository.is_valid_root(&root)? && !self.recover_world_state(&mut inner, &best_block)? {
            return Err(ChainError::State(StateError::MissingRoot(root)));
        }
        inner.repository.sync_to_root(&root)?;
        inner.repository.commit_block(&best_block.header)?;
        self.publish(&inner)
    }
}

fn execution_error(err: ExecutionError) -> ChainError {
    match err {
        ExecutionError::Fatal(message) => {
            unityd_log::log_error!("Fatal error while executing a block: {}", message);
            ChainError::FatalVm(message)
        }
        ExecutionError::State(err) => ChainError::State(err),
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
