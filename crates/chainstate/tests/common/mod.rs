#![allow(dead_code)]

use std::sync::Arc;

use primitive_types::U256;
use unityd_chainstate::{
    BlockTemplate, Blockchain, BlockchainOptions, HeaderValidators, ImportResult, KvWorldState,
    TransferExecutor,
};
use unityd_consensus::{chain_params, ChainParams, Network, SealType};
use unityd_primitives::block::Block;
use unityd_primitives::transaction::Transaction;
use unityd_storage::memory::MemoryStore;
use unityd_storage::KeyValueStore;

pub type TestChain = Blockchain<MemoryStore, TransferExecutor>;

/// Fixed clock, far ahead of every test block timestamp.
pub const NOW: u64 = 10_000_000;
pub const COINBASE: [u8; 20] = [0x0c; 20];

pub fn open_chain(store: &Arc<MemoryStore>) -> TestChain {
    open_chain_with(store, chain_params(Network::Regtest))
}

pub fn open_chain_with<S: KeyValueStore + 'static>(
    store: &Arc<S>,
    params: ChainParams,
) -> Blockchain<S, TransferExecutor> {
    let state = KvWorldState::open(Arc::clone(store)).expect("world state");
    let validators = HeaderValidators::standard(&params);
    Blockchain::open(
        Arc::clone(store),
        Box::new(state),
        TransferExecutor,
        validators,
        params,
        BlockchainOptions::default(),
    )
    .expect("open chain")
}

pub fn template(parent: &Block, difficulty: u64) -> BlockTemplate {
    BlockTemplate {
        timestamp: parent.header.timestamp + 10,
        difficulty: U256::from(difficulty),
        seal_type: SealType::Mining,
        coinbase: COINBASE,
        extra_data: Vec::new(),
        energy_limit: None,
    }
}

pub fn make_block<S: KeyValueStore + 'static>(
    chain: &Blockchain<S, TransferExecutor>,
    parent: &Block,
    difficulty: u64,
    transactions: Vec<Transaction>,
) -> Block {
    chain
        .create_new_block(parent, transactions, template(parent, difficulty))
        .expect("create block")
}

/// Mines `count` empty blocks on the best block and asserts each becomes best.
pub fn extend<S: KeyValueStore + 'static>(
    chain: &Blockchain<S, TransferExecutor>,
    count: usize,
    difficulty: u64,
) -> Vec<Block> {
    let mut parent = chain.best_block().expect("best block");
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        let block = make_block(chain, &parent, difficulty, Vec::new());
        let result = chain.try_to_connect_at(&block, NOW).expect("import");
        assert_eq!(result, ImportResult::ImportedBest, "block {}", block.number());
        parent = block.clone();
        blocks.push(block);
    }
    blocks
}

/// Every indexed height holds at most one main chain entry.
pub fn assert_single_main_chain<S: KeyValueStore + 'static>(chain: &Blockchain<S, TransferExecutor>) {
    let max = chain.store().max_number().expect("max").unwrap_or(0);
    for height in 0..=max {
        let mains = chain
            .store()
            .blocks_by_number(height)
            .expect("level")
            .iter()
            .filter(|entry| entry.info.main_chain)
            .count();
        assert!(mains <= 1, "height {height} has {mains} main chain entries");
    }
}
