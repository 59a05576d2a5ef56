mod common;

use std::sync::Arc;

use unityd_chainstate::index::height_key;
use unityd_chainstate::{ImportResult, KvWorldState};
use unityd_consensus::money::COIN;
use unityd_consensus::{chain_params, Network};
use unityd_storage::memory::MemoryStore;
use unityd_storage::{Column, KeyValueStore};

use common::{assert_single_main_chain, extend, open_chain, open_chain_with, COINBASE, NOW};

#[test]
fn missing_world_state_is_rebuilt_on_open() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 5, 100);
    let reward = chain.params().block_reward;
    drop(chain);

    let mut state = KvWorldState::open(Arc::clone(&store)).expect("world state");
    for block in &mined[2..] {
        state
            .forget_root(&block.header.state_root)
            .expect("forget root");
    }
    drop(state);

    let chain = open_chain(&store);
    assert_eq!(chain.best_block_number(), 5);
    assert_eq!(chain.account(&COINBASE).expect("coinbase").balance, reward * 5);

    let next = extend(&chain, 1, 100);
    assert_eq!(next[0].number(), 6);
}

#[test]
fn genesis_state_is_rebuilt_from_parameters() {
    let funded = [0x44u8; 20];
    let mut params = chain_params(Network::Regtest);
    params.genesis.premine = vec![(funded, 3 * COIN)];

    let store = Arc::new(MemoryStore::new());
    let chain = open_chain_with(&store, params.clone());
    let genesis = chain.best_block().expect("genesis");
    let mined = extend(&chain, 2, 100);
    drop(chain);

    let mut state = KvWorldState::open(Arc::clone(&store)).expect("world state");
    state
        .forget_root(&genesis.header.state_root)
        .expect("forget genesis");
    for block in &mined {
        state
            .forget_root(&block.header.state_root)
            .expect("forget root");
    }
    drop(state);

    let chain = open_chain_with(&store, params);
    assert_eq!(chain.best_block().expect("best").hash(), mined[1].hash());
    assert_eq!(chain.account(&funded).expect("premine").balance, 3 * COIN);
}

#[test]
fn known_block_missing_from_the_index_is_reindexed() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 5, 100);
    drop(chain);

    store
        .delete(Column::BlockInfo, &height_key(5))
        .expect("drop level 5");

    let chain = open_chain(&store);
    assert_eq!(chain.best_block_number(), 4);

    assert_eq!(
        chain.try_to_connect_at(&mined[4], NOW).expect("import"),
        ImportResult::Exist
    );
    assert!(chain.store().is_indexed(&mined[4].hash(), 5).expect("indexed"));
    assert!(chain.store().is_main_chain(&mined[4].hash(), 5).expect("main"));
    assert_eq!(chain.best_block_number(), 5);
    assert_eq!(chain.best_block().expect("best").hash(), mined[4].hash());
    assert_single_main_chain(&chain);

    let next = extend(&chain, 1, 100);
    assert_eq!(next[0].parent_hash(), mined[4].hash());
}

#[test]
fn failed_genesis_rebuild_leaves_the_best_state_alone() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let genesis = chain.best_block().expect("genesis");
    let mined = extend(&chain, 3, 100);
    let reward = chain.params().block_reward;
    let before = chain.account(&COINBASE).expect("coinbase").balance;
    assert_eq!(before, reward * 3);

    let mut tampered = genesis.clone();
    tampered.header.state_root = [0x5a; 32];
    store
        .put(Column::BlockBody, &genesis.hash(), &tampered.consensus_encode())
        .expect("tamper genesis");
    let mut state = KvWorldState::open(Arc::clone(&store)).expect("world state");
    state
        .forget_root(&mined[0].header.state_root)
        .expect("forget root");
    drop(state);

    assert_eq!(
        chain.try_to_connect_at(&mined[0], NOW).expect("import"),
        ImportResult::Exist
    );
    assert_eq!(chain.best_block_number(), 3);
    assert_eq!(chain.account(&COINBASE).expect("coinbase").balance, before);
    let journal = KvWorldState::open(Arc::clone(&store)).expect("world state");
    assert_eq!(
        journal.committed_at(3).expect("journal"),
        Some((mined[2].hash(), mined[2].header.state_root))
    );
    assert_eq!(journal.committed_at(4).expect("journal"), None);
    drop(journal);

    let next = extend(&chain, 1, 100);
    assert_eq!(next[0].number(), 4);
    assert_eq!(
        chain.account(&COINBASE).expect("coinbase").balance,
        before + reward
    );
}
