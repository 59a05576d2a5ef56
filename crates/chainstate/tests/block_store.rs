mod common;

use std::sync::Arc;

use primitive_types::U256;
use unityd_chainstate::index::height_key;
use unityd_chainstate::{BlockStore, BlockTemplate, ImportResult};
use unityd_consensus::ChainDifficulty;
use unityd_primitives::block::Block;
use unityd_storage::memory::MemoryStore;
use unityd_storage::{Column, KeyValueStore};

use common::{extend, make_block, open_chain, template, NOW};

fn numbers(blocks: &[Block]) -> Vec<u64> {
    blocks.iter().map(Block::number).collect()
}

#[test]
fn range_queries_walk_the_main_chain() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    extend(&chain, 50, 1);
    let blocks = chain.store();

    let single = blocks.blocks_by_range(5, 5).expect("range").expect("blocks");
    assert_eq!(numbers(&single), vec![5]);

    let descending = blocks.blocks_by_range(10, 3).expect("range").expect("blocks");
    assert_eq!(numbers(&descending), (3..=10).rev().collect::<Vec<_>>());

    let clamped = blocks.blocks_by_range(3, 1000).expect("range").expect("blocks");
    assert_eq!(numbers(&clamped), (3..=50).collect::<Vec<_>>());
    for pair in clamped.windows(2) {
        assert_eq!(pair[1].parent_hash(), pair[0].hash());
    }

    assert!(blocks.blocks_by_range(0, 5).expect("range").is_none());
}

#[test]
fn range_with_a_missing_body_is_a_gap() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 10, 1);
    store
        .delete(Column::BlockBody, &mined[4].hash())
        .expect("drop body of block 5");
    let blocks = chain.store();

    assert_eq!(blocks.blocks_by_range(5, 8).expect("starts at gap"), None);
    assert_eq!(blocks.blocks_by_range(3, 5).expect("ends at gap"), None);
    assert_eq!(blocks.blocks_by_range(8, 3).expect("crosses gap"), None);
    assert_eq!(blocks.blocks_by_range(5, 3).expect("descends from gap"), None);
    let after = blocks.blocks_by_range(6, 10).expect("range").expect("blocks");
    assert_eq!(numbers(&after), (6..=10).collect::<Vec<_>>());
}

#[test]
fn hash_listings_and_lookups() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 6, 1);
    let blocks = chain.store();

    let tip = mined.last().expect("tip").hash();
    let ending = blocks.list_hashes_end_with(&tip, 3).expect("end with");
    assert_eq!(ending, vec![mined[5].hash(), mined[4].hash(), mined[3].hash()]);
    let ending_blocks = blocks.list_blocks_end_with(&tip, 100).expect("end with");
    assert_eq!(ending_blocks.len(), 7);
    assert_eq!(ending_blocks.last().expect("genesis").number(), 0);

    let starting = blocks.list_hashes_start_with(4, 10).expect("start with");
    assert_eq!(starting, vec![mined[3].hash(), mined[4].hash(), mined[5].hash()]);

    assert_eq!(blocks.block_hash_by_number(2).expect("hash"), Some(mined[1].hash()));
    assert_eq!(blocks.block_hash_by_number(7).expect("hash"), None);
    assert_eq!(blocks.max_number().expect("max"), Some(6));
    assert!(blocks.is_block_stored(&mined[2].hash(), 3).expect("stored"));
    assert!(!blocks.is_block_stored(&mined[2].hash(), 4).expect("stored"));
    assert!(!blocks.is_block_stored(&mined[2].hash(), 9).expect("stored"));

    let info = blocks
        .block_info(&mined[2].hash(), 3)
        .expect("info")
        .expect("present");
    assert_eq!(info.chain_difficulty().total(), U256::from(4u64));
    assert_eq!(
        blocks.total_difficulty_for_hash(&mined[2].hash()).expect("total"),
        U256::from(4u64)
    );
    assert_eq!(
        blocks.total_difficulty_for_hash(&[0xaa; 32]).expect("unknown"),
        U256::zero()
    );
}

#[test]
fn saving_a_main_block_clears_other_main_flags() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 2, 100);

    let rival = make_block(&chain, &mined[0], 120, Vec::new());
    let parent_difficulty = chain
        .store()
        .chain_difficulty_for_hash(&mined[0].hash())
        .expect("lookup")
        .expect("parent");
    let difficulty: ChainDifficulty =
        parent_difficulty.extend(rival.header.seal_type, rival.header.difficulty);
    chain
        .store()
        .save_block(&rival, difficulty, true)
        .expect("save rival");

    let level = chain.store().blocks_by_number(2).expect("level");
    assert_eq!(level.len(), 2);
    let mains: Vec<_> = level.iter().filter(|entry| entry.info.main_chain).collect();
    assert_eq!(mains.len(), 1);
    assert_eq!(mains[0].hash(), rival.hash());
}

#[test]
fn dump_reports_one_line_per_level() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 4, 100);
    let side = chain
        .create_new_block(
            &mined[2],
            Vec::new(),
            BlockTemplate {
                coinbase: [0x0e; 20],
                ..template(&mined[2], 100)
            },
        )
        .expect("side block");
    assert_eq!(
        chain.try_to_connect_at(&side, NOW).expect("side"),
        ImportResult::ImportedNotBest
    );

    let mut report = Vec::new();
    let written = chain
        .store()
        .dump_past_blocks(3, &mut report)
        .expect("dump")
        .expect("levels");
    assert_eq!(written, 3);

    let text = String::from_utf8(report).expect("utf8");
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["level"], 4);
    assert_eq!(lines[0]["blocks"].as_array().expect("entries").len(), 2);
    assert_eq!(lines[2]["level"], 2);
    assert_eq!(lines[2]["blocks"][0]["missing_body"], false);

    let empty = BlockStore::open(Arc::new(MemoryStore::new())).expect("empty store");
    assert_eq!(empty.dump_past_blocks(3, &mut Vec::new()).expect("dump"), None);
}

#[test]
fn missing_top_main_entry_falls_back_to_lower_level() {
    let store = Arc::new(MemoryStore::new());
    let chain = open_chain(&store);
    let mined = extend(&chain, 3, 100);
    drop(chain);

    let level = store
        .get(Column::BlockInfo, &height_key(3))
        .expect("read")
        .expect("level 3");
    let mut infos = unityd_chainstate::blockinfo::decode_level(
        &level,
        unityd_chainstate::IndexFormat::Current,
    )
    .expect("decode");
    infos[0].main_chain = false;
    store
        .put(
            Column::BlockInfo,
            &height_key(3),
            &unityd_chainstate::blockinfo::encode_level(&infos),
        )
        .expect("write");

    let blocks = BlockStore::open(Arc::clone(&store)).expect("reopen");
    let best = blocks.best_block().expect("best").expect("block");
    assert_eq!(best.hash(), mined[1].hash());
}
