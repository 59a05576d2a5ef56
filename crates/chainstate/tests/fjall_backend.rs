#![cfg(feature = "fjall")]

mod common;

use std::sync::Arc;

use unityd_consensus::{chain_params, Network};
use unityd_storage::fjall::FjallStore;

use common::{extend, open_chain_with};

#[test]
fn chain_survives_a_reopen_on_fjall() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tip = {
        let store = Arc::new(FjallStore::open(dir.path()).expect("open fjall"));
        let chain = open_chain_with(&store, chain_params(Network::Regtest));
        let mined = extend(&chain, 3, 100);
        chain.store().flush().expect("flush");
        mined[2].hash()
    };

    let store = Arc::new(FjallStore::open(dir.path()).expect("reopen fjall"));
    let chain = open_chain_with(&store, chain_params(Network::Regtest));
    assert_eq!(chain.best_block_number(), 3);
    assert_eq!(chain.best_block().expect("best").hash(), tip);
    extend(&chain, 1, 100);
}
