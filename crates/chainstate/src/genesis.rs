//! Genesis block and initial world state from chain parameters.

use primitive_types::U256;
use unityd_consensus::{ChainParams, SealType};
use unityd_primitives::block::{tx_trie_root, Block, BlockHeader};
use unityd_primitives::bloom::Bloom;
use unityd_primitives::receipt::receipts_root;

use crate::error::StateError;
use crate::world::{AccountState, StateTrack, WorldState};

/// Resets `state` to empty, applies the premine, and returns the genesis block
/// committing to the resulting root. The new root is pending until `state` is flushed.
pub fn build_genesis(params: &ChainParams, state: &mut dyn WorldState) -> Result<Block, StateError> {
    let genesis = &params.genesis;
    state.reset_to_empty();
    let mut track = StateTrack::new(&mut *state);
    for (address, amount) in &genesis.premine {
        track.add_balance(address, *amount)?;
    }
    track.flush()?;

    let header = BlockHeader {
        parent_hash: [0u8; 32],
        number: 0,
        timestamp: genesis.timestamp,
        difficulty: U256::from(genesis.difficulty),
        state_root: state.root(),
        tx_trie_root: tx_trie_root(&[]),
        receipts_root: receipts_root(&[]),
        log_bloom: Bloom::default(),
        seal_type: SealType::Mining,
        coinbase: genesis.coinbase,
        energy_limit: genesis.energy_limit,
        energy_consumed: 0,
        extra_data: genesis.extra_data.clone(),
        seal: Vec::new(),
    };
    Ok(Block {
        header,
        transactions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use unityd_consensus::{chain_params, Network};
    use unityd_storage::memory::MemoryStore;

    use crate::world::KvWorldState;

    #[test]
    fn premine_is_part_of_the_genesis_root() {
        let params = chain_params(Network::Mainnet);
        let mut state = KvWorldState::open(Arc::new(MemoryStore::new())).expect("state");
        let genesis = build_genesis(&params, &mut state).expect("genesis");
        let (address, amount) = params.genesis.premine[0];
        assert_eq!(state.balance(&address).expect("premine"), amount);
        assert_eq!(genesis.header.state_root, state.root());

        let mut other = KvWorldState::open(Arc::new(MemoryStore::new())).expect("state");
        let again = build_genesis(&params, &mut other).expect("genesis");
        assert_eq!(again.hash(), genesis.hash());
    }
}
