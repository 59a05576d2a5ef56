//! Chain parameters per network.

use crate::money::{Amount, COIN};
use crate::Address;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Self::Mainnet),
            "testnet" | "test" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

/// Inputs for building the genesis block and its initial world state.
#[derive(Clone, Debug)]
pub struct GenesisParams {
    pub timestamp: u64,
    pub difficulty: u64,
    pub coinbase: Address,
    pub energy_limit: u64,
    pub extra_data: Vec<u8>,
    pub premine: Vec<(Address, Amount)>,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Blocks stamped further than this into the future are rejected.
    pub clock_drift_buffer_secs: u64,
    pub minimum_difficulty: u64,
    pub energy_lower_bound: u64,
    pub block_reward: Amount,
    pub ramp_up_start_reward: Amount,
    pub ramp_up_lower_bound: u64,
    pub ramp_up_upper_bound: u64,
    pub genesis: GenesisParams,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_chain_params(),
        Network::Testnet => testnet_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

const BLOCK_REWARD: Amount = 1_500_000_000_000_000_000;
const RAMP_UP_START_REWARD: Amount = 748_994_641_621_655_092;

fn mainnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Mainnet,
        clock_drift_buffer_secs: 1,
        minimum_difficulty: 16,
        energy_lower_bound: 5_000,
        block_reward: BLOCK_REWARD,
        ramp_up_start_reward: RAMP_UP_START_REWARD,
        ramp_up_lower_bound: 0,
        ramp_up_upper_bound: 259_200,
        genesis: GenesisParams {
            timestamp: 1_524_528_000,
            difficulty: 16,
            coinbase: [0u8; 20],
            energy_limit: 15_000_000,
            extra_data: b"unity mainnet".to_vec(),
            premine: vec![([0x0a; 20], 465_934_586 * COIN)],
        },
    }
}

fn testnet_chain_params() -> ChainParams {
    let mut params = mainnet_chain_params();
    params.network = Network::Testnet;
    params.genesis.timestamp = 1_527_811_200;
    params.genesis.extra_data = b"unity testnet".to_vec();
    params.genesis.premine = vec![([0x0b; 20], 1_000_000 * COIN)];
    params
}

fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        clock_drift_buffer_secs: 1,
        minimum_difficulty: 1,
        energy_lower_bound: 5_000,
        block_reward: BLOCK_REWARD,
        ramp_up_start_reward: BLOCK_REWARD,
        ramp_up_lower_bound: 0,
        ramp_up_upper_bound: 0,
        genesis: GenesisParams {
            timestamp: 0,
            difficulty: 1,
            coinbase: [0u8; 20],
            energy_limit: 10_000_000,
            extra_data: b"unity regtest".to_vec(),
            premine: Vec::new(),
        },
    }
}
