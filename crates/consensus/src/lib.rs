//! Consensus constants, chain parameters, rewards, and hybrid difficulty accounting.

pub mod constants;
pub mod difficulty;
pub mod money;
pub mod params;
pub mod rewards;

pub use difficulty::{ChainDifficulty, SealType};
pub use params::{chain_params, ChainParams, GenesisParams, Network};
pub use rewards::block_reward;

pub type Hash256 = [u8; 32];
pub type Address = [u8; 20];

pub const ZERO_HASH: Hash256 = [0u8; 32];
