//! Branch-indexed block store, world state and the chain selection engine.

pub mod blockinfo;
pub mod chain;
pub mod error;
pub mod executor;
pub mod genesis;
pub mod index;
pub mod maintenance;
mod recovery;
mod repair;
pub mod store;
pub mod validation;
pub mod world;

pub use blockinfo::{BlockInfo, IndexFormat};
pub use chain::{BlockSummary, BlockTemplate, Blockchain, BlockchainOptions, ImportResult};
pub use error::{ChainError, StateError};
pub use genesis::build_genesis;
pub use maintenance::RevertStatus;
pub use executor::{BlockExecutor, ExecutionError, ExecutionFlags, TransferExecutor, TxExecutionSummary};
pub use store::{BlockStore, IndexedBlock, IntegrityCheckResult};
pub use validation::{HeaderValidators, ValidationError};
pub use world::{Account, AccountState, KvWorldState, StateTrack, WorldState};
