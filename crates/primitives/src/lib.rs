//! Block, transaction and receipt types with their canonical byte encodings.

pub mod block;
pub mod bloom;
pub mod encoding;
pub mod hash;
pub mod hex;
pub mod merkle;
pub mod receipt;
pub mod transaction;

pub use block::{Block, BlockDecodeError, BlockHeader};
pub use bloom::Bloom;
pub use hash::{hash160, sha256, sha256d};
pub use merkle::merkle_root;
pub use receipt::{Log, Receipt};
pub use transaction::{SignatureError, Transaction};
