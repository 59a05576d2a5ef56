//! Consensus-wide constants shared by block import and validation.

/// Candidates further than this from the best height are not worth trying.
pub const SKIP_TRY_TO_CONNECT_WINDOW: u64 = 32;
/// How many levels below the top the best-block lookup may scan before the
/// index is declared corrupt.
pub const BEST_BLOCK_SCAN_DEPTH: u64 = 128;
/// Progress log interval while re-importing the main chain.
pub const REDO_IMPORT_PROGRESS_INTERVAL: u64 = 10_000;
/// Maximum size of the header extra data field, in bytes.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;
/// Energy charged for every transaction before data is counted.
pub const TX_INTRINSIC_ENERGY: u64 = 21_000;
/// Energy charged per byte of transaction data.
pub const TX_DATA_BYTE_ENERGY: u64 = 16;
/// Per-byte data charge before the fork rules apply.
pub const TX_DATA_BYTE_ENERGY_PRE_FORK: u64 = 68;
/// Length of a compact recoverable signature: recovery id + r + s.
pub const SIGNATURE_LENGTH: usize = 65;
