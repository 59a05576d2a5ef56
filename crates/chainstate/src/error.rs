use unityd_primitives::block::BlockDecodeError;
use unityd_primitives::encoding::DecodeError;
use unityd_storage::StoreError;

#[derive(Debug)]
pub enum StateError {
    Store(StoreError),
    Decode(DecodeError),
    MissingRoot([u8; 32]),
    Overflow,
    Poisoned,
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Store(err) => write!(f, "{err}"),
            StateError::Decode(err) => write!(f, "invalid account snapshot: {err}"),
            StateError::MissingRoot(root) => write!(
                f,
                "state root {} is not available",
                unityd_primitives::hex::hash256_to_hex(root)
            ),
            StateError::Overflow => write!(f, "account balance overflow"),
            StateError::Poisoned => write!(f, "world state lock poisoned"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        StateError::Store(err)
    }
}

impl From<DecodeError> for StateError {
    fn from(err: DecodeError) -> Self {
        StateError::Decode(err)
    }
}

#[derive(Debug)]
pub enum ChainError {
    Store(StoreError),
    State(StateError),
    Decode(DecodeError),
    Block(BlockDecodeError),
    /// The executor reported a failure that must stop the node.
    FatalVm(String),
    CorruptIndex(&'static str),
    MissingBlock([u8; 32]),
    Poisoned(&'static str),
    Io(std::io::Error),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Store(err) => write!(f, "{err}"),
            ChainError::State(err) => write!(f, "{err}"),
            ChainError::Decode(err) => write!(f, "{err}"),
            ChainError::Block(err) => write!(f, "invalid stored block: {err}"),
            ChainError::FatalVm(message) => write!(f, "fatal executor error: {message}"),
            ChainError::CorruptIndex(message) => write!(f, "{message}"),
            ChainError::MissingBlock(hash) => write!(
                f,
                "block {} missing from the database",
                unityd_primitives::hex::hash256_to_hex(hash)
            ),
            ChainError::Poisoned(message) => write!(f, "{message}"),
            ChainError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}

impl From<StateError> for ChainError {
    fn from(err: StateError) -> Self {
        ChainError::State(err)
    }
}

impl From<DecodeError> for ChainError {
    fn from(err: DecodeError) -> Self {
        ChainError::Decode(err)
    }
}

impl From<BlockDecodeError> for ChainError {
    fn from(err: BlockDecodeError) -> Self {
        ChainError::Block(err)
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err)
    }
}
