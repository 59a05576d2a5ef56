//! Block header and block types.

use primitive_types::U256;
use unityd_consensus::{Address, Hash256, SealType};

use crate::bloom::Bloom;
use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::sha256d;
use crate::merkle::merkle_root;
use crate::transaction::Transaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: Hash256,
    pub number: u64,
    pub timestamp: u64,
    pub difficulty: U256,
    pub state_root: Hash256,
    pub tx_trie_root: Hash256,
    pub receipts_root: Hash256,
    pub log_bloom: Bloom,
    pub seal_type: SealType,
    pub coinbase: Address,
    pub energy_limit: u64,
    pub energy_consumed: u64,
    pub extra_data: Vec<u8>,
    /// Nonce/solution for mined blocks, signature for staked ones.
    pub seal: Vec<u8>,
}

impl BlockHeader {
    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    pub fn consensus_encode_into(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.parent_hash);
        encoder.write_u64_le(self.number);
        encoder.write_u64_le(self.timestamp);
        encoder.write_u256(&self.difficulty);
        encoder.write_hash(&self.state_root);
        encoder.write_hash(&self.tx_trie_root);
        encoder.write_hash(&self.receipts_root);
        encoder.write_bytes(&self.log_bloom.0);
        encoder.write_u8(self.seal_type.as_u8());
        encoder.write_address(&self.coinbase);
        encoder.write_u64_le(self.energy_limit);
        encoder.write_u64_le(self.energy_consumed);
        encoder.write_var_bytes(&self.extra_data);
        encoder.write_var_bytes(&self.seal);
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode_into(&mut encoder);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = Self::consensus_decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(header)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let parent_hash = decoder.read_hash()?;
        let number = decoder.read_u64_le()?;
        let timestamp = decoder.read_u64_le()?;
        let difficulty = decoder.read_u256()?;
        let state_root = decoder.read_hash()?;
        let tx_trie_root = decoder.read_hash()?;
        let receipts_root = decoder.read_hash()?;
        let log_bloom = Bloom(decoder.read_fixed()?);
        let seal_type = SealType::from_u8(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("unknown seal type"))?;
        let coinbase = decoder.read_address()?;
        let energy_limit = decoder.read_u64_le()?;
        let energy_consumed = decoder.read_u64_le()?;
        let extra_data = decoder.read_var_bytes()?;
        let seal = decoder.read_var_bytes()?;
        Ok(Self {
            parent_hash,
            number,
            timestamp,
            difficulty,
            state_root,
            tx_trie_root,
            receipts_root,
            log_bloom,
            seal_type,
            coinbase,
            energy_limit,
            energy_consumed,
            extra_data,
            seal,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash256 {
        self.header.parent_hash
    }

    pub fn tx_trie_root(&self) -> Hash256 {
        tx_trie_root(&self.transactions)
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode_into(&mut encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.consensus_encode_into(&mut encoder);
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, BlockDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode_from(&mut decoder)?;
        let count = decoder.read_varint()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut transactions = Vec::with_capacity(count);
        for index in 0..count {
            let tx = Transaction::decode_from(&mut decoder)
                .map_err(|error| BlockDecodeError::Transaction { index, error })?;
            transactions.push(tx);
        }
        if !decoder.is_empty() {
            return Err(BlockDecodeError::Decode(DecodeError::TrailingBytes));
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

pub fn tx_trie_root(transactions: &[Transaction]) -> Hash256 {
    let hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
    merkle_root(&hashes)
}

#[derive(Debug)]
pub enum BlockDecodeError {
    Decode(DecodeError),
    Transaction { index: usize, error: DecodeError },
}

impl From<DecodeError> for BlockDecodeError {
    fn from(error: DecodeError) -> Self {
        BlockDecodeError::Decode(error)
    }
}

impl std::fmt::Display for BlockDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDecodeError::Decode(error) => write!(f, "{error}"),
            BlockDecodeError::Transaction { index, error } => {
                write!(f, "transaction {index}: {error}")
            }
        }
    }
}

impl std::error::Error for BlockDecodeError {}
