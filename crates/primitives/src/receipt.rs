//! Transaction receipts and logs.

use unityd_consensus::{Address, Hash256};

use crate::bloom::Bloom;
use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::merkle::merkle_root;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash256>,
    pub data: Vec<u8>,
}

impl Log {
    pub fn bloom(&self) -> Bloom {
        let mut bloom = Bloom::default();
        bloom.accrue(&self.address);
        for topic in &self.topics {
            bloom.accrue(topic);
        }
        bloom
    }
}

impl Encodable for Log {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_address(&self.address);
        encoder.write_varint(self.topics.len() as u64);
        for topic in &self.topics {
            encoder.write_hash(topic);
        }
        encoder.write_var_bytes(&self.data);
    }
}

impl Decodable for Log {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let address = decoder.read_address()?;
        let count = decoder.read_varint()?;
        let mut topics = Vec::with_capacity(count as usize);
        for _ in 0..count {
            topics.push(decoder.read_hash()?);
        }
        let data = decoder.read_var_bytes()?;
        Ok(Self {
            address,
            topics,
            data,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: Hash256,
    pub success: bool,
    pub energy_used: u64,
    pub logs: Vec<Log>,
    pub error: String,
}

impl Receipt {
    pub fn bloom(&self) -> Bloom {
        let mut bloom = Bloom::default();
        for log in &self.logs {
            bloom.or(&log.bloom());
        }
        bloom
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&crate::encoding::encode(self))
    }
}

impl Encodable for Receipt {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.tx_hash);
        encoder.write_bool(self.success);
        encoder.write_u64_le(self.energy_used);
        encoder.write_varint(self.logs.len() as u64);
        for log in &self.logs {
            log.consensus_encode(encoder);
        }
        encoder.write_var_str(&self.error);
    }
}

impl Decodable for Receipt {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let tx_hash = decoder.read_hash()?;
        let success = decoder.read_bool()?;
        let energy_used = decoder.read_u64_le()?;
        let count = decoder.read_varint()?;
        let mut logs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            logs.push(Log::consensus_decode(decoder)?);
        }
        let error = decoder.read_var_str()?;
        Ok(Self {
            tx_hash,
            success,
            energy_used,
            logs,
            error,
        })
    }
}

pub fn receipts_root(receipts: &[Receipt]) -> Hash256 {
    let hashes: Vec<Hash256> = receipts.iter().map(Receipt::hash).collect();
    merkle_root(&hashes)
}

pub fn receipts_bloom(receipts: &[Receipt]) -> Bloom {
    let mut bloom = Bloom::default();
    for receipt in receipts {
        bloom.or(&receipt.bloom());
    }
    bloom
}
