//! Height-indexed branch index and the content-addressed block body column.

use std::sync::Arc;

use unityd_consensus::Hash256;
use unityd_primitives::block::Block;
use unityd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::blockinfo::{decode_level, encode_level, BlockInfo, IndexFormat};
use crate::error::ChainError;

const META_INDEX_SIZE_KEY: &[u8] = b"index_size";
const META_INDEX_FORMAT_KEY: &[u8] = b"index_format";

/// Every known block per height across all branches, plus the bodies by hash.
///
/// `size` is one past the highest stored level. The format marker is resolved
/// once in [`BranchIndex::open`]; afterwards every level is in the current format.
pub struct BranchIndex<S> {
    store: Arc<S>,
    size: u64,
}

impl<S: KeyValueStore> BranchIndex<S> {
    pub fn open(store: Arc<S>) -> Result<Self, ChainError> {
        let stored_size = read_size(store.as_ref())?;
        let format = match store.get(Column::Meta, META_INDEX_FORMAT_KEY)? {
            Some(bytes) => match bytes.as_slice() {
                [value] => IndexFormat::from_u8(*value)
                    .ok_or(ChainError::CorruptIndex("unknown block index format"))?,
                _ => return Err(ChainError::CorruptIndex("invalid block index format marker")),
            },
            None => {
                let has_levels = stored_size.is_some()
                    || store.contains(Column::BlockInfo, &height_key(0))?;
                if has_levels {
                    IndexFormat::Legacy
                } else {
                    store.put(
                        Column::Meta,
                        META_INDEX_FORMAT_KEY,
                        &[IndexFormat::Current.as_u8()],
                    )?;
                    IndexFormat::Current
                }
            }
        };

        let size = match stored_size {
            Some(size) => size,
            None => scan_size(store.as_ref())?,
        };
        let mut index = Self { store, size };
        if format == IndexFormat::Legacy {
            index.migrate_legacy()?;
        }
        if stored_size != Some(index.size) {
            index.store.put(Column::Meta, META_INDEX_SIZE_KEY, &index.size.to_le_bytes())?;
        }
        Ok(index)
    }

    fn migrate_legacy(&mut self) -> Result<(), ChainError> {
        let rows = self.store.scan_prefix(Column::BlockInfo, &[])?;
        let mut batch = WriteBatch::new();
        for (key, value) in &rows {
            let infos = decode_level(value, IndexFormat::Legacy)?;
            batch.put(Column::BlockInfo, key.as_slice(), encode_level(&infos));
        }
        batch.put(
            Column::Meta,
            META_INDEX_FORMAT_KEY,
            vec![IndexFormat::Current.as_u8()],
        );
        self.store.write_batch(&batch)?;
        unityd_log::log_info!(
            "Migrated {} block index levels to the current format",
            rows.len()
        );
        Ok(())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Highest stored level, `None` for an empty index.
    pub fn max_number(&self) -> Option<u64> {
        self.size.checked_sub(1)
    }

    pub fn level(&self, height: u64) -> Result<Option<Vec<BlockInfo>>, ChainError> {
        match self.store.get(Column::BlockInfo, &height_key(height))? {
            Some(bytes) => Ok(Some(decode_level(&bytes, IndexFormat::Current)?)),
            None => Ok(None),
        }
    }

    pub fn set_level(&mut self, height: u64, infos: &[BlockInfo]) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::BlockInfo, height_key(height), encode_level(infos));
        let size = if height >= self.size {
            let size = height.saturating_add(1);
            batch.put(Column::Meta, META_INDEX_SIZE_KEY, size.to_le_bytes());
            size
        } else {
            self.size
        };
        self.store.write_batch(&batch)?;
        self.size = size;
        Ok(())
    }

    pub fn remove_level(&mut self, height: u64) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        batch.delete(Column::BlockInfo, height_key(height));
        let size = if height.saturating_add(1) == self.size {
            batch.put(Column::Meta, META_INDEX_SIZE_KEY, height.to_le_bytes());
            height
        } else {
            self.size
        };
        self.store.write_batch(&batch)?;
        self.size = size;
        Ok(())
    }

    pub fn set_size(&mut self, size: u64) -> Result<(), ChainError> {
        self.store
            .put(Column::Meta, META_INDEX_SIZE_KEY, &size.to_le_bytes())?;
        self.size = size;
        Ok(())
    }

    pub fn body(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        match self.store.get(Column::BlockBody, hash)? {
            Some(bytes) => Ok(Some(Block::consensus_decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_body(&self, hash: &Hash256) -> Result<bool, ChainError> {
        Ok(self.store.contains(Column::BlockBody, hash)?)
    }

    pub fn put_body(&self, block: &Block) -> Result<(), ChainError> {
        let hash = block.hash();
        self.store
            .put(Column::BlockBody, &hash, &block.consensus_encode())?;
        Ok(())
    }

    pub fn delete_body(&self, hash: &Hash256) -> Result<(), ChainError> {
        self.store.delete(Column::BlockBody, hash)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        self.store.flush()?;
        Ok(())
    }
}

pub fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

fn read_size<S: KeyValueStore>(store: &S) -> Result<Option<u64>, ChainError> {
    let bytes = match store.get(Column::Meta, META_INDEX_SIZE_KEY)? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let raw: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ChainError::CorruptIndex("invalid block index size"))?;
    Ok(Some(u64::from_le_bytes(raw)))
}

fn scan_size<S: KeyValueStore>(store: &S) -> Result<u64, StoreError> {
    let mut size = 0u64;
    let mut visitor = |key: &[u8], _value: &[u8]| {
        let raw: [u8; 8] = key
            .try_into()
            .map_err(|_| StoreError::Backend("invalid block index key".to_string()))?;
        size = size.max(u64::from_be_bytes(raw).saturating_add(1));
        Ok(())
    };
    store.for_each_prefix(Column::BlockInfo, &[], &mut visitor)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use unityd_consensus::{ChainDifficulty, SealType, ZERO_HASH};
    use unityd_primitives::encoding::Encoder;
    use unityd_storage::memory::MemoryStore;

    fn info(tag: u8, main_chain: bool) -> BlockInfo {
        BlockInfo::new(
            [tag; 32],
            ZERO_HASH,
            ChainDifficulty::genesis(SealType::Mining, U256::from(tag)),
            main_chain,
        )
    }

    #[test]
    fn size_tracks_highest_level() {
        let store = Arc::new(MemoryStore::new());
        let mut index = BranchIndex::open(Arc::clone(&store)).expect("open");
        assert_eq!(index.max_number(), None);

        index.set_level(0, &[info(1, true)]).expect("level 0");
        index.set_level(1, &[info(2, true)]).expect("level 1");
        index.set_level(0, &[info(1, true), info(3, false)]).expect("level 0 again");
        assert_eq!(index.size(), 2);

        index.remove_level(1).expect("remove");
        assert_eq!(index.max_number(), Some(0));

        let reopened = BranchIndex::open(store).expect("reopen");
        assert_eq!(reopened.size(), 1);
        assert_eq!(reopened.level(0).expect("read").map(|infos| infos.len()), Some(2));
    }

    #[test]
    fn legacy_index_is_migrated_on_open() {
        let store = Arc::new(MemoryStore::new());
        for height in 0..3u64 {
            let mut encoder = Encoder::new();
            encoder.write_varint(1);
            encoder.write_hash(&[height as u8 + 1; 32]);
            encoder.write_u256(&U256::from(10 * (height + 1)));
            encoder.write_bool(true);
            store
                .put(Column::BlockInfo, &height_key(height), &encoder.into_inner())
                .expect("legacy level");
        }

        let index = BranchIndex::open(Arc::clone(&store)).expect("open legacy");
        assert_eq!(index.size(), 3);
        let level = index.level(2).expect("read").expect("level 2");
        assert_eq!(level[0].mining_difficulty, U256::from(30u64));
        assert_eq!(level[0].staking_difficulty, U256::one());
        assert!(level[0].main_chain);
        assert_eq!(
            store.get(Column::Meta, META_INDEX_FORMAT_KEY).expect("meta"),
            Some(vec![IndexFormat::Current.as_u8()])
        );
    }
}
