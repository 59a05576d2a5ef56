//! Persistent backend: one fjall partition per [`Column`] inside a single keyspace.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

const SLOW_COMMIT: Duration = Duration::from_millis(500);
const SLOW_COMMIT_WARN_EVERY_SECS: u64 = 30;

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    pub cache_bytes: Option<u64>,
    pub write_buffer_bytes: Option<u64>,
    pub journal_bytes: Option<u64>,
    pub memtable_bytes: Option<u32>,
    pub fsync_ms: Option<u16>,
    /// Sync the journal on every batch instead of buffering until `flush`.
    pub durable_batches: bool,
}

impl FjallOptions {
    fn keyspace_config(&self, path: &Path) -> Config {
        let mut config = Config::new(path);
        if let Some(bytes) = self.cache_bytes {
            config = config.cache_size(bytes);
        }
        if let Some(bytes) = self.write_buffer_bytes {
            config = config.max_write_buffer_size(bytes);
        }
        if let Some(bytes) = self.journal_bytes {
            config = config.max_journaling_size(bytes);
        }
        if self.fsync_ms.is_some() {
            config = config.fsync_ms(self.fsync_ms);
        }
        config
    }

    fn batch_durability(&self) -> PersistMode {
        if self.durable_batches {
            PersistMode::SyncAll
        } else {
            PersistMode::Buffer
        }
    }
}

pub struct FjallStore {
    keyspace: Keyspace,
    columns: Vec<PartitionHandle>,
    durability: PersistMode,
    last_slow_commit_warning: AtomicU64,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, FjallOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let keyspace = options.keyspace_config(path).open().map_err(backend_error)?;

        let mut partition = PartitionCreateOptions::default();
        if let Some(bytes) = options.memtable_bytes {
            partition = partition.max_memtable_size(bytes);
        }
        let columns = Column::ALL
            .iter()
            .map(|column| keyspace.open_partition(column.as_str(), partition.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_error)?;

        unityd_log::log_debug!(
            "Opened fjall keyspace at {} ({} partitions)",
            path.display(),
            columns.len()
        );
        Ok(Self {
            keyspace,
            columns,
            durability: options.batch_durability(),
            last_slow_commit_warning: AtomicU64::new(0),
        })
    }

    /// Bytes the keyspace currently occupies on disk.
    pub fn disk_space(&self) -> u64 {
        self.keyspace.disk_space()
    }

    fn column(&self, column: Column) -> Result<&PartitionHandle, StoreError> {
        self.columns.get(column.index()).ok_or_else(|| {
            StoreError::Backend(format!("fjall partition {} is not open", column.as_str()))
        })
    }

    fn warn_slow_commit(&self, elapsed: Duration, batch: &WriteBatch) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last = self.last_slow_commit_warning.load(Ordering::Relaxed);
        if now.saturating_sub(last) < SLOW_COMMIT_WARN_EVERY_SECS
            || self
                .last_slow_commit_warning
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            return;
        }
        let touched = batch.touched();
        let columns = Column::ALL
            .iter()
            .filter(|column| touched & column.bit() != 0)
            .map(|column| column.as_str())
            .collect::<Vec<_>>()
            .join(",");
        unityd_log::log_warn!(
            "Slow block index commit: {}ms for {} ops on {} (journals {})",
            elapsed.as_millis(),
            batch.len(),
            columns,
            self.keyspace.journal_count(),
        );
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.column(column)?.get(key).map_err(backend_error)?;
        Ok(value.map(|slice| slice.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.column(column)?.insert(key, value).map_err(backend_error)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.column(column)?.remove(key).map_err(backend_error)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let mut rows = Vec::new();
        self.for_each_prefix(column, prefix, &mut |key, value| {
            rows.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(rows)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        for entry in self.column(column)?.prefix(prefix) {
            let (key, value) = entry.map_err(backend_error)?;
            visitor(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pending = Batch::with_capacity(self.keyspace.clone(), batch.len())
            .durability(Some(self.durability));
        for op in batch.iter() {
            let partition = self.column(op.column())?;
            match op {
                WriteOp::Put { key, value, .. } => {
                    pending.insert(partition, key.as_slice(), value.as_slice())
                }
                WriteOp::Delete { key, .. } => pending.remove(partition, key.as_slice()),
            }
        }
        let started = Instant::now();
        pending.commit().map_err(backend_error)?;
        let elapsed = started.elapsed();
        if elapsed >= SLOW_COMMIT {
            self.warn_slow_commit(elapsed, batch);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(backend_error)
    }
}

fn backend_error(err: fjall::Error) -> StoreError {
    StoreError::Backend(format!("fjall: {err}"))
}
