//! # In-Memory Provider
//!
//! A [`PersistenceProvider`] that keeps every partition in an ordered map.
//! It is what tests run against, and it can sit in front of the sled
//! provider as a hot layer: the facade reads it first and falls through to
//! disk on a miss.
//!
//! Optionally the whole store is written to a bincode snapshot on
//! `shutdown` and restored on `init`, so a memory-only node survives a
//! restart.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::provider::{Entry, Partition, PersistenceProvider, StorageResult, WriteBatch};

type PartitionMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Settings for [`MemoryProvider`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryProviderConfig {
    /// Snapshot file written on shutdown and restored on init. `None`
    /// keeps the provider purely volatile.
    pub backup_path: Option<PathBuf>,
}

/// Ordered in-memory store.
///
/// One lock guards all partitions, so a batch lands atomically and ordered
/// navigation never observes half of one.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    config: MemoryProviderConfig,
    partitions: RwLock<HashMap<Partition, PartitionMap>>,
    available: AtomicBool,
}

impl MemoryProvider {
    pub fn new(config: MemoryProviderConfig) -> Self {
        Self {
            config,
            partitions: RwLock::new(HashMap::new()),
            available: AtomicBool::new(false),
        }
    }

    /// A volatile provider, already initialized. Handy in tests.
    pub fn volatile() -> Self {
        let provider = Self::default();
        provider.available.store(true, Ordering::SeqCst);
        provider
    }

    fn restore(&self, path: &PathBuf) -> StorageResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let bytes = fs::read(path)?;
        let restored: HashMap<Partition, PartitionMap> = bincode::deserialize(&bytes)?;
        let entries: usize = restored.values().map(BTreeMap::len).sum();
        *self.partitions.write() = restored;
        info!(path = %path.display(), entries, "restored memory provider snapshot");
        Ok(())
    }

    fn backup(&self, path: &PathBuf) -> StorageResult<()> {
        let bytes = bincode::serialize(&*self.partitions.read())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        info!(path = %path.display(), "wrote memory provider snapshot");
        Ok(())
    }

    fn with_partition<T>(&self, partition: Partition, f: impl FnOnce(&PartitionMap) -> T) -> T {
        let guard = self.partitions.read();
        match guard.get(&partition) {
            Some(map) => f(map),
            None => f(&PartitionMap::new()),
        }
    }
}

fn cloned((key, value): (&Vec<u8>, &Vec<u8>)) -> Entry {
    (key.clone(), value.clone())
}

impl PersistenceProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn init(&self) -> StorageResult<()> {
        if let Some(path) = &self.config.backup_path {
            self.restore(path)?;
        }
        self.available.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> StorageResult<()> {
        self.available.store(false, Ordering::SeqCst);
        if let Some(path) = &self.config.backup_path {
            if let Err(e) = self.backup(path) {
                warn!(error = %e, path = %path.display(), "memory provider snapshot failed");
                return Err(e);
            }
        }
        Ok(())
    }

    fn get(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.with_partition(partition, |map| map.get(key).cloned()))
    }

    fn save(&self, partition: Partition, key: &[u8], value: &[u8]) -> StorageResult<bool> {
        self.partitions
            .write()
            .entry(partition)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn save_batch(&self, batch: &WriteBatch) -> StorageResult<bool> {
        let mut guard = self.partitions.write();
        for (partition, key, value) in batch.iter() {
            guard
                .entry(*partition)
                .or_default()
                .insert(key.clone(), value.clone());
        }
        Ok(true)
    }

    fn delete(&self, partition: Partition, key: &[u8]) -> StorageResult<()> {
        if let Some(map) = self.partitions.write().get_mut(&partition) {
            map.remove(key);
        }
        Ok(())
    }

    fn exists(&self, partition: Partition, key: &[u8]) -> StorageResult<bool> {
        Ok(self.with_partition(partition, |map| map.contains_key(key)))
    }

    fn may_exist(&self, partition: Partition, key: &[u8]) -> StorageResult<bool> {
        self.exists(partition, key)
    }

    fn count(&self, partition: Partition) -> StorageResult<u64> {
        Ok(self.with_partition(partition, |map| map.len() as u64))
    }

    fn first(&self, partition: Partition) -> StorageResult<Option<Entry>> {
        Ok(self.with_partition(partition, |map| map.iter().next().map(cloned)))
    }

    fn latest(&self, partition: Partition) -> StorageResult<Option<Entry>> {
        Ok(self.with_partition(partition, |map| map.iter().next_back().map(cloned)))
    }

    fn next(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Entry>> {
        use std::ops::Bound::{Excluded, Unbounded};
        Ok(self.with_partition(partition, |map| {
            map.range::<[u8], _>((Excluded(key), Unbounded))
                .next()
                .map(cloned)
        }))
    }

    fn previous(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Entry>> {
        use std::ops::Bound::{Excluded, Unbounded};
        Ok(self.with_partition(partition, |map| {
            map.range::<[u8], _>((Unbounded, Excluded(key)))
                .next_back()
                .map(cloned)
        }))
    }

    fn keys_starting_with(
        &self,
        partition: Partition,
        prefix: &[u8],
    ) -> StorageResult<Vec<Vec<u8>>> {
        use std::ops::Bound::{Included, Unbounded};
        Ok(self.with_partition(partition, |map| {
            map.range::<[u8], _>((Included(prefix), Unbounded))
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        }))
    }

    fn keys_with_missing_references(&self, partition: Partition) -> StorageResult<Vec<Vec<u8>>> {
        use std::ops::Bound::{Included, Unbounded};
        let Some(reference) = partition.reference_partition() else {
            return Ok(Vec::new());
        };
        let guard = self.partitions.read();
        let (Some(keys), references) = (guard.get(&partition), guard.get(&reference)) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .keys()
            .filter(|key| {
                references.map_or(true, |refs| {
                    refs.range::<[u8], _>((Included(key.as_slice()), Unbounded))
                        .next()
                        .map_or(true, |(k, _)| !k.starts_with(key))
                })
            })
            .cloned()
            .collect())
    }
}
