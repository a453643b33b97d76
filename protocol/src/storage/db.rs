//! # TangleDB — Persistent Storage Engine
//!
//! The on-disk [`PersistenceProvider`], built on sled's embedded key-value
//! store. Every partition gets its own named tree:
//!
//! | Tree                   | Key                          | Value            |
//! |------------------------|------------------------------|------------------|
//! | `transaction`          | `hash` (49B)                 | packed payload   |
//! | `transaction-metadata` | `hash` (49B) + field tag     | `bincode(field)` |
//! | `approvers`            | `hash` + `approver hash`     | empty            |
//! | `address`              | `address` + `tx hash`        | empty            |
//! | `bundle`               | `bundle` + `tx hash`         | empty            |
//! | `tag`                  | `tag` + `tx hash`            | empty            |
//! | `milestone`            | `index` (4B BE)              | `bincode(record)`|
//! | `state-diff`           | `milestone hash` (49B)       | `bincode(diff)`  |
//!
//! Milestone indices are big-endian so sled's lexicographic ordering matches
//! numeric ordering, which is what makes `next`/`previous` work.
//!
//! ## Atomicity
//!
//! A write batch is split per tree and each tree's share is applied as one
//! sled `Batch`. A crash between two trees can leave an index entry without
//! its transaction (or the reverse), which every reader already tolerates:
//! a missing payload loads as a prefilled record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use sled::{Batch, Db, IVec, Tree};
use tracing::{debug, info};

use super::provider::{Entry, Partition, PersistenceProvider, StorageResult, WriteBatch};

// ---------------------------------------------------------------------------
// TangleDB
// ---------------------------------------------------------------------------

/// sled-backed persistence provider.
///
/// sled trees support concurrent readers and serialized writers, so
/// `TangleDB` is shared as `Arc<TangleDB>` without extra locking.
#[derive(Debug)]
pub struct TangleDB {
    db: Db,
    trees: HashMap<Partition, Tree>,
    available: AtomicBool,
}

impl TangleDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    ///
    /// Ideal for unit tests: no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let mut trees = HashMap::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            trees.insert(partition, db.open_tree(partition.name())?);
        }
        Ok(Self {
            db,
            trees,
            available: AtomicBool::new(false),
        })
    }

    fn tree(&self, partition: Partition) -> &Tree {
        // Every partition's tree is opened in `from_db`.
        &self.trees[&partition]
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn to_entry((key, value): (IVec, IVec)) -> Entry {
    (key.to_vec(), value.to_vec())
}

impl PersistenceProvider for TangleDB {
    fn name(&self) -> &str {
        "sled"
    }

    fn init(&self) -> StorageResult<()> {
        self.available.store(true, Ordering::SeqCst);
        info!(
            transactions = self.tree(Partition::Transaction).len(),
            milestones = self.tree(Partition::Milestone).len(),
            "sled provider ready"
        );
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> StorageResult<()> {
        self.available.store(false, Ordering::SeqCst);
        self.flush()?;
        debug!("sled provider flushed and closed");
        Ok(())
    }

    fn get(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree(partition).get(key)?.map(|v| v.to_vec()))
    }

    fn save(&self, partition: Partition, key: &[u8], value: &[u8]) -> StorageResult<bool> {
        self.tree(partition).insert(key, value)?;
        Ok(true)
    }

    fn save_batch(&self, batch: &WriteBatch) -> StorageResult<bool> {
        let mut per_tree: HashMap<Partition, Batch> = HashMap::new();
        for (partition, key, value) in batch.iter() {
            per_tree
                .entry(*partition)
                .or_default()
                .insert(key.as_slice(), value.as_slice());
        }
        for (partition, tree_batch) in per_tree {
            self.tree(partition).apply_batch(tree_batch)?;
        }
        Ok(true)
    }

    fn delete(&self, partition: Partition, key: &[u8]) -> StorageResult<()> {
        self.tree(partition).remove(key)?;
        Ok(())
    }

    fn exists(&self, partition: Partition, key: &[u8]) -> StorageResult<bool> {
        Ok(self.tree(partition).contains_key(key)?)
    }

    fn may_exist(&self, partition: Partition, key: &[u8]) -> StorageResult<bool> {
        // sled has no bloom filter to consult, so the exact check is the
        // cheapest one available.
        self.exists(partition, key)
    }

    fn count(&self, partition: Partition) -> StorageResult<u64> {
        Ok(self.tree(partition).len() as u64)
    }

    fn first(&self, partition: Partition) -> StorageResult<Option<Entry>> {
        Ok(self.tree(partition).first()?.map(to_entry))
    }

    fn latest(&self, partition: Partition) -> StorageResult<Option<Entry>> {
        Ok(self.tree(partition).last()?.map(to_entry))
    }

    fn next(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Entry>> {
        Ok(self.tree(partition).get_gt(key)?.map(to_entry))
    }

    fn previous(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Entry>> {
        Ok(self.tree(partition).get_lt(key)?.map(to_entry))
    }

    fn keys_starting_with(
        &self,
        partition: Partition,
        prefix: &[u8],
    ) -> StorageResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.tree(partition).scan_prefix(prefix).keys() {
            keys.push(item?.to_vec());
        }
        Ok(keys)
    }

    fn keys_with_missing_references(&self, partition: Partition) -> StorageResult<Vec<Vec<u8>>> {
        let Some(reference) = partition.reference_partition() else {
            return Ok(Vec::new());
        };
        let references = self.tree(reference);
        let mut missing = Vec::new();
        for item in self.tree(partition).iter().keys() {
            let key = item?;
            if references.scan_prefix(&key).next().is_none() {
                missing.push(key.to_vec());
            }
        }
        Ok(missing)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::provider::{Indexable, IntegerIndex};

    // -- Helpers ------------------------------------------------------------

    fn temp_db() -> TangleDB {
        let db = TangleDB::open_temporary().expect("should create temp db");
        db.init().expect("init");
        db
    }

    fn index(i: u32) -> Vec<u8> {
        IntegerIndex(i).bytes()
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn open_temporary_database() {
        let db = temp_db();
        assert!(db.is_available());
        for partition in Partition::ALL {
            assert_eq!(db.count(partition).unwrap(), 0);
        }
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = TangleDB::open(dir.path()).expect("should open db");
            db.init().unwrap();
            db.save(Partition::Milestone, &index(3), b"m3").unwrap();
            db.shutdown().unwrap();
            assert!(!db.is_available());
        }
        let db = TangleDB::open(dir.path()).expect("should reopen db");
        assert_eq!(
            db.get(Partition::Milestone, &index(3)).unwrap(),
            Some(b"m3".to_vec())
        );
    }

    #[test]
    fn partitions_are_isolated() {
        let db = temp_db();
        db.save(Partition::Tag, b"key", b"tag").unwrap();
        assert!(db.exists(Partition::Tag, b"key").unwrap());
        assert!(!db.exists(Partition::Bundle, b"key").unwrap());
        db.delete(Partition::Tag, b"key").unwrap();
        assert!(!db.may_exist(Partition::Tag, b"key").unwrap());
    }

    #[test]
    fn ordered_navigation_over_big_endian_keys() {
        let db = temp_db();
        for i in [2u32, 5, 9, 300] {
            db.save(Partition::Milestone, &index(i), &i.to_le_bytes()).unwrap();
        }

        assert_eq!(db.first(Partition::Milestone).unwrap().unwrap().0, index(2));
        assert_eq!(db.latest(Partition::Milestone).unwrap().unwrap().0, index(300));
        assert_eq!(db.next(Partition::Milestone, &index(5)).unwrap().unwrap().0, index(9));
        assert_eq!(db.next(Partition::Milestone, &index(9)).unwrap().unwrap().0, index(300));
        assert_eq!(db.previous(Partition::Milestone, &index(5)).unwrap().unwrap().0, index(2));
        assert!(db.previous(Partition::Milestone, &index(2)).unwrap().is_none());
    }

    #[test]
    fn batch_spans_partitions() {
        let db = temp_db();
        let mut batch = WriteBatch::new();
        batch
            .put(Partition::Transaction, b"tx".to_vec(), b"payload".to_vec())
            .put(Partition::Approvers, b"parent-tx".to_vec(), Vec::new());
        assert!(db.save_batch(&batch).unwrap());
        assert_eq!(db.count(Partition::Transaction).unwrap(), 1);
        assert_eq!(
            db.keys_starting_with(Partition::Approvers, b"parent").unwrap(),
            vec![b"parent-tx".to_vec()]
        );
    }

    #[test]
    fn missing_references_are_unapproved_keys() {
        let db = temp_db();
        db.save(Partition::Transaction, b"a", b"").unwrap();
        db.save(Partition::Transaction, b"b", b"").unwrap();
        db.save(Partition::Approvers, b"a-child", b"").unwrap();

        let missing = db
            .keys_with_missing_references(Partition::Transaction)
            .unwrap();
        assert_eq!(missing, vec![b"b".to_vec()]);
        assert!(db
            .keys_with_missing_references(Partition::Milestone)
            .unwrap()
            .is_empty());
    }
}
