//! # Milestone Index
//!
//! Milestones are coordinator-issued transactions that checkpoint the
//! tangle. Each one has a strictly increasing integer index, so the
//! milestone partition is the one place the node relies on ordered
//! navigation: `next(3)` is the first milestone with an index above 3.
//!
//! Milestones never change once created. A lookup cache keyed by index sits
//! in front of the facade and only grows; the one exception is `delete`,
//! which evicts the deleted index so a stale entry cannot outlive it.
//!
//! The index also tracks the latest milestone hash the node knows about.
//! The gossip engine piggybacks it on outbound packets and answers
//! random-tip requests with it.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::Hash;
use crate::ledger::state_diff::StateDiff;
use crate::storage::{Entry, Indexable, IntegerIndex, Partition, StorageResult, Tangle};

/// A milestone: an index and the hash of the transaction that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub index: u32,
    pub hash: Hash,
}

impl Milestone {
    pub fn new(index: u32, hash: Hash) -> Self {
        Self { index, hash }
    }

    fn from_entry((_, value): Entry) -> StorageResult<Self> {
        Ok(bincode::deserialize(&value)?)
    }
}

/// Cached, ordered access to the milestone partition.
#[derive(Debug)]
pub struct MilestoneIndex {
    tangle: Tangle,
    cache: DashMap<u32, Milestone>,
    latest_known: RwLock<Option<Milestone>>,
}

impl MilestoneIndex {
    pub fn new(tangle: Tangle) -> Self {
        Self {
            tangle,
            cache: DashMap::new(),
            latest_known: RwLock::new(None),
        }
    }

    // -- Latest known -------------------------------------------------------

    /// Hash of the highest milestone seen so far, or the null hash.
    pub fn latest_hash(&self) -> Hash {
        self.latest_known.read().map(|m| m.hash).unwrap_or(Hash::NULL)
    }

    /// Highest milestone seen so far.
    pub fn latest_known(&self) -> Option<Milestone> {
        *self.latest_known.read()
    }

    fn observe(&self, milestone: Milestone) {
        let mut latest = self.latest_known.write();
        if latest.map_or(true, |m| milestone.index > m.index) {
            *latest = Some(milestone);
        }
    }

    /// Seeds the latest-known milestone from storage. Run once at startup.
    pub async fn load_latest(&self) -> StorageResult<Option<Milestone>> {
        let latest = self.latest().await?;
        if let Some(milestone) = latest {
            self.observe(milestone);
            info!(index = milestone.index, hash = %milestone.hash, "latest milestone loaded");
        }
        Ok(latest)
    }

    // -- Create / lookup ----------------------------------------------------

    /// Persists a new milestone and caches it.
    pub async fn create(&self, index: u32, hash: Hash) -> StorageResult<bool> {
        let milestone = Milestone::new(index, hash);
        let bytes = bincode::serialize(&milestone)?;
        let saved = self
            .tangle
            .save(Partition::Milestone, &IntegerIndex(index), bytes)
            .await?;
        self.cache.insert(index, milestone);
        self.observe(milestone);
        debug!(index, hash = %hash, "milestone created");
        Ok(saved)
    }

    /// Milestone at exactly `index`, from the cache or storage.
    pub async fn get(&self, index: u32) -> StorageResult<Option<Milestone>> {
        if let Some(cached) = self.cache.get(&index) {
            return Ok(Some(*cached));
        }
        let Some(bytes) = self
            .tangle
            .load(Partition::Milestone, &IntegerIndex(index))
            .await?
        else {
            return Ok(None);
        };
        let milestone: Milestone = bincode::deserialize(&bytes)?;
        self.cache.insert(index, milestone);
        Ok(Some(milestone))
    }

    pub async fn delete(&self, index: u32) -> StorageResult<()> {
        self.tangle
            .delete(Partition::Milestone, &IntegerIndex(index))
            .await?;
        self.cache.remove(&index);
        Ok(())
    }

    // -- Navigation ---------------------------------------------------------

    pub async fn first(&self) -> StorageResult<Option<Milestone>> {
        self.decode(self.tangle.first(Partition::Milestone).await?)
    }

    pub async fn latest(&self) -> StorageResult<Option<Milestone>> {
        self.decode(self.tangle.latest(Partition::Milestone).await?)
    }

    /// First milestone with an index strictly above `index`.
    pub async fn next(&self, index: u32) -> StorageResult<Option<Milestone>> {
        self.next_after(IntegerIndex(index)).await
    }

    /// Last milestone with an index strictly below `index`.
    pub async fn previous(&self, index: u32) -> StorageResult<Option<Milestone>> {
        self.previous_before(IntegerIndex(index)).await
    }

    async fn next_after(&self, key: IntegerIndex) -> StorageResult<Option<Milestone>> {
        self.decode(self.tangle.next(Partition::Milestone, &key).await?)
    }

    async fn previous_before(&self, key: IntegerIndex) -> StorageResult<Option<Milestone>> {
        self.decode(self.tangle.previous(Partition::Milestone, &key).await?)
    }

    /// Nearest milestone at or before `index`.
    pub async fn find_closest_prev_milestone(&self, index: u32) -> StorageResult<Option<Milestone>> {
        let key = IntegerIndex(index);
        if key.incremented() == key {
            return self.latest().await;
        }
        self.previous_before(key.incremented()).await
    }

    /// Nearest milestone at or after `index`. Index 0 means "the first one".
    pub async fn find_closest_next_milestone(&self, index: u32) -> StorageResult<Option<Milestone>> {
        if index == 0 {
            return self.first().await;
        }
        self.next_after(IntegerIndex(index).decremented()).await
    }

    fn decode(&self, entry: Option<Entry>) -> StorageResult<Option<Milestone>> {
        let Some(entry) = entry else {
            return Ok(None);
        };
        let milestone = Milestone::from_entry(entry)?;
        self.cache.entry(milestone.index).or_insert(milestone);
        Ok(Some(milestone))
    }

    // -- Snapshots ----------------------------------------------------------

    /// `true` if a state diff is stored under the milestone's hash.
    pub async fn has_snapshot(&self, milestone: &Milestone) -> StorageResult<bool> {
        StateDiff::exists(&self.tangle, &milestone.hash).await
    }

    pub async fn first_with_snapshot(&self) -> StorageResult<Option<Milestone>> {
        let mut current = self.first().await?;
        while let Some(milestone) = current {
            if self.has_snapshot(&milestone).await? {
                return Ok(Some(milestone));
            }
            current = self.next(milestone.index).await?;
        }
        Ok(None)
    }

    pub async fn latest_with_snapshot(&self) -> StorageResult<Option<Milestone>> {
        let mut current = self.latest().await?;
        while let Some(milestone) = current {
            if self.has_snapshot(&milestone).await? {
                return Ok(Some(milestone));
            }
            current = self.previous(milestone.index).await?;
        }
        Ok(None)
    }

    /// First milestone above `index` that has a snapshot.
    pub async fn next_with_snapshot(&self, index: u32) -> StorageResult<Option<Milestone>> {
        let mut current = self.next(index).await?;
        while let Some(milestone) = current {
            if self.has_snapshot(&milestone).await? {
                return Ok(Some(milestone));
            }
            current = self.next(milestone.index).await?;
        }
        Ok(None)
    }

    /// Number of milestones currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::storage::{MemoryProvider, PersistenceProvider};

    // -- Helpers ------------------------------------------------------------

    fn hash_for(index: u32) -> Hash {
        Hash::calculate(&[1, 0, (index % 3) as i8 - 1, 1, (index % 2) as i8])
    }

    async fn index_with(indices: &[u32]) -> MilestoneIndex {
        let provider: Arc<dyn PersistenceProvider> = Arc::new(MemoryProvider::volatile());
        let index = MilestoneIndex::new(Tangle::new(vec![provider]));
        for &i in indices {
            index.create(i, hash_for(i)).await.unwrap();
        }
        index
    }

    // -- Navigation ---------------------------------------------------------

    #[tokio::test]
    async fn navigation_over_sparse_indices() {
        let index = index_with(&[2, 5, 9]).await;

        assert_eq!(index.next(3).await.unwrap().unwrap().index, 5);
        assert_eq!(index.previous(5).await.unwrap().unwrap().index, 2);
        assert_eq!(index.first().await.unwrap().unwrap().index, 2);
        assert_eq!(index.latest().await.unwrap().unwrap().index, 9);
        assert!(index.next(9).await.unwrap().is_none());
        assert!(index.previous(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closest_milestones_include_the_exact_index() {
        let index = index_with(&[2, 5, 9]).await;

        let idx = |m: Option<Milestone>| m.map(|m| m.index);
        assert_eq!(idx(index.find_closest_next_milestone(0).await.unwrap()), Some(2));
        assert_eq!(idx(index.find_closest_next_milestone(5).await.unwrap()), Some(5));
        assert_eq!(idx(index.find_closest_next_milestone(6).await.unwrap()), Some(9));
        assert_eq!(idx(index.find_closest_next_milestone(10).await.unwrap()), None);

        assert_eq!(idx(index.find_closest_prev_milestone(5).await.unwrap()), Some(5));
        assert_eq!(idx(index.find_closest_prev_milestone(8).await.unwrap()), Some(5));
        assert_eq!(idx(index.find_closest_prev_milestone(1).await.unwrap()), None);
        assert_eq!(idx(index.find_closest_prev_milestone(u32::MAX).await.unwrap()), Some(9));
    }

    // -- Cache and latest ---------------------------------------------------

    #[tokio::test]
    async fn latest_hash_tracks_the_highest_index() {
        let index = index_with(&[]).await;
        assert!(index.latest_hash().is_null());

        index.create(7, hash_for(7)).await.unwrap();
        index.create(3, hash_for(3)).await.unwrap();
        assert_eq!(index.latest_hash(), hash_for(7));
    }

    #[tokio::test]
    async fn delete_evicts_from_cache_and_storage() {
        let index = index_with(&[4]).await;
        assert!(index.get(4).await.unwrap().is_some());
        index.delete(4).await.unwrap();
        assert!(index.get(4).await.unwrap().is_none());
        assert_eq!(index.cached(), 0);
    }

    // -- Snapshots ----------------------------------------------------------

    #[tokio::test]
    async fn snapshot_scans_skip_milestones_without_diffs() {
        let index = index_with(&[2, 5, 9]).await;
        StateDiff::new(hash_for(5), BTreeMap::new())
            .store(&index.tangle)
            .await
            .unwrap();

        assert_eq!(index.first_with_snapshot().await.unwrap().unwrap().index, 5);
        assert_eq!(index.latest_with_snapshot().await.unwrap().unwrap().index, 5);
        assert_eq!(index.next_with_snapshot(2).await.unwrap().unwrap().index, 5);
        assert!(index.next_with_snapshot(5).await.unwrap().is_none());
    }
}
