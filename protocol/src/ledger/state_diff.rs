//! Ledger state diffs.
//!
//! A [`StateDiff`] records the balance changes a milestone confirmed,
//! keyed by the milestone's hash. Its presence is what "this milestone has
//! a snapshot" means to the milestone index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::storage::{Partition, StorageResult, Tangle};

/// Address balance deltas confirmed by one milestone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Milestone hash the diff belongs to.
    pub hash: Hash,
    /// Address to signed balance change.
    pub state: BTreeMap<Hash, i64>,
}

impl StateDiff {
    pub fn new(hash: Hash, state: BTreeMap<Hash, i64>) -> Self {
        Self { hash, state }
    }

    /// Sum of all deltas. A consistent diff moves value around and nets to zero.
    pub fn net_change(&self) -> i64 {
        self.state.values().sum()
    }

    pub async fn store(&self, tangle: &Tangle) -> StorageResult<bool> {
        let bytes = bincode::serialize(self)?;
        tangle.save(Partition::StateDiff, &self.hash, bytes).await
    }

    pub async fn load(tangle: &Tangle, hash: &Hash) -> StorageResult<Option<Self>> {
        match tangle.load(Partition::StateDiff, hash).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Approximate check: may report a diff that is not there.
    pub async fn exists(tangle: &Tangle, hash: &Hash) -> StorageResult<bool> {
        tangle.may_exist(Partition::StateDiff, hash).await
    }

    pub async fn delete(tangle: &Tangle, hash: &Hash) -> StorageResult<()> {
        tangle.delete(Partition::StateDiff, hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::storage::{MemoryProvider, PersistenceProvider};

    #[tokio::test]
    async fn store_load_and_delete() {
        let provider: Arc<dyn PersistenceProvider> = Arc::new(MemoryProvider::volatile());
        let tangle = Tangle::new(vec![provider]);
        let milestone = Hash::calculate(&[1, 0, 1]);
        let mut state = BTreeMap::new();
        state.insert(Hash::calculate(&[1]), 50);
        state.insert(Hash::calculate(&[-1]), -50);
        let diff = StateDiff::new(milestone, state);
        assert_eq!(diff.net_change(), 0);

        assert!(!StateDiff::exists(&tangle, &milestone).await.unwrap());
        diff.store(&tangle).await.unwrap();
        assert!(StateDiff::exists(&tangle, &milestone).await.unwrap());
        assert_eq!(StateDiff::load(&tangle, &milestone).await.unwrap(), Some(diff));

        StateDiff::delete(&tangle, &milestone).await.unwrap();
        assert!(StateDiff::load(&tangle, &milestone).await.unwrap().is_none());
    }
}
