//! # Tip Index
//!
//! Tips are transactions nothing approves yet, the frontier new
//! transactions attach to. The index keeps them in two sets, non-solid and
//! solid, behind one lock so a reader never sees a hash in both sets or in
//! neither while it is being moved.

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tracing::info;

use crate::crypto::Hash;
use crate::storage::{Partition, StorageResult, Tangle};

#[derive(Debug, Default)]
struct TipSets {
    non_solid: HashSet<Hash>,
    solid: HashSet<Hash>,
}

/// The current set of tips, split by solidity.
#[derive(Debug, Default)]
pub struct TipIndex {
    sets: Mutex<TipSets>,
}

impl TipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `hash` as a non-solid tip. Returns `false` if it already was one.
    pub fn add_tip(&self, hash: Hash) -> bool {
        self.sets.lock().non_solid.insert(hash)
    }

    /// Removes `hash` from whichever set holds it, non-solid first.
    pub fn remove_tip(&self, hash: &Hash) -> bool {
        let mut sets = self.sets.lock();
        sets.non_solid.remove(hash) || sets.solid.remove(hash)
    }

    /// Moves `hash` from the non-solid to the solid set. Does nothing unless
    /// `hash` is currently a non-solid tip.
    pub fn set_solid(&self, hash: &Hash) -> bool {
        let mut sets = self.sets.lock();
        if sets.non_solid.remove(hash) {
            sets.solid.insert(*hash);
            true
        } else {
            false
        }
    }

    pub fn is_tip(&self, hash: &Hash) -> bool {
        let sets = self.sets.lock();
        sets.non_solid.contains(hash) || sets.solid.contains(hash)
    }

    /// A uniformly random tip from either set.
    pub fn random_tip(&self) -> Option<Hash> {
        let sets = self.sets.lock();
        sets.non_solid
            .iter()
            .chain(sets.solid.iter())
            .choose(&mut rand::thread_rng())
            .copied()
    }

    /// A random solid tip, or a random non-solid one if none is solid.
    pub fn random_solid_tip(&self) -> Option<Hash> {
        let sets = self.sets.lock();
        let mut rng = rand::thread_rng();
        sets.solid
            .iter()
            .choose(&mut rng)
            .or_else(|| sets.non_solid.iter().choose(&mut rng))
            .copied()
    }

    pub fn random_non_solid_tip(&self) -> Option<Hash> {
        self.sets
            .lock()
            .non_solid
            .iter()
            .choose(&mut rand::thread_rng())
            .copied()
    }

    /// Every tip, non-solid first.
    pub fn tips(&self) -> Vec<Hash> {
        let sets = self.sets.lock();
        sets.non_solid.iter().chain(sets.solid.iter()).copied().collect()
    }

    pub fn size(&self) -> usize {
        let sets = self.sets.lock();
        sets.non_solid.len() + sets.solid.len()
    }

    pub fn non_solid_size(&self) -> usize {
        self.sets.lock().non_solid.len()
    }

    pub fn solid_size(&self) -> usize {
        self.sets.lock().solid.len()
    }

    /// Seeds the non-solid set with every stored transaction nothing
    /// approves. Run once at startup.
    pub async fn load_tip_hashes(&self, tangle: &Tangle) -> StorageResult<usize> {
        let keys = tangle
            .keys_with_missing_references(Partition::Transaction)
            .await?;
        let loaded = {
            let mut sets = self.sets.lock();
            let before = sets.non_solid.len();
            sets.non_solid
                .extend(keys.iter().map(|k| Hash::from_slice(k)));
            sets.non_solid.len() - before
        };
        info!(tips = loaded, "loaded tips from storage");
        Ok(loaded)
    }
}
