//! Duplicate suppression for inbound gossip.
//!
//! Two bounded LRU caches, each behind its own lock:
//!
//! - **seen packets**: SHA-256 digest of a payload to the transaction hash
//!   it decoded to. A hit skips validation entirely.
//! - **seen hashes**: transaction hashes recently handed to storage. A hit
//!   skips the store attempt.
//!
//! The packet cache keeps hit/miss counters and logs the hit ratio every
//! [`CACHE_STATS_INTERVAL`] lookups, then starts counting again.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::info;

use crate::config::{CACHE_STATS_INTERVAL, SEEN_HASHES_CACHE_SIZE, SEEN_PACKETS_CACHE_SIZE};
use crate::crypto::Hash;

/// SHA-256 digest of a transaction payload.
pub type PacketDigest = [u8; 32];

pub struct DedupCache {
    seen_hashes: Mutex<LruCache<Hash, ()>>,
    seen_packets: Mutex<LruCache<PacketDigest, Hash>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DedupCache {
    pub fn new(hash_capacity: usize, packet_capacity: usize) -> Self {
        Self {
            seen_hashes: Mutex::new(LruCache::new(non_zero(hash_capacity))),
            seen_packets: Mutex::new(LruCache::new(non_zero(packet_capacity))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // -- Packets ------------------------------------------------------------

    /// Looks up a payload digest, counting the hit or miss.
    pub fn lookup_packet(&self, digest: &PacketDigest) -> Option<Hash> {
        let found = self.seen_packets.lock().get(digest).copied();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.maybe_log_ratio();
        found
    }

    pub fn insert_packet(&self, digest: PacketDigest, hash: Hash) {
        self.seen_packets.lock().put(digest, hash);
    }

    fn maybe_log_ratio(&self) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total < CACHE_STATS_INTERVAL {
            return;
        }
        // Concurrent lookups may lose a count here. The ratio is advisory.
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!(
            hits,
            misses,
            ratio = hits as f64 / total as f64,
            "seen-packet cache hit ratio"
        );
    }

    /// Current `(hits, misses)` since the last ratio log.
    pub fn packet_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    // -- Hashes -------------------------------------------------------------

    /// Records `hash` as seen. Returns `true` if it already was.
    pub fn check_and_insert_hash(&self, hash: Hash) -> bool {
        self.seen_hashes.lock().put(hash, ()).is_some()
    }

    pub fn contains_hash(&self, hash: &Hash) -> bool {
        self.seen_hashes.lock().contains(hash)
    }

    #[cfg(test)]
    pub fn len(&self) -> (usize, usize) {
        (self.seen_hashes.lock().len(), self.seen_packets.lock().len())
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(SEEN_HASHES_CACHE_SIZE, SEEN_PACKETS_CACHE_SIZE)
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_array;

    #[test]
    fn hash_cache_reports_repeats() {
        let cache = DedupCache::default();
        let hash = Hash::calculate(&[1, 1, 0]);
        assert!(!cache.check_and_insert_hash(hash));
        assert!(cache.check_and_insert_hash(hash));
        assert!(cache.contains_hash(&hash));
        assert!(!cache.contains_hash(&Hash::NULL));
    }

    #[test]
    fn packet_cache_counts_hits_and_misses() {
        let cache = DedupCache::default();
        let digest = sha256_array(b"payload");
        let hash = Hash::calculate(&[0, 1]);

        assert_eq!(cache.lookup_packet(&digest), None);
        cache.insert_packet(digest, hash);
        assert_eq!(cache.lookup_packet(&digest), Some(hash));
        assert_eq!(cache.packet_stats(), (1, 1));
    }

    #[test]
    fn capacity_bounds_and_evicts_least_recent() {
        let cache = DedupCache::new(2, 2);
        let a = Hash::calculate(&[1]);
        let b = Hash::calculate(&[-1]);
        let c = Hash::calculate(&[0, 1]);
        cache.check_and_insert_hash(a);
        cache.check_and_insert_hash(b);
        cache.check_and_insert_hash(c);
        assert!(!cache.contains_hash(&a));
        assert!(cache.contains_hash(&c));
        assert_eq!(cache.len().0, 2);
    }

    #[test]
    fn ratio_counters_reset_after_interval() {
        let cache = DedupCache::new(1, 1);
        let digest = sha256_array(b"x");
        for _ in 0..CACHE_STATS_INTERVAL {
            cache.lookup_packet(&digest);
        }
        assert_eq!(cache.packet_stats(), (0, 0));
    }
}
