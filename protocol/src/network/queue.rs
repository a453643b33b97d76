//! Weight-ordered, bounded work queues.
//!
//! The gossip engine keeps three of these: transactions to broadcast,
//! transactions received and waiting to be stored, and requests waiting for
//! a reply. All three hand out the heaviest item first, where "heavy" means
//! most proof of work (trailing zero trits of the hash).
//!
//! ## Ordering
//!
//! - Higher weight magnitude first.
//! - Equal weights: compare hash bytes as signed values from the last byte
//!   towards the first; the larger byte wins.
//! - Still equal (the same hash queued for two neighbors): order by the
//!   neighbor's address so both requests survive.
//!
//! The order is total, so dequeue order never depends on arrival order.
//! When a push takes a queue past its capacity, the lowest-priority item is
//! evicted, which may be the item just pushed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::crypto::Hash;
use crate::network::neighbor::Neighbor;
use crate::transaction::TransactionRecord;

// ---------------------------------------------------------------------------
// PriorityKey
// ---------------------------------------------------------------------------

/// Sort key for queue entries. Smallest key dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityKey {
    weight: u32,
    hash: Hash,
    origin: Option<SocketAddr>,
}

impl PriorityKey {
    pub fn new(weight: u32, hash: Hash, origin: Option<SocketAddr>) -> Self {
        Self {
            weight,
            hash,
            origin,
        }
    }
}

/// Descending comparison of signed hash bytes, last byte first.
fn compare_hash_tail_first(a: &Hash, b: &Hash) -> Ordering {
    for (x, y) in a.as_bytes().iter().rev().zip(b.as_bytes().iter().rev()) {
        match (*y as i8).cmp(&(*x as i8)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then_with(|| compare_hash_tail_first(&self.hash, &other.hash))
            .then_with(|| self.origin.cmp(&other.origin))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Anything a [`WeightQueue`] can hold.
pub trait Prioritized {
    fn priority(&self) -> PriorityKey;
}

// ---------------------------------------------------------------------------
// Queue items
// ---------------------------------------------------------------------------

impl Prioritized for Arc<TransactionRecord> {
    fn priority(&self) -> PriorityKey {
        PriorityKey::new(self.weight_magnitude(), self.hash(), None)
    }
}

/// A validated transaction and the neighbor it came from.
#[derive(Clone)]
pub struct ReceivedTransaction {
    pub record: Arc<TransactionRecord>,
    pub neighbor: Arc<Neighbor>,
}

impl Prioritized for ReceivedTransaction {
    fn priority(&self) -> PriorityKey {
        PriorityKey::new(
            self.record.weight_magnitude(),
            self.record.hash(),
            Some(self.neighbor.address()),
        )
    }
}

impl fmt::Debug for ReceivedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedTransaction")
            .field("hash", &self.record.hash())
            .field("neighbor", &self.neighbor.address())
            .finish()
    }
}

/// A hash some neighbor asked for. The null hash asks for a random tip.
#[derive(Clone)]
pub struct ReplyRequest {
    pub hash: Hash,
    pub neighbor: Arc<Neighbor>,
}

impl Prioritized for ReplyRequest {
    fn priority(&self) -> PriorityKey {
        PriorityKey::new(
            self.hash.trailing_zero_trits(),
            self.hash,
            Some(self.neighbor.address()),
        )
    }
}

impl fmt::Debug for ReplyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyRequest")
            .field("hash", &self.hash)
            .field("neighbor", &self.neighbor.address())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WeightQueue
// ---------------------------------------------------------------------------

/// Bounded priority queue. Pushing an item whose key is already queued
/// replaces the queued item.
pub struct WeightQueue<T> {
    entries: Mutex<BTreeMap<PriorityKey, T>>,
    capacity: usize,
}

impl<T: Prioritized> WeightQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Queues `item`. Returns whatever had to be evicted to stay in bounds.
    pub fn push(&self, item: T) -> Option<T> {
        let mut entries = self.entries.lock();
        entries.insert(item.priority(), item);
        if entries.len() > self.capacity {
            entries.pop_last().map(|(_, evicted)| evicted)
        } else {
            None
        }
    }

    /// Removes and returns the highest-priority item.
    pub fn pop(&self) -> Option<T> {
        self.entries.lock().pop_first().map(|(_, item)| item)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for WeightQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightQueue")
            .field("len", &self.entries.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
