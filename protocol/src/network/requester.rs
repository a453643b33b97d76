//! Outstanding transaction requests.
//!
//! When a stored transaction points at a trunk or branch the node has never
//! seen, that hash goes here. Every outbound packet then carries one of the
//! pending hashes as its piggybacked request, so missing history is pulled
//! in as a side effect of normal gossip.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::trace;

use crate::config::MAX_PENDING_REQUESTS;
use crate::crypto::Hash;

/// Source of hashes to piggyback on outbound packets.
pub trait TransactionRequester: Send + Sync {
    /// Next hash to ask a neighbor for, or `None` if nothing is pending.
    fn transaction_to_request(&self) -> Option<Hash>;

    /// Number of hashes currently outstanding.
    fn pending_count(&self) -> usize;

    /// Adds `hash` to the outstanding set. The null hash is ignored.
    fn request(&self, hash: Hash) -> bool;

    /// Drops `hash` once it has arrived.
    fn clear(&self, hash: &Hash) -> bool;
}

#[derive(Debug, Default)]
struct Pending {
    order: VecDeque<Hash>,
    members: HashSet<Hash>,
}

/// Bounded FIFO set of pending hashes. Handing out a hash rotates it to the
/// back, so repeated calls cycle through everything outstanding. When full,
/// the oldest request is dropped to make room.
#[derive(Debug)]
pub struct PendingRequests {
    pending: Mutex<Pending>,
    capacity: usize,
}

impl PendingRequests {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.pending.lock().members.contains(hash)
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(MAX_PENDING_REQUESTS)
    }
}

impl TransactionRequester for PendingRequests {
    fn transaction_to_request(&self) -> Option<Hash> {
        let mut pending = self.pending.lock();
        let hash = pending.order.pop_front()?;
        pending.order.push_back(hash);
        Some(hash)
    }

    fn pending_count(&self) -> usize {
        self.pending.lock().members.len()
    }

    fn request(&self, hash: Hash) -> bool {
        if hash.is_null() {
            return false;
        }
        let mut pending = self.pending.lock();
        if !pending.members.insert(hash) {
            return false;
        }
        pending.order.push_back(hash);
        if pending.order.len() > self.capacity {
            if let Some(oldest) = pending.order.pop_front() {
                pending.members.remove(&oldest);
                trace!(hash = %oldest, "request dropped, requester full");
            }
        }
        true
    }

    fn clear(&self, hash: &Hash) -> bool {
        let mut pending = self.pending.lock();
        if !pending.members.remove(hash) {
            return false;
        }
        pending.order.retain(|h| h != hash);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: i8) -> Hash {
        Hash::calculate(&[seed, 1, -1])
    }

    #[test]
    fn hands_out_hashes_round_robin() {
        let requester = PendingRequests::default();
        assert_eq!(requester.transaction_to_request(), None);

        requester.request(h(1));
        requester.request(h(0));
        assert!(!requester.request(h(1)));
        assert!(!requester.request(Hash::NULL));

        assert_eq!(requester.transaction_to_request(), Some(h(1)));
        assert_eq!(requester.transaction_to_request(), Some(h(0)));
        assert_eq!(requester.transaction_to_request(), Some(h(1)));
        assert_eq!(requester.pending_count(), 2);
    }

    #[test]
    fn clear_removes_from_rotation() {
        let requester = PendingRequests::default();
        requester.request(h(1));
        requester.request(h(0));
        assert!(requester.clear(&h(1)));
        assert!(!requester.clear(&h(1)));
        assert_eq!(requester.transaction_to_request(), Some(h(0)));
        assert_eq!(requester.transaction_to_request(), Some(h(0)));
    }

    #[test]
    fn full_requester_drops_the_oldest() {
        let requester = PendingRequests::new(2);
        requester.request(h(1));
        requester.request(h(0));
        requester.request(h(-1));
        assert_eq!(requester.pending_count(), 2);
        assert!(!requester.contains(&h(1)));
        assert!(requester.contains(&h(-1)));
    }
}
