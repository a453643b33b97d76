//! # Persistence Provider Contract
//!
//! Every storage backend the node can run on implements
//! [`PersistenceProvider`]. The contract is deliberately byte-oriented:
//! records are opaque values addressed by `(partition, key)`, and keys are
//! compared as raw bytes. That keeps providers ignorant of the transaction
//! model, and lets the facade stack any number of them.
//!
//! ## Keys
//!
//! Keys come from [`Indexable`] types. Their byte encoding must sort the
//! same way the values themselves sort, which is why [`IntegerIndex`] is
//! big-endian. Ordered navigation (`first`, `latest`, `next`, `previous`)
//! only makes sense for partitions with such keys, in practice the
//! milestone partition.
//!
//! ## Reference indices
//!
//! Approver, address, bundle and tag indices use composite keys:
//! `referenced hash || transaction hash`, with an empty value. "Which
//! transactions approve X" is then a prefix scan, and no provider needs a
//! merge operator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::HASH_SIZE_BYTES;
use crate::crypto::Hash;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors raised by persistence providers and the storage facade.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("provider {0} is not available")]
    Unavailable(String),

    #[error("no persistence provider configured")]
    NoProviders,

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Partitions
// ---------------------------------------------------------------------------

/// Logical record families. Every provider keeps them apart (separate maps,
/// trees or column families).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Partition {
    /// Packed transaction payloads, keyed by transaction hash.
    Transaction,
    /// One entry per mutable metadata field, keyed by `hash || field tag`.
    TransactionMetadata,
    /// `trunk-or-branch hash || approver hash`.
    Approvers,
    /// `address hash || transaction hash`.
    Address,
    /// `bundle hash || transaction hash`.
    Bundle,
    /// `tag value || transaction hash`.
    Tag,
    /// Milestone records keyed by [`IntegerIndex`].
    Milestone,
    /// Ledger state diffs keyed by milestone hash.
    StateDiff,
}

impl Partition {
    /// Every partition, in a stable order.
    pub const ALL: [Partition; 8] = [
        Partition::Transaction,
        Partition::TransactionMetadata,
        Partition::Approvers,
        Partition::Address,
        Partition::Bundle,
        Partition::Tag,
        Partition::Milestone,
        Partition::StateDiff,
    ];

    /// Stable name, used for sled tree names and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::TransactionMetadata => "transaction-metadata",
            Self::Approvers => "approvers",
            Self::Address => "address",
            Self::Bundle => "bundle",
            Self::Tag => "tag",
            Self::Milestone => "milestone",
            Self::StateDiff => "state-diff",
        }
    }

    /// The index whose keys reference this partition's keys, if any.
    /// A transaction is referenced once something approves it.
    pub fn reference_partition(&self) -> Option<Partition> {
        match self {
            Self::Transaction => Some(Self::Approvers),
            _ => None,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Indexable keys
// ---------------------------------------------------------------------------

/// An opaque, ordered storage key.
///
/// `bytes()` must be order-preserving: `a < b` iff `a.bytes() < b.bytes()`.
pub trait Indexable: Clone + Ord + Send + Sync + 'static {
    /// Byte encoding used as the provider key.
    fn bytes(&self) -> Vec<u8>;

    /// The next key in order (saturating at the maximum).
    fn incremented(&self) -> Self;

    /// The previous key in order (saturating at the minimum).
    fn decremented(&self) -> Self;
}

/// Integer key for totally ordered partitions (milestones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntegerIndex(pub u32);

impl IntegerIndex {
    /// Decodes a big-endian key. Returns `None` for keys of the wrong width.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 4] = bytes.try_into().ok()?;
        Some(Self(u32::from_be_bytes(array)))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Indexable for IntegerIndex {
    fn bytes(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn incremented(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    fn decremented(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl Indexable for Hash {
    fn bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn incremented(&self) -> Self {
        let mut bytes = *self.as_bytes();
        for b in bytes.iter_mut().rev() {
            let (next, overflow) = b.overflowing_add(1);
            *b = next;
            if !overflow {
                return Hash::new(bytes);
            }
        }
        *self
    }

    fn decremented(&self) -> Self {
        let mut bytes = *self.as_bytes();
        for b in bytes.iter_mut().rev() {
            let (next, underflow) = b.overflowing_sub(1);
            *b = next;
            if !underflow {
                return Hash::new(bytes);
            }
        }
        *self
    }
}

/// Builds the composite key of a reference-index entry.
pub fn reference_key(referenced: &Hash, referrer: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(HASH_SIZE_BYTES * 2);
    key.extend_from_slice(referenced.as_bytes());
    key.extend_from_slice(referrer.as_bytes());
    key
}

/// Extracts the referrer half of a composite reference key.
pub fn referrer_from_key(key: &[u8]) -> Option<Hash> {
    (key.len() == HASH_SIZE_BYTES * 2).then(|| Hash::from_slice(&key[HASH_SIZE_BYTES..]))
}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// A group of writes that a provider applies together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<(Partition, Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write of `value` under `(partition, key)`.
    pub fn put(&mut self, partition: Partition, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.entries.push((partition, key, value));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Partition, Vec<u8>, Vec<u8>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A `(key, value)` pair returned by ordered navigation.
pub type Entry = (Vec<u8>, Vec<u8>);

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// The uniform operation set every storage backend exposes.
///
/// All methods are blocking. The facade is responsible for moving them off
/// the async executor. Implementations must be safe to call from several
/// threads at once, and must keep ordered navigation consistent while
/// writers are active.
pub trait PersistenceProvider: Send + Sync {
    /// Human-readable provider name for logs.
    fn name(&self) -> &str;

    /// Opens or restores the backing store. Called once before any other
    /// operation.
    fn init(&self) -> StorageResult<()>;

    /// `true` between a successful `init` and `shutdown`.
    fn is_available(&self) -> bool;

    /// Flushes and releases the backing store.
    fn shutdown(&self) -> StorageResult<()>;

    fn get(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Writes one record. Returns `true` once the write is accepted.
    fn save(&self, partition: Partition, key: &[u8], value: &[u8]) -> StorageResult<bool>;

    /// Writes every entry of `batch`. Returns `true` once accepted.
    fn save_batch(&self, batch: &WriteBatch) -> StorageResult<bool>;

    fn delete(&self, partition: Partition, key: &[u8]) -> StorageResult<()>;

    fn exists(&self, partition: Partition, key: &[u8]) -> StorageResult<bool>;

    /// Cheap approximate existence check. May return false positives,
    /// never false negatives.
    fn may_exist(&self, partition: Partition, key: &[u8]) -> StorageResult<bool>;

    fn count(&self, partition: Partition) -> StorageResult<u64>;

    /// Entry with the smallest key.
    fn first(&self, partition: Partition) -> StorageResult<Option<Entry>>;

    /// Entry with the largest key.
    fn latest(&self, partition: Partition) -> StorageResult<Option<Entry>>;

    /// Entry with the smallest key strictly greater than `key`.
    fn next(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Entry>>;

    /// Entry with the largest key strictly smaller than `key`.
    fn previous(&self, partition: Partition, key: &[u8]) -> StorageResult<Option<Entry>>;

    /// All keys of `partition` that begin with `prefix`, in key order.
    fn keys_starting_with(&self, partition: Partition, prefix: &[u8])
        -> StorageResult<Vec<Vec<u8>>>;

    /// Keys of `partition` that no entry of its reference partition points
    /// at. Partitions without a reference index yield nothing.
    fn keys_with_missing_references(&self, partition: Partition) -> StorageResult<Vec<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_index_bytes_sort_numerically() {
        let small = IntegerIndex(2).bytes();
        let large = IntegerIndex(300).bytes();
        assert!(small < large);
        assert_eq!(IntegerIndex::from_bytes(&large), Some(IntegerIndex(300)));
        assert_eq!(IntegerIndex::from_bytes(&[1, 2]), None);
    }

    #[test]
    fn integer_index_steps_saturate() {
        assert_eq!(IntegerIndex(0).decremented(), IntegerIndex(0));
        assert_eq!(IntegerIndex(u32::MAX).incremented(), IntegerIndex(u32::MAX));
        assert_eq!(IntegerIndex(7).incremented(), IntegerIndex(8));
    }

    #[test]
    fn hash_increment_carries() {
        let mut bytes = [0u8; HASH_SIZE_BYTES];
        bytes[HASH_SIZE_BYTES - 1] = 0xFF;
        let h = Hash::new(bytes);
        let next = h.incremented();
        assert_eq!(next.as_bytes()[HASH_SIZE_BYTES - 1], 0);
        assert_eq!(next.as_bytes()[HASH_SIZE_BYTES - 2], 1);
        assert_eq!(next.decremented(), h);
        assert!(next > h);
    }

    #[test]
    fn reference_keys_split_back() {
        let a = Hash::calculate(&[1]);
        let b = Hash::calculate(&[-1]);
        let key = reference_key(&a, &b);
        assert!(key.starts_with(a.as_bytes()));
        assert_eq!(referrer_from_key(&key), Some(b));
        assert_eq!(referrer_from_key(a.as_bytes()), None);
    }

    #[test]
    fn only_transactions_have_a_reference_index() {
        assert_eq!(
            Partition::Transaction.reference_partition(),
            Some(Partition::Approvers)
        );
        assert_eq!(Partition::Milestone.reference_partition(), None);
    }
}
