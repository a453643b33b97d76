//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] assembles the 8019 trits of a transaction
//! field by field and hands back a [`TransactionRecord`] whose identity hash
//! is derived from the finished payload. Fields left unset are zero trits,
//! which means null references for trunk and branch.
//!
//! Nothing here does proof of work. The builder exists for tests, benches
//! and tooling that need well-formed payloads.

use crate::config::*;
use crate::crypto::Hash;
use crate::transaction::ternary::{long_to_trits, Trit};
use crate::transaction::types::TransactionRecord;

/// Fluent builder for transaction payloads.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    trits: Vec<Trit>,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    /// Start with an all-zero payload.
    pub fn new() -> Self {
        Self {
            trits: vec![0; TRANSACTION_TRIT_SIZE],
        }
    }

    /// Writes `hash` into a field. A hash that does not unpack leaves the
    /// field zeroed.
    fn put_hash(mut self, offset: usize, size: usize, hash: Hash) -> Self {
        let trits = hash.trits().unwrap_or_else(|_| vec![0; HASH_TRIT_SIZE]);
        self.trits[offset..offset + size].copy_from_slice(&trits[..size]);
        self
    }

    fn put_long(mut self, offset: usize, size: usize, value: i64) -> Self {
        long_to_trits(value, &mut self.trits[offset..offset + size]);
        self
    }

    /// Message or signature trits. Truncated to 6561 trits.
    pub fn signature_message_fragment(mut self, trits: &[Trit]) -> Self {
        let len = trits.len().min(SIGNATURE_MESSAGE_FRAGMENT_TRIT_SIZE);
        let start = SIGNATURE_MESSAGE_FRAGMENT_TRIT_OFFSET;
        self.trits[start..start + len].copy_from_slice(&trits[..len]);
        self
    }

    pub fn address(self, address: Hash) -> Self {
        self.put_hash(ADDRESS_TRIT_OFFSET, ADDRESS_TRIT_SIZE, address)
    }

    /// Value in base units. Written into the usable 33 trits only.
    pub fn value(self, value: i64) -> Self {
        self.put_long(VALUE_TRIT_OFFSET, VALUE_USABLE_TRIT_SIZE, value)
    }

    /// Uses the first 81 trits of `tag`.
    pub fn tag(self, tag: Hash) -> Self {
        self.put_hash(TAG_TRIT_OFFSET, TAG_TRIT_SIZE, tag)
    }

    pub fn timestamp(self, seconds: u64) -> Self {
        self.put_long(TIMESTAMP_TRIT_OFFSET, TIMESTAMP_TRIT_SIZE, seconds as i64)
    }

    pub fn current_index(self, index: u64) -> Self {
        self.put_long(CURRENT_INDEX_TRIT_OFFSET, CURRENT_INDEX_TRIT_SIZE, index as i64)
    }

    pub fn last_index(self, index: u64) -> Self {
        self.put_long(LAST_INDEX_TRIT_OFFSET, LAST_INDEX_TRIT_SIZE, index as i64)
    }

    pub fn bundle(self, bundle: Hash) -> Self {
        self.put_hash(BUNDLE_TRIT_OFFSET, BUNDLE_TRIT_SIZE, bundle)
    }

    pub fn trunk(self, trunk: Hash) -> Self {
        self.put_hash(TRUNK_TRIT_OFFSET, TRUNK_TRIT_SIZE, trunk)
    }

    pub fn branch(self, branch: Hash) -> Self {
        self.put_hash(BRANCH_TRIT_OFFSET, BRANCH_TRIT_SIZE, branch)
    }

    pub fn nonce(self, nonce: Hash) -> Self {
        self.put_hash(NONCE_TRIT_OFFSET, NONCE_TRIT_SIZE, nonce)
    }

    /// Raw access for tests that need to break the payload on purpose.
    pub fn set_trit(mut self, index: usize, trit: Trit) -> Self {
        if let Some(slot) = self.trits.get_mut(index) {
            *slot = trit;
        }
        self
    }

    /// Finish the payload and derive the identity hash.
    pub fn build(self) -> TransactionRecord {
        TransactionRecord::from_trits(&self.trits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_are_null() {
        let tx = TransactionBuilder::new().build();
        assert!(tx.trunk().is_null());
        assert!(tx.branch().is_null());
        assert_eq!(tx.value(), 0);
        assert_eq!(tx.bytes().len(), TRANSACTION_SIZE_BYTES);
    }

    #[test]
    fn fields_land_where_they_belong() {
        let address = Hash::calculate(&[1, -1, 1]);
        let bundle = Hash::calculate(&[0, 0, 1]);
        let tx = TransactionBuilder::new()
            .address(address)
            .bundle(bundle)
            .value(SUPPLY)
            .timestamp(99)
            .build();
        assert_eq!(tx.address(), address);
        assert_eq!(tx.bundle(), bundle);
        assert_eq!(tx.value(), SUPPLY);
        assert_eq!(tx.timestamp(), 99);
        assert!(tx.unused_value_trits_are_zero());
    }

    #[test]
    fn tag_keeps_only_its_first_trits() {
        let tag = Hash::calculate(&[1]);
        let tx = TransactionBuilder::new().tag(tag).build();
        assert_eq!(tx.tag().trits().unwrap()[..TAG_TRIT_SIZE], tag.trits().unwrap()[..TAG_TRIT_SIZE]);
        assert!(tx.tag().trits().unwrap()[TAG_TRIT_SIZE..].iter().all(|&t| t == 0));
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = TransactionBuilder::new().timestamp(1).build();
        let b = TransactionBuilder::new().timestamp(2).build();
        assert_ne!(a.hash(), b.hash());
    }
}
