//! Core type definitions for tangle transactions.
//!
//! A [`TransactionRecord`] is one transaction: the immutable 1604-byte
//! packed payload, the identity hash derived from it, a handful of lazily
//! decoded fields, and the mutable metadata the node learns over time
//! (solidity, confirmation, height, arrival time, sender).
//!
//! Records are shared as `Arc<TransactionRecord>` between the gossip
//! workers, so metadata sits behind an internal lock and every setter takes
//! `&self`. Setters persist only the field that changed and update memory
//! once the write succeeds: each metadata field is its own storage entry, keyed by
//! `hash || field tag`, so concurrent setters of different fields never
//! overwrite one another.

use std::fmt;
use std::sync::OnceLock;

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::crypto::Hash;
use crate::storage::{
    reference_key, referrer_from_key, Partition, StorageResult, Tangle, WriteBatch,
};
use crate::transaction::ternary::{
    bytes_to_trits, trits_to_bytes, trits_to_long, TernaryError, Trit,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Raised when bytes cannot be decoded as a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("invalid payload length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error(transparent)]
    Ternary(#[from] TernaryError),
}

// ---------------------------------------------------------------------------
// TransactionType
// ---------------------------------------------------------------------------

/// How much the node knows about a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Referenced by something, but the payload has not arrived yet.
    Prefilled,
    /// Payload known.
    Filled,
    /// The null hash. Nothing will ever arrive for it.
    Nonexistent,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefilled => write!(f, "Prefilled"),
            Self::Filled => write!(f, "Filled"),
            Self::Nonexistent => write!(f, "Nonexistent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Mutable facts about a transaction. Not part of the hashed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub tx_type: TransactionType,
    pub solid: bool,
    pub confirmed: bool,
    pub height: u64,
    /// Unix milliseconds at which the payload first arrived.
    pub arrival_time: i64,
    /// Neighbor address the payload first arrived from.
    pub sender: String,
    pub validity: i32,
}

impl TransactionMetadata {
    fn for_type(tx_type: TransactionType) -> Self {
        Self {
            tx_type,
            solid: false,
            confirmed: false,
            height: 0,
            arrival_time: 0,
            sender: String::new(),
            validity: 0,
        }
    }
}

/// Storage tag appended to the hash to form a metadata field key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MetadataField {
    Solid = 1,
    Confirmed = 2,
    Height = 3,
    ArrivalTime = 4,
    Sender = 5,
    Validity = 6,
}

impl MetadataField {
    fn key(self, hash: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(HASH_SIZE_BYTES + 1);
        key.extend_from_slice(hash.as_bytes());
        key.push(self as u8);
        key
    }
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// One transaction on the tangle.
pub struct TransactionRecord {
    hash: Hash,
    bytes: Vec<u8>,
    trits: OnceLock<Vec<Trit>>,
    address: OnceLock<Hash>,
    bundle: OnceLock<Hash>,
    trunk: OnceLock<Hash>,
    branch: OnceLock<Hash>,
    tag: OnceLock<Hash>,
    weight_magnitude: OnceLock<u32>,
    metadata: RwLock<TransactionMetadata>,
}

impl TransactionRecord {
    fn assemble(hash: Hash, bytes: Vec<u8>, trits: Option<Vec<Trit>>, tx_type: TransactionType) -> Self {
        let cell = OnceLock::new();
        if let Some(trits) = trits {
            let _ = cell.set(trits);
        }
        Self {
            hash,
            bytes,
            trits: cell,
            address: OnceLock::new(),
            bundle: OnceLock::new(),
            trunk: OnceLock::new(),
            branch: OnceLock::new(),
            tag: OnceLock::new(),
            weight_magnitude: OnceLock::new(),
            metadata: RwLock::new(TransactionMetadata::for_type(tx_type)),
        }
    }

    /// Decodes a packed payload and derives its identity hash.
    ///
    /// Fails if the payload is not exactly 1604 bytes or holds a byte that
    /// is not a packed trit group.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() != TRANSACTION_SIZE_BYTES {
            return Err(FormatError::InvalidLength {
                expected: TRANSACTION_SIZE_BYTES,
                got: bytes.len(),
            });
        }
        let mut trits = vec![0; TRANSACTION_TRIT_SIZE];
        bytes_to_trits(bytes, &mut trits)?;
        let hash = Hash::calculate(&trits);
        Ok(Self::assemble(hash, bytes.to_vec(), Some(trits), TransactionType::Filled))
    }

    /// Builds a record from 8019 trits (shorter input is zero-extended).
    pub fn from_trits(trits: &[Trit]) -> Self {
        let mut full = vec![0; TRANSACTION_TRIT_SIZE];
        let len = trits.len().min(TRANSACTION_TRIT_SIZE);
        full[..len].copy_from_slice(&trits[..len]);
        let hash = Hash::calculate(&full);
        let bytes = trits_to_bytes(&full);
        Self::assemble(hash, bytes, Some(full), TransactionType::Filled)
    }

    /// A placeholder for a hash whose payload is unknown. The payload is
    /// all zeros, so every reference field reads as the null hash.
    pub fn prefilled(hash: Hash) -> Self {
        let tx_type = if hash.is_null() {
            TransactionType::Nonexistent
        } else {
            TransactionType::Prefilled
        };
        Self::assemble(hash, vec![0; TRANSACTION_SIZE_BYTES], None, tx_type)
    }

    /// Re-creates a stored record without rehashing.
    fn from_stored(hash: Hash, bytes: Vec<u8>) -> Result<Self, FormatError> {
        if bytes.len() != TRANSACTION_SIZE_BYTES {
            return Err(FormatError::InvalidLength {
                expected: TRANSACTION_SIZE_BYTES,
                got: bytes.len(),
            });
        }
        let mut trits = vec![0; TRANSACTION_TRIT_SIZE];
        bytes_to_trits(&bytes, &mut trits)?;
        Ok(Self::assemble(hash, bytes, Some(trits), TransactionType::Filled))
    }

    // -- Payload ------------------------------------------------------------

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The packed 1604-byte payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload's 8019 trits, unpacked on first use.
    pub fn trits(&self) -> &[Trit] {
        self.trits.get_or_init(|| {
            let mut trits = vec![0; TRANSACTION_TRIT_SIZE];
            // Payloads are validated when the record is created.
            let _ = bytes_to_trits(&self.bytes, &mut trits);
            trits
        })
    }

    /// The hash-sized field at `offset`, packed.
    pub fn field_hash(&self, offset: usize, size: usize) -> Hash {
        Hash::from_trits(&self.trits()[offset..offset + size])
    }

    fn field_long(&self, offset: usize, size: usize) -> i64 {
        trits_to_long(&self.trits()[offset..offset + size])
    }

    pub fn address(&self) -> Hash {
        *self
            .address
            .get_or_init(|| self.field_hash(ADDRESS_TRIT_OFFSET, ADDRESS_TRIT_SIZE))
    }

    pub fn bundle(&self) -> Hash {
        *self
            .bundle
            .get_or_init(|| self.field_hash(BUNDLE_TRIT_OFFSET, BUNDLE_TRIT_SIZE))
    }

    pub fn trunk(&self) -> Hash {
        *self
            .trunk
            .get_or_init(|| self.field_hash(TRUNK_TRIT_OFFSET, TRUNK_TRIT_SIZE))
    }

    pub fn branch(&self) -> Hash {
        *self
            .branch
            .get_or_init(|| self.field_hash(BRANCH_TRIT_OFFSET, BRANCH_TRIT_SIZE))
    }

    /// The 81-trit tag, packed into a zero-padded hash.
    pub fn tag(&self) -> Hash {
        *self
            .tag
            .get_or_init(|| self.field_hash(TAG_TRIT_OFFSET, TAG_TRIT_SIZE))
    }

    pub fn nonce(&self) -> Hash {
        self.field_hash(NONCE_TRIT_OFFSET, NONCE_TRIT_SIZE)
    }

    /// Value in base units. Only the low 33 trits carry the amount.
    pub fn value(&self) -> i64 {
        self.field_long(VALUE_TRIT_OFFSET, VALUE_USABLE_TRIT_SIZE)
    }

    /// `true` if the value trits above the usable range are all zero.
    pub fn unused_value_trits_are_zero(&self) -> bool {
        let start = VALUE_TRIT_OFFSET + VALUE_USABLE_TRIT_SIZE;
        let end = VALUE_TRIT_OFFSET + VALUE_TRIT_SIZE;
        self.trits()[start..end].iter().all(|&t| t == 0)
    }

    pub fn timestamp(&self) -> i64 {
        self.field_long(TIMESTAMP_TRIT_OFFSET, TIMESTAMP_TRIT_SIZE)
    }

    pub fn current_index(&self) -> i64 {
        self.field_long(CURRENT_INDEX_TRIT_OFFSET, CURRENT_INDEX_TRIT_SIZE)
    }

    pub fn last_index(&self) -> i64 {
        self.field_long(LAST_INDEX_TRIT_OFFSET, LAST_INDEX_TRIT_SIZE)
    }

    /// Trailing zero trits of the identity hash.
    pub fn weight_magnitude(&self) -> u32 {
        *self
            .weight_magnitude
            .get_or_init(|| self.hash.trailing_zero_trits())
    }

    // -- Metadata -----------------------------------------------------------

    /// A consistent copy of all metadata fields.
    pub fn metadata(&self) -> TransactionMetadata {
        self.metadata.read().clone()
    }

    pub fn tx_type(&self) -> TransactionType {
        self.metadata.read().tx_type
    }

    pub fn is_solid(&self) -> bool {
        self.metadata.read().solid
    }

    pub fn is_confirmed(&self) -> bool {
        self.metadata.read().confirmed
    }

    pub fn height(&self) -> u64 {
        self.metadata.read().height
    }

    pub fn arrival_time(&self) -> i64 {
        self.metadata.read().arrival_time
    }

    pub fn sender(&self) -> String {
        self.metadata.read().sender.clone()
    }

    pub fn validity(&self) -> i32 {
        self.metadata.read().validity
    }

    /// Marks the transaction solid. Returns `true` if it was not already.
    pub async fn mark_solid(&self, tangle: &Tangle) -> StorageResult<bool> {
        self.update_field(tangle, MetadataField::Solid, true, |m| &mut m.solid)
            .await
    }

    pub async fn mark_confirmed(&self, tangle: &Tangle, confirmed: bool) -> StorageResult<bool> {
        self.update_field(tangle, MetadataField::Confirmed, confirmed, |m| &mut m.confirmed)
            .await
    }

    pub async fn set_height(&self, tangle: &Tangle, height: u64) -> StorageResult<bool> {
        self.update_field(tangle, MetadataField::Height, height, |m| &mut m.height)
            .await
    }

    pub async fn set_arrival_time(&self, tangle: &Tangle, millis: i64) -> StorageResult<bool> {
        self.update_field(tangle, MetadataField::ArrivalTime, millis, |m| &mut m.arrival_time)
            .await
    }

    pub async fn set_sender(&self, tangle: &Tangle, sender: &str) -> StorageResult<bool> {
        self.update_field(tangle, MetadataField::Sender, sender.to_string(), |m| &mut m.sender)
            .await
    }

    pub async fn set_validity(&self, tangle: &Tangle, validity: i32) -> StorageResult<bool> {
        self.update_field(tangle, MetadataField::Validity, validity, |m| &mut m.validity)
            .await
    }

    /// Sets one metadata field and persists it, unless it already holds
    /// `value`. Returns whether anything changed.
    async fn update_field<T>(
        &self,
        tangle: &Tangle,
        field: MetadataField,
        value: T,
        slot: fn(&mut TransactionMetadata) -> &mut T,
    ) -> StorageResult<bool>
    where
        T: PartialEq + Serialize + Send,
    {
        let unchanged = {
            let mut meta = self.metadata.write();
            *slot(&mut meta) == value
        };
        if unchanged {
            return Ok(false);
        }
        let bytes = bincode::serialize(&value)?;
        tangle
            .save_raw(Partition::TransactionMetadata, field.key(&self.hash), bytes)
            .await?;
        let mut meta = self.metadata.write();
        *slot(&mut meta) = value;
        Ok(true)
    }

    // -- Persistence --------------------------------------------------------

    /// Stores the payload and its reference-index entries in one batch.
    ///
    /// Returns `false` without writing if the transaction is already stored.
    pub async fn store(&self, tangle: &Tangle) -> StorageResult<bool> {
        if tangle.exists(Partition::Transaction, &self.hash).await? {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch
            .put(Partition::Transaction, self.hash.as_bytes().to_vec(), self.bytes.clone())
            .put(Partition::Approvers, reference_key(&self.trunk(), &self.hash), Vec::new())
            .put(Partition::Approvers, reference_key(&self.branch(), &self.hash), Vec::new())
            .put(Partition::Address, reference_key(&self.address(), &self.hash), Vec::new())
            .put(Partition::Bundle, reference_key(&self.bundle(), &self.hash), Vec::new())
            .put(Partition::Tag, reference_key(&self.tag(), &self.hash), Vec::new());
        tangle.save_batch(batch).await
    }

    /// Loads a record with all its metadata. Unknown hashes come back as
    /// prefilled placeholders, never as errors.
    pub async fn load(tangle: &Tangle, hash: Hash) -> StorageResult<Self> {
        if hash.is_null() {
            return Ok(Self::prefilled(hash));
        }
        let Some(bytes) = tangle.load(Partition::Transaction, &hash).await? else {
            return Ok(Self::prefilled(hash));
        };
        let record = Self::from_stored(hash, bytes)
            .map_err(|e| crate::storage::StorageError::Serialization(e.to_string()))?;

        let fields = [
            MetadataField::Solid,
            MetadataField::Confirmed,
            MetadataField::Height,
            MetadataField::ArrivalTime,
            MetadataField::Sender,
            MetadataField::Validity,
        ];
        let values = try_join_all(
            fields
                .iter()
                .map(|f| tangle.load_raw(Partition::TransactionMetadata, f.key(&hash))),
        )
        .await?;

        {
            let mut meta = record.metadata.write();
            meta.solid = decode_field(&values[0])?.unwrap_or(false);
            meta.confirmed = decode_field(&values[1])?.unwrap_or(false);
            meta.height = decode_field(&values[2])?.unwrap_or(0);
            meta.arrival_time = decode_field(&values[3])?.unwrap_or(0);
            meta.sender = decode_field(&values[4])?.unwrap_or_default();
            meta.validity = decode_field(&values[5])?.unwrap_or(0);
        }
        Ok(record)
    }

    /// `true` if the payload for `hash` is stored.
    pub async fn exists(tangle: &Tangle, hash: &Hash) -> StorageResult<bool> {
        tangle.exists(Partition::Transaction, hash).await
    }

    /// Number of stored transactions.
    pub async fn count(tangle: &Tangle) -> StorageResult<u64> {
        tangle.count(Partition::Transaction).await
    }

    /// Hashes of the transactions that reference this one as trunk or branch.
    pub async fn approvers(&self, tangle: &Tangle) -> StorageResult<Vec<Hash>> {
        referrers(tangle, Partition::Approvers, &self.hash).await
    }

    /// Hashes of the transactions sent to or from `address`.
    pub async fn hashes_for_address(tangle: &Tangle, address: &Hash) -> StorageResult<Vec<Hash>> {
        referrers(tangle, Partition::Address, address).await
    }

    /// Hashes of the transactions in `bundle`.
    pub async fn hashes_for_bundle(tangle: &Tangle, bundle: &Hash) -> StorageResult<Vec<Hash>> {
        referrers(tangle, Partition::Bundle, bundle).await
    }

    /// Hashes of the transactions carrying `tag` (as returned by [`Self::tag`]).
    pub async fn hashes_for_tag(tangle: &Tangle, tag: &Hash) -> StorageResult<Vec<Hash>> {
        referrers(tangle, Partition::Tag, tag).await
    }

    /// Fills in heights along the trunk chain.
    ///
    /// Walks trunk references down until it reaches the null hash, a
    /// transaction with a known height, or a payload that has not arrived.
    /// It then unwinds, giving each transaction `1 + trunk height`. A chain
    /// that ends in a missing payload stays at height 0. Iterative, so
    /// arbitrarily long chains are fine.
    pub async fn update_heights(&self, tangle: &Tangle) -> StorageResult<()> {
        let mut pending = vec![self.hash];
        let mut trunk = Self::load(tangle, self.trunk()).await?;
        while trunk.height() == 0
            && trunk.tx_type() == TransactionType::Filled
            && !trunk.hash().is_null()
        {
            pending.push(trunk.hash());
            trunk = Self::load(tangle, trunk.trunk()).await?;
        }

        while let Some(hash) = pending.pop() {
            let tx = if hash == self.hash {
                None
            } else {
                Some(Self::load(tangle, hash).await?)
            };
            let current = tx.as_ref().unwrap_or(self);

            let height = if trunk.hash().is_null() && trunk.height() == 0 && !hash.is_null() {
                1
            } else if trunk.tx_type() == TransactionType::Filled
                && trunk.height() > 0
                && current.height() == 0
            {
                1 + trunk.height()
            } else {
                break;
            };
            current.set_height(tangle, height).await?;

            match tx {
                Some(tx) => trunk = tx,
                None => break,
            }
        }
        Ok(())
    }
}

/// Referrer hashes stored under `referenced` in a reference index.
pub async fn referrers(
    tangle: &Tangle,
    partition: Partition,
    referenced: &Hash,
) -> StorageResult<Vec<Hash>> {
    let keys = tangle
        .keys_starting_with(partition, referenced.as_bytes().to_vec())
        .await?;
    Ok(keys.iter().filter_map(|k| referrer_from_key(k)).collect())
}

fn decode_field<T: DeserializeOwned>(raw: &Option<Vec<u8>>) -> StorageResult<Option<T>> {
    raw.as_deref()
        .map(bincode::deserialize)
        .transpose()
        .map_err(Into::into)
}

impl Clone for TransactionRecord {
    fn clone(&self) -> Self {
        let clone = Self::assemble(self.hash, self.bytes.clone(), None, self.tx_type());
        *clone.metadata.write() = self.metadata();
        clone
    }
}

impl PartialEq for TransactionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes && self.metadata() == other.metadata()
    }
}

impl Eq for TransactionRecord {}

impl fmt::Debug for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRecord")
            .field("hash", &self.hash)
            .field("metadata", &*self.metadata.read())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryProvider, PersistenceProvider, StorageError};
    use crate::transaction::builder::TransactionBuilder;
    use std::sync::Arc;

    // -- Helpers ------------------------------------------------------------

    fn tangle() -> Tangle {
        let provider: Arc<dyn PersistenceProvider> = Arc::new(MemoryProvider::volatile());
        Tangle::new(vec![provider])
    }

    fn tx(seed: u64, trunk: Hash) -> TransactionRecord {
        TransactionBuilder::new()
            .timestamp(seed)
            .trunk(trunk)
            .branch(trunk)
            .build()
    }

    // -- Decoding -----------------------------------------------------------

    #[test]
    fn decode_rejects_wrong_length() {
        let err = TransactionRecord::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            FormatError::InvalidLength {
                expected: TRANSACTION_SIZE_BYTES,
                got: 10
            }
        );
    }

    #[test]
    fn decode_rejects_non_trit_bytes() {
        let mut bytes = vec![0u8; TRANSACTION_SIZE_BYTES];
        bytes[100] = 127;
        assert!(matches!(
            TransactionRecord::decode(&bytes),
            Err(FormatError::Ternary(_))
        ));
    }

    #[test]
    fn decode_of_encoded_payload_is_identical() {
        let original = TransactionBuilder::new()
            .value(-42)
            .timestamp(1_700_000_000)
            .current_index(1)
            .last_index(3)
            .trunk(Hash::calculate(&[1, 1]))
            .branch(Hash::calculate(&[0, 1]))
            .build();
        let decoded = TransactionRecord::decode(original.bytes()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.value(), -42);
        assert_eq!(decoded.timestamp(), 1_700_000_000);
        assert_eq!(decoded.current_index(), 1);
        assert_eq!(decoded.last_index(), 3);
        assert_eq!(decoded.trunk(), Hash::calculate(&[1, 1]));
        assert_eq!(decoded.branch(), Hash::calculate(&[0, 1]));
    }

    #[test]
    fn prefilled_records_have_null_references() {
        let record = TransactionRecord::prefilled(Hash::calculate(&[1]));
        assert_eq!(record.tx_type(), TransactionType::Prefilled);
        assert!(record.trunk().is_null());
        assert_eq!(
            TransactionRecord::prefilled(Hash::NULL).tx_type(),
            TransactionType::Nonexistent
        );
    }

    // -- Persistence --------------------------------------------------------

    #[tokio::test]
    async fn store_is_idempotent_and_indexes_approvers() {
        let tangle = tangle();
        let parent = tx(1, Hash::NULL);
        let child = tx(2, parent.hash());

        assert!(parent.store(&tangle).await.unwrap());
        assert!(!parent.store(&tangle).await.unwrap());
        assert!(child.store(&tangle).await.unwrap());

        assert_eq!(parent.approvers(&tangle).await.unwrap(), vec![child.hash()]);
        assert_eq!(TransactionRecord::count(&tangle).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn address_and_bundle_indices_find_the_transaction() {
        let tangle = tangle();
        let address = Hash::calculate(&[1, 1, 0]);
        let bundle = Hash::calculate(&[-1, 1]);
        let record = TransactionBuilder::new()
            .address(address)
            .bundle(bundle)
            .tag(Hash::calculate(&[0, -1]))
            .build();
        record.store(&tangle).await.unwrap();

        let by_address = TransactionRecord::hashes_for_address(&tangle, &address)
            .await
            .unwrap();
        assert_eq!(by_address, vec![record.hash()]);
        let by_bundle = TransactionRecord::hashes_for_bundle(&tangle, &bundle)
            .await
            .unwrap();
        assert_eq!(by_bundle, vec![record.hash()]);
        let by_tag = TransactionRecord::hashes_for_tag(&tangle, &record.tag())
            .await
            .unwrap();
        assert_eq!(by_tag, vec![record.hash()]);
    }

    #[tokio::test]
    async fn unchanged_metadata_is_not_rewritten() {
        let tangle = tangle();
        let record = tx(8, Hash::NULL);
        record.store(&tangle).await.unwrap();

        assert!(!record.set_height(&tangle, 0).await.unwrap());
        assert!(tangle
            .load_raw(Partition::TransactionMetadata, MetadataField::Height.key(&record.hash()))
            .await
            .unwrap()
            .is_none());

        assert!(record.set_height(&tangle, 4).await.unwrap());
        assert!(!record.set_height(&tangle, 4).await.unwrap());
        assert!(record.set_validity(&tangle, -1).await.unwrap());
        assert_eq!(record.height(), 4);
    }

    #[tokio::test]
    async fn metadata_survives_a_reload() {
        let tangle = tangle();
        let record = tx(7, Hash::NULL);
        record.store(&tangle).await.unwrap();
        record.set_arrival_time(&tangle, 1234).await.unwrap();
        record.set_sender(&tangle, "udp://10.0.0.1:14600").await.unwrap();
        assert!(record.mark_solid(&tangle).await.unwrap());
        assert!(!record.mark_solid(&tangle).await.unwrap());

        let loaded = TransactionRecord::load(&tangle, record.hash()).await.unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.arrival_time(), 1234);
        assert!(loaded.is_solid());
    }

    #[tokio::test]
    async fn confirmation_persists_and_is_written_once() {
        let provider = Arc::new(MemoryProvider::volatile());
        let tangle = Tangle::new(vec![provider.clone() as Arc<dyn PersistenceProvider>]);
        let record = tx(9, Hash::NULL);
        record.store(&tangle).await.unwrap();

        assert!(record.mark_confirmed(&tangle, true).await.unwrap());
        let loaded = TransactionRecord::load(&tangle, record.hash()).await.unwrap();
        assert!(loaded.is_confirmed());

        // Drop the stored flag: a repeated call must not put it back.
        let key = MetadataField::Confirmed.key(&record.hash());
        provider.delete(Partition::TransactionMetadata, &key).unwrap();
        assert!(!record.mark_confirmed(&tangle, true).await.unwrap());
        assert!(provider
            .get(Partition::TransactionMetadata, &key)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_metadata_untouched() {
        let record = tx(10, Hash::NULL);
        let unbacked = Tangle::new(Vec::new());

        assert!(matches!(
            record.set_height(&unbacked, 5).await,
            Err(StorageError::NoProviders)
        ));
        assert!(record.mark_confirmed(&unbacked, true).await.is_err());
        assert_eq!(record.height(), 0);
        assert!(!record.is_confirmed());
    }

    #[tokio::test]
    async fn unknown_hash_loads_as_prefilled() {
        let tangle = tangle();
        let loaded = TransactionRecord::load(&tangle, Hash::calculate(&[1, -1]))
            .await
            .unwrap();
        assert_eq!(loaded.tx_type(), TransactionType::Prefilled);
        assert!(!TransactionRecord::exists(&tangle, &loaded.hash()).await.unwrap());
    }

    // -- Heights ------------------------------------------------------------

    #[tokio::test]
    async fn heights_count_up_from_the_null_trunk() {
        let tangle = tangle();
        let a = tx(1, Hash::NULL);
        let b = tx(2, a.hash());
        let c = tx(3, b.hash());
        for t in [&a, &b, &c] {
            t.store(&tangle).await.unwrap();
        }

        c.update_heights(&tangle).await.unwrap();

        assert_eq!(c.height(), 3);
        for (t, h) in [(&a, 1), (&b, 2), (&c, 3)] {
            let loaded = TransactionRecord::load(&tangle, t.hash()).await.unwrap();
            assert_eq!(loaded.height(), h);
        }
    }

    #[tokio::test]
    async fn missing_link_leaves_heights_at_zero() {
        let tangle = tangle();
        let missing = Hash::calculate(&[1, 0, 0, 1]);
        let b = tx(2, missing);
        let c = tx(3, b.hash());
        b.store(&tangle).await.unwrap();
        c.store(&tangle).await.unwrap();

        c.update_heights(&tangle).await.unwrap();

        assert_eq!(c.height(), 0);
        let loaded = TransactionRecord::load(&tangle, b.hash()).await.unwrap();
        assert_eq!(loaded.height(), 0);
    }

    #[tokio::test]
    async fn heights_resume_from_a_known_ancestor() {
        let tangle = tangle();
        let a = tx(1, Hash::NULL);
        a.store(&tangle).await.unwrap();
        a.set_height(&tangle, 10).await.unwrap();
        let b = tx(2, a.hash());
        b.store(&tangle).await.unwrap();

        b.update_heights(&tangle).await.unwrap();
        assert_eq!(b.height(), 11);
    }
}
