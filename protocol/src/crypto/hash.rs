//! # Hashing Utilities
//!
//! Two hash functions, two jobs:
//!
//! - **BLAKE3 (XOF)** derives transaction identities. We squeeze 243 bytes
//!   out of the extendable output, reduce each byte to a trit, and pack the
//!   result into the 49-byte [`Hash`] every reference field on the tangle
//!   uses. The output is a real ternary hash, so it can be written into a
//!   trunk or branch slot of another transaction and read back unchanged.
//!
//! - **SHA-256** fingerprints raw inbound packets for the gossip dedup
//!   cache. It never leaves the process, it just has to be collision
//!   resistant and fast.
//!
//! Proof-of-work scoring (weight magnitude) is the number of trailing zero
//! trits of the identity hash.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::config::{HASH_SIZE_BYTES, HASH_TRIT_SIZE, TRITS_PER_TRYTE};
use crate::transaction::ternary::{
    bytes_to_trits, is_valid_packed, trits_to_bytes, trits_to_trytes, trytes_to_trits,
    TernaryError, Trit,
};

/// Trytes in a rendered hash.
const HASH_TRYTE_SIZE: usize = HASH_TRIT_SIZE / TRITS_PER_TRYTE;

/// Compute the SHA-256 hash and return a fixed-size array.
///
/// Used to fingerprint the transaction portion of inbound packets.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// A 243-trit hash packed into 49 bytes.
///
/// Used for transaction identities, addresses, bundles and trunk/branch
/// references alike. The all-zero value is the null reference: a trunk
/// pointing at [`Hash::NULL`] marks the bottom of a chain.
///
/// Ordering is plain byte order, which is what the storage layer sorts by.
/// The gossip queues use their own tie-break, see `network::queue`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_SIZE_BYTES]);

impl Hash {
    /// The null reference.
    pub const NULL: Hash = Hash([0u8; HASH_SIZE_BYTES]);

    /// Wraps an exact 49-byte array.
    pub const fn new(bytes: [u8; HASH_SIZE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Builds a hash from a byte slice, copying at most 49 bytes and
    /// zero-padding the rest. Short inputs (tag values, request prefixes)
    /// become prefix hashes.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; HASH_SIZE_BYTES];
        let len = bytes.len().min(HASH_SIZE_BYTES);
        out[..len].copy_from_slice(&bytes[..len]);
        Self(out)
    }

    /// Packs 243 trits (fewer are zero-extended) into a hash.
    pub fn from_trits(trits: &[Trit]) -> Self {
        let len = trits.len().min(HASH_TRIT_SIZE);
        Self::from_slice(&trits_to_bytes(&trits[..len]))
    }

    /// Parses an 81-tryte string. Any other length is an error.
    pub fn from_trytes(trytes: &str) -> Result<Self, TernaryError> {
        if trytes.len() != HASH_TRYTE_SIZE {
            return Err(TernaryError::InvalidLength {
                expected: HASH_TRYTE_SIZE,
                got: trytes.len(),
            });
        }
        let trits = trytes_to_trits(trytes)?;
        Ok(Self::from_trits(&trits))
    }

    /// Derives the identity hash of a transaction from its trits.
    pub fn calculate(trits: &[Trit]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&trits_to_bytes(trits));
        let mut squeezed = [0u8; HASH_TRIT_SIZE];
        hasher.finalize_xof().fill(&mut squeezed);
        let digest: Vec<Trit> = squeezed.iter().map(|b| (b % 3) as Trit - 1).collect();
        Self::from_trits(&digest)
    }

    /// Raw packed bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE_BYTES] {
        &self.0
    }

    /// `true` for the null reference.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// `true` if every byte is a packed trit group. Hashes built from
    /// trits always are; hashes copied off the wire may not be.
    pub fn is_valid(&self) -> bool {
        is_valid_packed(&self.0)
    }

    /// Unpacks the hash into its 243 trits.
    pub fn trits(&self) -> Result<Vec<Trit>, TernaryError> {
        let mut trits = vec![0; HASH_TRIT_SIZE];
        bytes_to_trits(&self.0, &mut trits)?;
        Ok(trits)
    }

    /// Renders the hash as 81 trytes. Bytes that do not unpack are shown
    /// as hex instead.
    pub fn to_trytes(&self) -> String {
        self.trits()
            .and_then(|trits| trits_to_trytes(&trits))
            .unwrap_or_else(|_| hex::encode(self.0))
    }

    /// Counts zero trits from the end of the hash. This is the proof-of-work
    /// score ("weight magnitude") the gossip queues prioritize by. A hash
    /// that does not unpack scores zero.
    pub fn trailing_zero_trits(&self) -> u32 {
        match self.trits() {
            Ok(trits) => trits.iter().rev().take_while(|&&t| t == 0).count() as u32,
            Err(_) => 0,
        }
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_trytes())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trytes = self.to_trytes();
        write!(f, "Hash({}..)", &trytes[..trytes.len().min(16)])
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_trytes())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let trytes = String::deserialize(deserializer)?;
        Hash::from_trytes(&trytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256_array(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn null_hash_is_all_nines() {
        assert!(Hash::NULL.is_null());
        assert_eq!(Hash::NULL.to_trytes(), "9".repeat(81));
        assert_eq!(Hash::NULL.trailing_zero_trits(), 243);
    }

    #[test]
    fn calculate_is_deterministic_and_ternary() {
        let trits = vec![1i8; 300];
        let a = Hash::calculate(&trits);
        let b = Hash::calculate(&trits);
        assert_eq!(a, b);
        assert!(!a.is_null());

        // Round-trips through trits, i.e. it is a genuine packed hash.
        assert_eq!(Hash::from_trits(&a.trits().unwrap()), a);
    }

    #[test]
    fn different_inputs_give_different_hashes() {
        let a = Hash::calculate(&[1, 0, -1]);
        let b = Hash::calculate(&[1, 0, 1]);
        assert_ne!(a, b);
    }

    #[test]
    fn trytes_round_trip() {
        let h = Hash::calculate(&[0, 1, 1, -1]);
        let parsed = Hash::from_trytes(&h.to_trytes()).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(h.to_trytes().len(), 81);
    }

    #[test]
    fn from_trytes_requires_exactly_81() {
        let trytes = Hash::calculate(&[1, -1]).to_trytes();
        assert_eq!(
            Hash::from_trytes(&trytes[..80]),
            Err(TernaryError::InvalidLength { expected: 81, got: 80 })
        );
        assert_eq!(
            Hash::from_trytes(&format!("{trytes}A")),
            Err(TernaryError::InvalidLength { expected: 81, got: 82 })
        );
        assert!(Hash::from_trytes("").is_err());
    }

    #[test]
    fn foreign_bytes_do_not_unpack_or_score() {
        let mut bytes = [0u8; HASH_SIZE_BYTES];
        bytes[0] = 127;
        let h = Hash::new(bytes);
        assert!(!h.is_valid());
        assert!(h.trits().is_err());
        assert_eq!(h.trailing_zero_trits(), 0);
        assert_eq!(h.to_trytes(), hex::encode(bytes));
        assert!(Hash::calculate(&[1]).is_valid());
    }

    #[test]
    fn from_slice_zero_pads_prefixes() {
        let h = Hash::from_slice(&[1, 2, 3]);
        assert_eq!(&h.as_bytes()[..3], &[1, 2, 3]);
        assert!(h.as_bytes()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn trailing_zero_trits_counts_from_the_end() {
        let mut trits = vec![1i8; 243];
        for t in trits.iter_mut().skip(240) {
            *t = 0;
        }
        assert_eq!(Hash::from_trits(&trits).trailing_zero_trits(), 3);
    }

    #[test]
    fn serde_uses_trytes() {
        let h = Hash::calculate(&[1, 1, 1]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_trytes()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
