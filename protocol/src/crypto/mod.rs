//! # Cryptographic Primitives
//!
//! Everything hash-shaped flows through here: transaction identities,
//! reference fields, and the packet fingerprints the gossip layer
//! deduplicates on.
//!
//! We don't roll our own crypto. BLAKE3 and SHA-256 come from audited
//! crates; this module only adapts their output to ternary where the
//! tangle needs it.

pub mod hash;

pub use hash::{sha256_array, Hash};
