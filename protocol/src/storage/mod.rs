//! # Storage Module
//!
//! Persistence for the tangle. Everything the node remembers about
//! transactions and milestones goes through here.
//!
//! ## Architecture
//!
//! ```text
//! provider.rs — PersistenceProvider trait, partitions, keys, write batches
//! tangle.rs   — Tangle facade: provider fallback, async over spawn_blocking
//! memory.rs   — Ordered in-memory provider with optional snapshot file
//! db.rs       — sled provider, one tree per partition
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! TransactionRecord / MilestoneIndex / StateDiff
//!                     ↓
//!                  Tangle  (facade)
//!                ↓        ↓
//!       MemoryProvider  TangleDB
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Bytes in, bytes out.** Providers never see typed records. The model
//!    types own their encoding, so a new backend is a dozen small methods.
//!
//! 2. **Composite keys instead of merge operators.** Reference indices key
//!    entries by `referenced || referrer` and are queried by prefix.
//!
//! 3. **Bincode for on-disk serialization.** Compact, fast, deterministic.
//!    JSON is for APIs and debugging; bincode is for storage.

pub mod db;
pub mod memory;
pub mod provider;
pub mod tangle;

pub use db::TangleDB;
pub use memory::{MemoryProvider, MemoryProviderConfig};
pub use provider::{
    reference_key, referrer_from_key, Entry, Indexable, IntegerIndex, Partition,
    PersistenceProvider, StorageError, StorageResult, WriteBatch,
};
pub use tangle::{StorageFuture, Tangle};
