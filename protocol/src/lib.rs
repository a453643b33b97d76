// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tangle Protocol — Core Library
//!
//! Everything a tangle node needs short of a `main()`: the ternary
//! transaction model, a storage facade over pluggable persistence
//! providers, tip and milestone bookkeeping, and the gossip engine that
//! trades transactions with neighbors.
//!
//! A tangle has no blocks. Each transaction approves two earlier ones
//! (its trunk and branch), and the node's job is to store what it
//! receives, pass it on, and ask for whatever history it is missing.
//!
//! ## Architecture
//!
//! - **config** — Wire layout and tuning constants.
//! - **crypto** — Transaction hashes and packet digests.
//! - **transaction** — Ternary codec, `TransactionRecord`, builder, validator.
//! - **storage** — `PersistenceProvider` contract, sled and in-memory
//!   providers, and the `Tangle` facade that fans out over them.
//! - **ledger** — Tips, milestones and state diffs.
//! - **network** — Neighbors, priority queues, dedup caches, the UDP
//!   transport and the `GossipEngine`.
//!
//! ## Design Philosophy
//!
//! 1. Components are constructed and passed in. No global singletons.
//! 2. Storage is async at the edge and blocking underneath.
//! 3. A bad packet costs a log line, never a worker.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod network;
pub mod storage;
pub mod transaction;
