//! # Ledger Module
//!
//! In-memory and persisted views over the tangle that the gossip engine
//! and API consult: the current tips, the milestone sequence, and the
//! ledger state diffs milestones carry.
//!
//! ```text
//! tips.rs       — TipIndex: solid / non-solid tip sets under one lock
//! milestone.rs  — MilestoneIndex: cached, index-ordered milestone access
//! state_diff.rs — StateDiff: per-milestone balance changes (snapshots)
//! ```

pub mod milestone;
pub mod state_diff;
pub mod tips;

pub use milestone::{Milestone, MilestoneIndex};
pub use state_diff::StateDiff;
pub use tips::TipIndex;
