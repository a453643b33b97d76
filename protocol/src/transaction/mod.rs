//! # Transaction Module
//!
//! The transaction model of the tangle. Every message, value transfer and
//! milestone on the network is one fixed-size ternary payload, represented
//! here as a [`TransactionRecord`].
//!
//! ## Architecture
//!
//! ```text
//! ternary.rs      — Trit/byte/tryte conversions (5 trits per byte)
//! types.rs        — TransactionRecord, metadata, persistence, heights
//! builder.rs      — Fluent TransactionBuilder for well-formed payloads
//! verification.rs — TransactionValidator trait and structural checks
//! ```
//!
//! ## Record Lifecycle
//!
//! 1. **Receive** — Raw bytes arrive from a neighbor.
//! 2. **Validate** — A [`TransactionValidator`] decodes them into a record.
//! 3. **Store** — [`TransactionRecord::store`] writes payload and indices.
//! 4. **Annotate** — Arrival time, sender, solidity and height are learned
//!    later and persisted field by field.

pub mod builder;
pub mod ternary;
pub mod types;
pub mod verification;

pub use builder::TransactionBuilder;
pub use types::{FormatError, TransactionMetadata, TransactionRecord, TransactionType};
pub use verification::{StructuralValidator, TransactionValidator, ValidationError};
