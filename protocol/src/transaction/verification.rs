//! Transaction validation: turning raw bytes from the wire into a record.
//!
//! The gossip engine never decodes a payload itself. It hands the bytes to
//! a [`TransactionValidator`], which either returns a decoded
//! [`TransactionRecord`] or says why the payload is unacceptable. The checks
//! are ordered from cheapest to most expensive to fail fast.

use thiserror::Error;

use super::types::{FormatError, TransactionRecord};
use crate::config::SUPPLY;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a payload is rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The bytes are not a transaction at all.
    #[error("malformed payload: {0}")]
    Format(#[from] FormatError),

    /// The value trits above the usable range are not zero.
    #[error("value field uses trits beyond the usable range")]
    UnusedValueTrits,

    /// The value exceeds the total supply in either direction.
    #[error("value {0} exceeds the total supply")]
    ValueOutOfRange(i64),

    /// The identity hash does not carry enough trailing zero trits.
    #[error("weight magnitude {actual} is below the required {required}")]
    InsufficientWeight { required: u32, actual: u32 },
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Decodes and checks inbound payloads.
pub trait TransactionValidator: Send + Sync {
    /// Validates `payload` (exactly the transaction bytes, without the
    /// trailing request hash) and returns the decoded record.
    fn validate(&self, payload: &[u8]) -> Result<TransactionRecord, ValidationError>;
}

/// Structural checks only: the payload decodes, the value is in range, and
/// the hash meets a configurable minimum weight.
///
/// A minimum weight of zero accepts every hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator {
    min_weight_magnitude: u32,
}

impl StructuralValidator {
    pub fn new(min_weight_magnitude: u32) -> Self {
        Self {
            min_weight_magnitude,
        }
    }
}

impl TransactionValidator for StructuralValidator {
    fn validate(&self, payload: &[u8]) -> Result<TransactionRecord, ValidationError> {
        let record = TransactionRecord::decode(payload)?;

        if !record.unused_value_trits_are_zero() {
            return Err(ValidationError::UnusedValueTrits);
        }

        let value = record.value();
        if value.abs() > SUPPLY {
            return Err(ValidationError::ValueOutOfRange(value));
        }

        let weight = record.weight_magnitude();
        if weight < self.min_weight_magnitude {
            return Err(ValidationError::InsufficientWeight {
                required: self.min_weight_magnitude,
                actual: weight,
            });
        }

        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
