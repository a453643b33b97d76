//! # Ternary Codec
//!
//! Transactions live in balanced ternary: every trit is one of `-1`, `0`,
//! `1`. On the wire and on disk we pack five trits into a single byte
//! (3^5 = 243 distinct values, which fits in an `i8` as `-121..=121`), and
//! for humans we render three trits as one tryte from the alphabet
//! `9ABCDEFGHIJKLMNOPQRSTUVWXYZ`.
//!
//! All packing is little-endian in trit order: trit `j` of a group carries
//! weight 3^j.

use crate::config::{TRITS_PER_BYTE, TRITS_PER_TRYTE};

/// A single balanced-ternary digit: `-1`, `0` or `1`.
pub type Trit = i8;

/// The tryte alphabet. Index `i` encodes the value `i` for `i <= 13` and
/// `i - 27` above that.
pub const TRYTE_ALPHABET: &[u8; 27] = b"9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest magnitude a packed byte may hold: (3^5 - 1) / 2.
const MAX_PACKED_VALUE: i8 = 121;

/// Errors raised while converting between ternary representations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TernaryError {
    #[error("byte {0} at position {1} is not a packed trit group")]
    InvalidByte(i8, usize),

    #[error("character {0:?} is not a tryte")]
    InvalidTryte(char),

    #[error("trit count {0} is not a multiple of three")]
    UnalignedTrits(usize),

    #[error("expected {expected} trytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// Bytes <-> Trits
// ---------------------------------------------------------------------------

/// Packs trits into bytes, five per byte. A trailing partial group is
/// packed with its missing high trits treated as zero.
pub fn trits_to_bytes(trits: &[Trit]) -> Vec<u8> {
    trits
        .chunks(TRITS_PER_BYTE)
        .map(|group| {
            let value = group
                .iter()
                .rev()
                .fold(0i32, |acc, &trit| acc * 3 + i32::from(trit));
            value as i8 as u8
        })
        .collect()
}

/// Unpacks `bytes` into `trits`, filling at most `trits.len()` positions.
///
/// Fails if a byte holds a value outside `-121..=121`, which no trit group
/// can produce.
pub fn bytes_to_trits(bytes: &[u8], trits: &mut [Trit]) -> Result<(), TernaryError> {
    for (position, (&byte, group)) in bytes
        .iter()
        .zip(trits.chunks_mut(TRITS_PER_BYTE))
        .enumerate()
    {
        let value = byte as i8;
        if !(-MAX_PACKED_VALUE..=MAX_PACKED_VALUE).contains(&value) {
            return Err(TernaryError::InvalidByte(value, position));
        }
        let mut remaining = i32::from(value);
        for slot in group.iter_mut() {
            let trit = balanced_digit(remaining);
            *slot = trit as Trit;
            remaining = (remaining - trit) / 3;
        }
    }
    Ok(())
}

/// Returns `true` if every byte is a valid packed trit group.
pub fn is_valid_packed(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| (-MAX_PACKED_VALUE..=MAX_PACKED_VALUE).contains(&(b as i8)))
}

// ---------------------------------------------------------------------------
// Integers <-> Trits
// ---------------------------------------------------------------------------

/// Interprets `trits` as a little-endian balanced-ternary integer.
pub fn trits_to_long(trits: &[Trit]) -> i64 {
    trits
        .iter()
        .rev()
        .fold(0i64, |acc, &trit| acc * 3 + i64::from(trit))
}

/// Writes `value` as balanced ternary into `out`. High trits that do not fit
/// are silently truncated, unused slots are zeroed.
pub fn long_to_trits(value: i64, out: &mut [Trit]) {
    let mut remaining = i128::from(value);
    for slot in out.iter_mut() {
        let rem = remaining.rem_euclid(3);
        let trit = if rem == 2 { -1 } else { rem };
        *slot = trit as Trit;
        remaining = (remaining - trit) / 3;
    }
}

// ---------------------------------------------------------------------------
// Trytes <-> Trits
// ---------------------------------------------------------------------------

/// Renders trits as trytes. The trit count must be a multiple of three.
pub fn trits_to_trytes(trits: &[Trit]) -> Result<String, TernaryError> {
    if trits.len() % TRITS_PER_TRYTE != 0 {
        return Err(TernaryError::UnalignedTrits(trits.len()));
    }
    Ok(trits
        .chunks(TRITS_PER_TRYTE)
        .map(|t| {
            let value = i32::from(t[0]) + 3 * i32::from(t[1]) + 9 * i32::from(t[2]);
            let index = if value < 0 { value + 27 } else { value };
            TRYTE_ALPHABET[index as usize] as char
        })
        .collect())
}

/// Parses a tryte string into trits (three per character).
pub fn trytes_to_trits(trytes: &str) -> Result<Vec<Trit>, TernaryError> {
    let mut trits = Vec::with_capacity(trytes.len() * TRITS_PER_TRYTE);
    for c in trytes.chars() {
        let index = TRYTE_ALPHABET
            .iter()
            .position(|&a| a as char == c)
            .ok_or(TernaryError::InvalidTryte(c))? as i32;
        let mut remaining = if index > 13 { index - 27 } else { index };
        for _ in 0..TRITS_PER_TRYTE {
            let trit = balanced_digit(remaining);
            trits.push(trit as Trit);
            remaining = (remaining - trit) / 3;
        }
    }
    Ok(trits)
}

/// Least significant balanced-ternary digit of `value`.
fn balanced_digit(value: i32) -> i32 {
    match value.rem_euclid(3) {
        2 => -1,
        d => d,
    }
}
