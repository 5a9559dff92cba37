//! Deterministic checksums over encoded state.
//!
//! A checksum is FNV-1a (64 bit) over the [`codec`](crate::codec) encoding of
//! a value. Both peers encode identically, so equal states give equal
//! checksums on every platform. The snapshot store keeps one per captured
//! frame; comparing them is how replay determinism is verified.
//!
//! ```
//! use rollback_sync::checksum::{compute_checksum, fnv1a};
//!
//! let a = compute_checksum(&(1u32, 2u32)).unwrap();
//! assert_eq!(a, compute_checksum(&(1u32, 2u32)).unwrap());
//! assert_ne!(a, compute_checksum(&(2u32, 1u32)).unwrap());
//! assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
//! ```

use std::fmt;

use serde::Serialize;

use crate::codec::{encode, CodecError};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// FNV-1a over raw bytes.
#[inline]
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Encodes `value` and returns the FNV-1a hash of the bytes.
pub fn compute_checksum<T: Serialize + ?Sized>(value: &T) -> Result<u64, ChecksumError> {
    let bytes = encode(value)?;
    Ok(fnv1a(&bytes))
}

/// Checksum computation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// The value could not be encoded.
    SerializationFailed(String),
}

impl From<CodecError> for ChecksumError {
    fn from(err: CodecError) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationFailed(msg) => write!(f, "checksum serialization failed: {msg}"),
        }
    }
}

impl std::error::Error for ChecksumError {}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn known_fnv1a_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn checksum_matches_hash_of_encoding() {
        let value = (42u32, -7i32);
        let bytes = encode(&value).unwrap();
        assert_eq!(compute_checksum(&value).unwrap(), fnv1a(&bytes));
    }

    #[test]
    fn field_order_changes_checksum() {
        #[derive(Serialize)]
        struct Pos {
            x: i32,
            y: i32,
        }
        let a = compute_checksum(&Pos { x: 1, y: 2 }).unwrap();
        let b = compute_checksum(&Pos { x: 2, y: 1 }).unwrap();
        assert_ne!(a, b);
    }
}
