//! Binary codec for snapshots and wire packets.
//!
//! All encoding in this crate goes through here so both peers produce the same
//! bytes for the same value: bincode 2 in serde mode with fixed-width integers.
//!
//! ```
//! use rollback_sync::codec::{decode_value, encode};
//!
//! let bytes = encode(&(7u32, -1i32)).expect("encoding should succeed");
//! let value: (u32, i32) = decode_value(&bytes).expect("decoding should succeed");
//! assert_eq!(value, (7, -1));
//! ```

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// What the codec was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecOperation {
    /// Encoding an entity snapshot.
    EncodeSnapshot,
    /// Decoding an entity snapshot.
    DecodeSnapshot,
    /// Encoding a remote input packet.
    EncodePacket,
    /// Decoding a remote input packet.
    DecodePacket,
    /// Any other encode.
    Encode,
    /// Any other decode.
    Decode,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeSnapshot => write!(f, "encoding snapshot"),
            Self::DecodeSnapshot => write!(f, "decoding snapshot"),
            Self::EncodePacket => write!(f, "encoding remote input packet"),
            Self::DecodePacket => write!(f, "decoding remote input packet"),
            Self::Encode => write!(f, "encoding"),
            Self::Decode => write!(f, "decoding"),
        }
    }
}

/// Encoding or decoding failure.
///
/// bincode errors are opaque, so the message is kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// Encoding failed.
    EncodeError {
        /// bincode's message.
        message: String,
        /// What was being encoded.
        operation: CodecOperation,
    },
    /// Decoding failed.
    DecodeError {
        /// bincode's message.
        message: String,
        /// What was being decoded.
        operation: CodecOperation,
    },
    /// Decoding succeeded but left unread bytes behind.
    TrailingBytes {
        /// Bytes consumed by the decoded value.
        consumed: usize,
        /// Total bytes provided.
        provided: usize,
    },
}

impl CodecError {
    /// Creates an encode error.
    pub fn encode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::EncodeError {
            message: message.into(),
            operation,
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::DecodeError {
            message: message.into(),
            operation,
        }
    }

    /// Re-labels the operation of an encode or decode error.
    #[must_use]
    pub fn during(self, operation: CodecOperation) -> Self {
        match self {
            Self::EncodeError { message, .. } => Self::EncodeError { message, operation },
            Self::DecodeError { message, .. } => Self::DecodeError { message, operation },
            other => other,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError { message, operation } => {
                write!(f, "encoding failed while {operation}: {message}")
            },
            Self::DecodeError { message, operation } => {
                write!(f, "decoding failed while {operation}: {message}")
            },
            Self::TrailingBytes { consumed, provided } => {
                write!(
                    f,
                    "decoded value used {consumed} of {provided} bytes; trailing data rejected"
                )
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a new `Vec<u8>`.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::Encode))
}

/// Encodes a value by appending to `buffer`, returning the number of bytes
/// written.
pub fn encode_append<T: Serialize + ?Sized>(value: &T, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start_len = buffer.len();
    bincode::serde::encode_into_std_write(value, buffer, config())
        .map(|_| buffer.len() - start_len)
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::Encode))
}

/// Decodes a value, returning it with the number of bytes consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::Decode))
}

/// Decodes a value, ignoring the bytes consumed.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    decode(bytes).map(|(value, _)| value)
}

/// Decodes a value that must span `bytes` exactly.
///
/// Wire packets use this so a datagram with garbage appended is rejected
/// instead of silently accepted.
pub fn decode_exact<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let (value, consumed) = decode(bytes)?;
    if consumed != bytes.len() {
        return Err(CodecError::TrailingBytes {
            consumed,
            provided: bytes.len(),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::{Frame, PhaseClock};

    #[test]
    fn fixed_int_encoding_has_stable_width() {
        // Fixed-width ints: small and large values take the same space.
        assert_eq!(encode(&1u32).unwrap().len(), 4);
        assert_eq!(encode(&u32::MAX).unwrap().len(), 4);
        assert_eq!(encode(&Frame::new(3)).unwrap().len(), 4);
        assert_eq!(encode(&PhaseClock::new(1, 2)).unwrap().len(), 8);
    }

    #[test]
    fn frame_null_survives_encoding() {
        let bytes = encode(&Frame::NULL).unwrap();
        assert_eq!(decode_value::<Frame>(&bytes).unwrap(), Frame::NULL);
    }

    #[test]
    fn decode_reports_truncated_input() {
        let bytes = encode(&12_345u64).unwrap();
        let err = decode::<u64>(&bytes[..3]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::DecodeError {
                operation: CodecOperation::Decode,
                ..
            }
        ));
    }

    #[test]
    fn decode_exact_rejects_trailing_bytes() {
        let mut bytes = encode(&5u32).unwrap();
        bytes.push(0xFF);
        assert_eq!(
            decode_exact::<u32>(&bytes).unwrap_err(),
            CodecError::TrailingBytes {
                consumed: 4,
                provided: 5
            }
        );
    }

    #[test]
    fn encode_append_reports_written_len() {
        let mut buffer = vec![0xAA];
        let written = encode_append(&7u16, &mut buffer).unwrap();
        assert_eq!(written, 2);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn during_relabels_operation() {
        let err = CodecError::decode("bad", CodecOperation::Decode).during(CodecOperation::DecodeSnapshot);
        assert_eq!(err.to_string(), "decoding failed while decoding snapshot: bad");
    }
}
