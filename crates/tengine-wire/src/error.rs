//! Error types for the wire subsystem.

use thiserror::Error;

/// Result type alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Error variants for serialization and preread parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer has fewer bytes left than the operation requires.
    #[error("buffer overrun: need {needed} bytes, {left} left")]
    Overrun {
        /// Bytes the operation needed.
        needed: usize,
        /// Bytes remaining in the buffer.
        left: usize,
    },

    /// A length prefix cannot express the payload size.
    #[error("length {len} does not fit a {prefix_bytes}-byte prefix")]
    LengthOverflow {
        /// Payload length.
        len: usize,
        /// Width of the length prefix in bytes.
        prefix_bytes: usize,
    },

    /// Input violates the protocol format.
    #[error("malformed input: {reason}")]
    Malformed {
        /// Description of the violation.
        reason: &'static str,
    },
}
