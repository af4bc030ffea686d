use thiserror::Error;

use tengine_wire::WireError;

use crate::path::PathId;

/// QUIC transport error code for NO_VIABLE_PATH.
pub const NO_VIABLE_PATH: u64 = 0x10;
/// QUIC transport error code for PROTOCOL_VIOLATION.
pub const PROTOCOL_VIOLATION: u64 = 0x0a;
/// QUIC transport error code for FRAME_ENCODING_ERROR.
pub const FRAME_ENCODING_ERROR: u64 = 0x07;
/// QUIC transport error code for INTERNAL_ERROR.
pub const INTERNAL_ERROR: u64 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuicError {
    #[error("no viable path")]
    NoViablePath,

    #[error("random source failed: {reason}")]
    Random { reason: String },

    #[error("frame encoding error: {reason}")]
    FrameEncoding { reason: String },

    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("invalid path config: {reason}")]
    InvalidConfig { reason: String },

    #[error("unknown path {0:?}")]
    UnknownPath(PathId),

    #[error("no client id for the initial path")]
    NoClientId,

    #[error("client id {seqnum} is not in use")]
    UnknownClientId { seqnum: u64 },

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl QuicError {
    /// Transport error code to close the connection with.
    pub fn transport_code(&self) -> u64 {
        match self {
            QuicError::NoViablePath => NO_VIABLE_PATH,
            QuicError::FrameEncoding { .. } | QuicError::Wire(_) => FRAME_ENCODING_ERROR,
            QuicError::ProtocolViolation { .. } => PROTOCOL_VIOLATION,
            QuicError::Random { .. }
            | QuicError::InvalidConfig { .. }
            | QuicError::UnknownPath(_)
            | QuicError::NoClientId
            | QuicError::UnknownClientId { .. } => INTERNAL_ERROR,
        }
    }
}

pub type QuicResult<T> = std::result::Result<T, QuicError>;
