//! Error types for the block cache subsystem.

use thiserror::Error;

use crate::remote::RemoteStatus;

/// Result type alias for block cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error variants for block cache operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The shared zone is full even after one discard pass.
    #[error("out of memory in zone \"{zone}\": {requested} bytes requested")]
    OutOfMemory {
        /// Zone name.
        zone: String,
        /// Bytes the node needed.
        requested: usize,
    },

    /// The zone cannot even hold the cache context.
    #[error("zone \"{zone}\" too small: {size} bytes")]
    ZoneTooSmall {
        /// Zone name.
        zone: String,
        /// Configured size in bytes.
        size: usize,
    },

    /// A zone with this name already exists with another size.
    #[error("zone \"{zone}\" already attached with size {existing}, requested {requested}")]
    ZoneConflict {
        /// Zone name.
        zone: String,
        /// Size of the existing zone.
        existing: usize,
        /// Size asked for by this attachment.
        requested: usize,
    },

    /// The value holds more server addresses than a node can store.
    #[error("value too large: {count} servers (max {max})")]
    ValueTooLarge {
        /// Number of server addresses in the value.
        count: usize,
        /// Maximum per node.
        max: usize,
    },

    /// The value is structurally unusable.
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// Description of the problem.
        reason: &'static str,
    },

    /// Encoded key or value could not be decoded.
    #[error("decode error: {reason}")]
    Decode {
        /// Description of the problem.
        reason: String,
    },

    /// A batch request holds more keys than allowed.
    #[error("batch too large: {count} keys (max {max})")]
    BatchTooLarge {
        /// Number of keys in the request.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The remote tier answered with a non-success status.
    #[error("remote {op} failed: {status:?}")]
    Remote {
        /// Operation that failed.
        op: &'static str,
        /// Status returned by the remote tier.
        status: RemoteStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_result_alias() {
        let ok: CacheResult<u32> = Ok(1);
        assert!(ok.is_ok());
        let err: CacheResult<u32> = Err(CacheError::InvalidValue { reason: "empty" });
        assert!(err.is_err());
    }

    #[test]
    fn test_out_of_memory_display() {
        let err = CacheError::OutOfMemory {
            zone: "tfs_block_cache".to_string(),
            requested: 80,
        };
        assert_eq!(
            format!("{}", err),
            "out of memory in zone \"tfs_block_cache\": 80 bytes requested"
        );
    }

    #[test]
    fn test_value_too_large_display() {
        let err = CacheError::ValueTooLarge { count: 40, max: 31 };
        let msg = format!("{}", err);
        assert!(msg.contains("40"));
        assert!(msg.contains("31"));
    }

    #[test]
    fn test_remote_display() {
        let err = CacheError::Remote {
            op: "put",
            status: RemoteStatus::Timeout,
        };
        assert_eq!(format!("{}", err), "remote put failed: Timeout");
    }
}
