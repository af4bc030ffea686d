//! QUIC path validation and connection migration.
//!
//! Tracks every network path of a server-side QUIC connection, validates
//! new peer addresses with PATH_CHALLENGE / PATH_RESPONSE, migrates the
//! connection when the peer moves and falls back to the last validated
//! path when validation fails. The state machine lives in
//! [`manager::PathManager`]; it is sans-I/O and driven by the caller.

pub mod cid;
pub mod config;
pub mod congestion;
pub mod error;
pub mod frame;
pub mod manager;
pub mod packet;
pub mod path;
pub mod registry;

pub use cid::{ClientId, ClientIdPool, ClientIdSource};
pub use config::PathConfig;
pub use congestion::{Congestion, RttEstimator};
pub use error::{QuicError, QuicResult};
pub use frame::QuicFrame;
pub use manager::{PacketDisposition, PathEvent, PathManager, Transmit};
pub use packet::{EncryptionLevel, IncomingPacket};
pub use path::{PathId, PathTag, QuicPath};
pub use registry::PathRegistry;
