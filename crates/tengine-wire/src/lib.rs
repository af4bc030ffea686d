#![warn(missing_docs)]

//! Tengine wire subsystem: bounded big-endian serialization helpers and TLS ClientHello preread
//!
//! Protocol codecs elsewhere in the workspace build on the [`Writer`] and
//! [`Reader`] cursors, which refuse to run past the end of their buffer.
//! The [`preread`] module peeks at the first TLS records of a stream to
//! extract SNI/ALPN before any TLS termination happens.

pub mod error;
pub mod preread;
pub mod serialize;

pub use error::{WireError, WireResult};
pub use preread::{ClientHelloInfo, Preread, PrereadStatus, TlsVersion};
pub use serialize::{Reader, Writer};
