//! Encoding of keys and values stored in the remote tier.
//!
//! Keys are the 12-byte little-endian form from [`BlockCacheKey::to_bytes`].
//! Values are a 4-byte little-endian server count followed by that many
//! little-endian 8-byte addresses.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CacheError, CacheResult};
use crate::key::{BlockCacheKey, BlockCacheValue};

/// Size of the server count prefix.
pub const VALUE_BASE_SIZE: usize = 4;

/// Encodes a key for the remote tier.
pub fn encode_key(key: &BlockCacheKey) -> Bytes {
    Bytes::copy_from_slice(&key.to_bytes())
}

/// Decodes a remote key.
pub fn decode_key(data: &[u8]) -> CacheResult<BlockCacheKey> {
    BlockCacheKey::from_bytes(data)
}

/// Encodes a value for the remote tier.
pub fn encode_value(value: &BlockCacheValue) -> Bytes {
    let mut buf = BytesMut::with_capacity(VALUE_BASE_SIZE + value.server_count() * 8);
    buf.put_u32_le(value.server_count() as u32);
    for addr in &value.server_addrs {
        buf.put_u64_le(*addr);
    }
    buf.freeze()
}

/// Decodes a remote value.
///
/// A zero server count or a payload shorter than the count announces is
/// rejected.
pub fn decode_value(data: &[u8]) -> CacheResult<BlockCacheValue> {
    let mut buf = data;
    if buf.remaining() < VALUE_BASE_SIZE {
        return Err(CacheError::Decode {
            reason: format!("value of {} bytes has no server count", data.len()),
        });
    }
    let count = buf.get_u32_le() as usize;
    if count == 0 {
        return Err(CacheError::InvalidValue {
            reason: "zero server count",
        });
    }
    if buf.remaining() < count * 8 {
        return Err(CacheError::Decode {
            reason: format!(
                "value announces {} servers but carries {} bytes",
                count,
                buf.remaining()
            ),
        });
    }
    let server_addrs = (0..count).map(|_| buf.get_u64_le()).collect();
    Ok(BlockCacheValue::new(server_addrs))
}
