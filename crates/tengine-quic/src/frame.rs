//! Codec for the frames the path subsystem sends and receives.
//!
//! Frame types and lengths use the QUIC variable-length integer encoding
//! (RFC 9000, 16). Payloads are the plaintext frame sequence of a packet;
//! packet protection is applied elsewhere.

use tengine_wire::{Reader, Writer};

use crate::error::{QuicError, QuicResult};

pub const FRAME_PADDING: u64 = 0x00;
pub const FRAME_PING: u64 = 0x01;
pub const FRAME_NEW_TOKEN: u64 = 0x07;
pub const FRAME_PATH_CHALLENGE: u64 = 0x1a;
pub const FRAME_PATH_RESPONSE: u64 = 0x1b;

/// Largest value a variable-length integer can carry.
pub const VARINT_MAX: u64 = (1 << 62) - 1;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuicFrame {
    /// A run of padding bytes.
    Padding(usize),
    Ping,
    NewToken(Vec<u8>),
    PathChallenge([u8; 8]),
    PathResponse([u8; 8]),
}

/// Bytes needed to encode `value` as a varint.
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0x3f => 1,
        0x40..=0x3fff => 2,
        0x4000..=0x3fff_ffff => 4,
        _ => 8,
    }
}

pub fn write_varint(w: &mut Writer<'_>, value: u64) -> QuicResult<()> {
    if value > VARINT_MAX {
        return Err(QuicError::FrameEncoding {
            reason: format!("varint {} out of range", value),
        });
    }
    match varint_len(value) {
        1 => w.write_u8(value as u8)?,
        2 => w.write_u16(0x4000 | value as u16)?,
        4 => w.write_u32(0x8000_0000 | value as u32)?,
        _ => w.write_u64(0xc000_0000_0000_0000 | value)?,
    }
    Ok(())
}

pub fn read_varint(r: &mut Reader<'_>) -> QuicResult<u64> {
    let mut probe = r.clone();
    let first = probe.read_u8()?;
    let len = 1usize << (first >> 6);
    let mut value = (first & 0x3f) as u64;
    for _ in 1..len {
        value = (value << 8) | probe.read_u8()? as u64;
    }
    *r = probe;
    Ok(value)
}

impl QuicFrame {
    /// Frame type code.
    pub fn frame_type(&self) -> u64 {
        match self {
            QuicFrame::Padding(_) => FRAME_PADDING,
            QuicFrame::Ping => FRAME_PING,
            QuicFrame::NewToken(_) => FRAME_NEW_TOKEN,
            QuicFrame::PathChallenge(_) => FRAME_PATH_CHALLENGE,
            QuicFrame::PathResponse(_) => FRAME_PATH_RESPONSE,
        }
    }

    /// Probing frames do not trigger migration (RFC 9000, 9.1).
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            QuicFrame::Padding(_) | QuicFrame::PathChallenge(_) | QuicFrame::PathResponse(_)
        )
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            QuicFrame::Padding(n) => *n,
            QuicFrame::Ping => 1,
            QuicFrame::NewToken(token) => {
                1 + varint_len(token.len() as u64) + token.len()
            }
            QuicFrame::PathChallenge(_) | QuicFrame::PathResponse(_) => 9,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> QuicResult<()> {
        match self {
            QuicFrame::Padding(n) => w.fill(0, *n)?,
            QuicFrame::Ping => write_varint(w, FRAME_PING)?,
            QuicFrame::NewToken(token) => {
                if token.is_empty() {
                    return Err(QuicError::FrameEncoding {
                        reason: "empty NEW_TOKEN".to_string(),
                    });
                }
                write_varint(w, FRAME_NEW_TOKEN)?;
                write_varint(w, token.len() as u64)?;
                w.write_data(token)?;
            }
            QuicFrame::PathChallenge(data) => {
                write_varint(w, FRAME_PATH_CHALLENGE)?;
                w.write_data(data)?;
            }
            QuicFrame::PathResponse(data) => {
                write_varint(w, FRAME_PATH_RESPONSE)?;
                w.write_data(data)?;
            }
        }
        Ok(())
    }

    /// Decodes one frame. Consecutive padding bytes form one frame.
    pub fn decode(r: &mut Reader<'_>) -> QuicResult<QuicFrame> {
        let frame_type = read_varint(r)?;
        let frame = match frame_type {
            FRAME_PADDING => {
                let mut n = 1;
                let mut probe = r.clone();
                while let Ok(0) = probe.read_u8() {
                    n += 1;
                    *r = probe.clone();
                }
                QuicFrame::Padding(n)
            }
            FRAME_PING => QuicFrame::Ping,
            FRAME_NEW_TOKEN => {
                let len = read_varint(r)? as usize;
                if len == 0 {
                    return Err(QuicError::FrameEncoding {
                        reason: "empty NEW_TOKEN".to_string(),
                    });
                }
                QuicFrame::NewToken(r.read_data(len)?.to_vec())
            }
            FRAME_PATH_CHALLENGE | FRAME_PATH_RESPONSE => {
                let mut data = [0u8; 8];
                r.read_data_into(&mut data)?;
                if frame_type == FRAME_PATH_CHALLENGE {
                    QuicFrame::PathChallenge(data)
                } else {
                    QuicFrame::PathResponse(data)
                }
            }
            other => {
                return Err(QuicError::FrameEncoding {
                    reason: format!("unexpected frame type 0x{:x}", other),
                })
            }
        };
        Ok(frame)
    }
}

/// Encodes `frame` followed by padding up to `min_len` bytes.
pub fn encode_padded(frame: &QuicFrame, min_len: usize) -> QuicResult<Vec<u8>> {
    let len = frame.encoded_len().max(min_len);
    let mut buf = vec![0u8; len];
    let mut w = Writer::new(&mut buf);
    frame.encode(&mut w)?;
    let pad = w.left();
    w.fill(0, pad)?;
    Ok(buf)
}

/// Decodes every frame in a packet payload.
pub fn decode_frames(payload: &[u8]) -> QuicResult<Vec<QuicFrame>> {
    let mut r = Reader::new(payload);
    let mut frames = Vec::new();
    while !r.is_empty() {
        frames.push(QuicFrame::decode(&mut r)?);
    }
    Ok(frames)
}
