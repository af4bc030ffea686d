//! Bounded big-endian serialization cursors.
//!
//! Every read or write checks the remaining length first and fails with
//! [`WireError::Overrun`] instead of touching memory past the buffer. A
//! failed call leaves the cursor where it was.

use crate::error::{WireError, WireResult};

/// Write cursor over a fixed caller-provided buffer.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    /// Creates a writer positioned at the start of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes still writable.
    pub fn left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The written prefix of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn reserve(&mut self, needed: usize) -> WireResult<&mut [u8]> {
        let left = self.left();
        if left < needed {
            return Err(WireError::Overrun { needed, left });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&mut self.buf[start..start + needed])
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> WireResult<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    /// Writes a 2-byte integer in network byte order.
    pub fn write_u16(&mut self, value: u16) -> WireResult<()> {
        self.reserve(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Writes a 4-byte integer in network byte order.
    pub fn write_u32(&mut self, value: u32) -> WireResult<()> {
        self.reserve(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Writes an 8-byte integer in network byte order.
    pub fn write_u64(&mut self, value: u64) -> WireResult<()> {
        self.reserve(8)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Copies `data` verbatim.
    pub fn write_data(&mut self, data: &[u8]) -> WireResult<()> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Writes a 1-byte length followed by `data`.
    pub fn write_u8_data(&mut self, data: &[u8]) -> WireResult<()> {
        let len = u8::try_from(data.len()).map_err(|_| WireError::LengthOverflow {
            len: data.len(),
            prefix_bytes: 1,
        })?;
        self.check(1 + data.len())?;
        self.write_u8(len)?;
        self.write_data(data)
    }

    /// Writes a 2-byte length followed by `data`.
    pub fn write_u16_string(&mut self, data: &[u8]) -> WireResult<()> {
        let len = u16::try_from(data.len()).map_err(|_| WireError::LengthOverflow {
            len: data.len(),
            prefix_bytes: 2,
        })?;
        self.check(2 + data.len())?;
        self.write_u16(len)?;
        self.write_data(data)
    }

    /// Fills `count` bytes with `byte`.
    pub fn fill(&mut self, byte: u8, count: usize) -> WireResult<()> {
        self.reserve(count)?.fill(byte);
        Ok(())
    }

    fn check(&self, needed: usize) -> WireResult<()> {
        let left = self.left();
        if left < needed {
            return Err(WireError::Overrun { needed, left });
        }
        Ok(())
    }
}

/// Read cursor over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes still readable.
    pub fn left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.left() == 0
    }

    fn take(&mut self, needed: usize) -> WireResult<&'a [u8]> {
        let left = self.left();
        if left < needed {
            return Err(WireError::Overrun { needed, left });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&self.buf[start..start + needed])
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a 2-byte network-order integer.
    pub fn read_u16(&mut self) -> WireResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a 3-byte network-order integer (TLS handshake lengths).
    pub fn read_u24(&mut self) -> WireResult<u32> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// Reads a 4-byte network-order integer.
    pub fn read_u32(&mut self) -> WireResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads an 8-byte network-order integer.
    pub fn read_u64(&mut self) -> WireResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Borrows the next `len` bytes.
    pub fn read_data(&mut self, len: usize) -> WireResult<&'a [u8]> {
        self.take(len)
    }

    /// Copies the next `out.len()` bytes into `out`.
    pub fn read_data_into(&mut self, out: &mut [u8]) -> WireResult<()> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Reads a 1-byte length prefix and borrows that many bytes.
    pub fn read_u8_string(&mut self) -> WireResult<&'a [u8]> {
        let mut probe = self.clone();
        let len = probe.read_u8()? as usize;
        let data = probe.take(len)?;
        *self = probe;
        Ok(data)
    }

    /// Reads a 2-byte length prefix and borrows that many bytes.
    pub fn read_u16_string(&mut self) -> WireResult<&'a [u8]> {
        let mut probe = self.clone();
        let len = probe.read_u16()? as usize;
        let data = probe.take(len)?;
        *self = probe;
        Ok(data)
    }

    /// Skips `len` bytes.
    pub fn skip(&mut self, len: usize) -> WireResult<()> {
        self.take(len).map(|_| ())
    }
}
