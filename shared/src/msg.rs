//! Length-checked reader/writer over the little-endian byte format used by
//! every in-session message. Hostile input must never panic; every read is
//! bounds-checked and surfaces a typed error instead.

use std::fmt;

/// Longest string a message may carry, including the terminator.
pub const MAX_STRING_CHARS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgError {
    /// The reader ran past the end of the buffer.
    UnexpectedEof,
    /// A string exceeded `MAX_STRING_CHARS` or was missing its terminator.
    OversizedString,
    /// A declared data block length did not fit the remaining buffer.
    BadBlockLength,
}

impl fmt::Display for MsgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgError::UnexpectedEof => write!(f, "message truncated"),
            MsgError::OversizedString => write!(f, "oversized or unterminated string"),
            MsgError::BadBlockLength => write!(f, "bad data block length"),
        }
    }
}

impl std::error::Error for MsgError {}

/// Builds an outbound message.
#[derive(Debug, Default)]
pub struct MsgWriter {
    buf: Vec<u8>,
}

impl MsgWriter {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// NUL-terminated string, truncated to `MAX_STRING_CHARS - 1` bytes.
    pub fn write_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(MAX_STRING_CHARS - 1);
        self.buf.extend_from_slice(&bytes[..n]);
        self.buf.push(0);
    }

    pub fn write_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads an inbound message.
#[derive(Debug)]
pub struct MsgReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MsgReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MsgError> {
        if self.remaining() < n {
            return Err(MsgError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, MsgError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, MsgError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u16(&mut self) -> Result<u16, MsgError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, MsgError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, MsgError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a NUL-terminated string. Non-UTF8 bytes are replaced rather
    /// than rejected so a malformed name cannot poison the whole packet.
    pub fn read_string(&mut self) -> Result<String, MsgError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(MsgError::OversizedString)?;
        if end >= MAX_STRING_CHARS {
            return Err(MsgError::OversizedString);
        }
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    pub fn read_data(&mut self, n: usize) -> Result<&'a [u8], MsgError> {
        if n > self.remaining() {
            return Err(MsgError::BadBlockLength);
        }
        self.take(n)
    }

    /// Hands back whatever trails the structured part of the message.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut w = MsgWriter::new();
        w.write_u8(7);
        w.write_i16(-12345);
        w.write_u16(54321);
        w.write_i32(-1);
        w.write_u32(0xDEADBEEF);

        let bytes = w.into_bytes();
        let mut r = MsgReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_i16().unwrap(), -12345);
        assert_eq!(r.read_u16().unwrap(), 54321);
        assert_eq!(r.read_i32().unwrap(), -1);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn string_round_trip() {
        let mut w = MsgWriter::new();
        w.write_string("connect \"\\name\\player\"");
        w.write_string("");

        let bytes = w.into_bytes();
        let mut r = MsgReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "connect \"\\name\\player\"");
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn truncated_reads_error() {
        let mut r = MsgReader::new(&[1, 2]);
        assert_eq!(r.read_i32(), Err(MsgError::UnexpectedEof));
    }

    #[test]
    fn unterminated_string_errors() {
        let mut r = MsgReader::new(b"no terminator here");
        assert_eq!(r.read_string(), Err(MsgError::OversizedString));
    }

    #[test]
    fn oversized_block_errors() {
        let mut r = MsgReader::new(&[0u8; 16]);
        assert_eq!(r.read_data(17).unwrap_err(), MsgError::BadBlockLength);
        assert_eq!(r.read_data(16).unwrap().len(), 16);
    }

    #[test]
    fn read_rest_consumes() {
        let mut r = MsgReader::new(&[1, 2, 3, 4]);
        r.read_u8().unwrap();
        assert_eq!(r.read_rest(), &[2, 3, 4]);
        assert_eq!(r.remaining(), 0);
    }
}
