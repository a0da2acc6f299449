use bytes::{Buf, BufMut, BytesMut};

use crate::config::{MAGIC_BYTES, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::error::{ProtocolError, Result};

/// Header length: magic(4) + version(1) + length(4)
pub const HEADER_SIZE: usize = 9;

/// One framed unit on the wire. The payload is a single encoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Packet carrying `payload` at the current protocol version.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    /// Parse a packet from a complete buffer.
    ///
    /// # Errors
    /// - `InvalidHeader` if the buffer is shorter than the header, the magic
    ///   bytes do not match, or the payload is shorter than advertised
    /// - `UnsupportedVersion` for any version other than [`PROTOCOL_VERSION`]
    /// - `OversizedPacket` if the advertised length exceeds [`MAX_PAYLOAD_SIZE`]
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let len = parse_header(buf)?;
        if buf.len() < HEADER_SIZE + len {
            return Err(ProtocolError::InvalidHeader);
        }
        Ok(Self {
            version: buf[4],
            payload: buf[HEADER_SIZE..HEADER_SIZE + len].to_vec(),
        })
    }

    /// Serialize header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE + self.payload.len());
        buf.put_slice(&MAGIC_BYTES);
        buf.put_u8(self.version);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }
}

/// Validate a header and return the advertised payload length.
pub(crate) fn parse_header(buf: &[u8]) -> Result<usize> {
    if buf.len() < HEADER_SIZE || buf[..4] != MAGIC_BYTES {
        return Err(ProtocolError::InvalidHeader);
    }
    let version = buf[4];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let len = (&buf[5..HEADER_SIZE]).get_u32() as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::OversizedPacket(len));
    }
    Ok(len)
}
