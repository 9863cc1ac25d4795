//! Frame and header types.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Protocol magic expected in every header.
pub const DEFAULT_TAG: u32 = 0xBEEF;

/// Largest payload the 16 bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: u32,
    pub length: u16,
    pub command_id: u16,
}

impl FrameHeader {
    pub fn new(tag: u32, length: u16, command_id: u16) -> Self {
        Self {
            tag,
            length,
            command_id,
        }
    }

    /// Reads a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Returns `None` if `buf` is shorter than a header.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            tag: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            command_id: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.tag.to_be_bytes());
        out[4..6].copy_from_slice(&self.length.to_be_bytes());
        out[6..8].copy_from_slice(&self.command_id.to_be_bytes());
        out
    }

    /// Total size of the frame this header announces.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        debug_assert_eq!(header.length as usize, payload.len());
        Self { header, payload }
    }

    /// Builds an outbound frame. Returns `None` if the payload does not fit
    /// the 16 bit length field.
    pub fn build(tag: u32, command_id: u16, payload: impl Into<Bytes>) -> Option<Self> {
        let payload = payload.into();
        let length = u16::try_from(payload.len()).ok()?;
        Some(Self::new(FrameHeader::new(tag, length, command_id), payload))
    }

    pub fn tag(&self) -> u32 {
        self.header.tag
    }

    pub fn command_id(&self) -> u16 {
        self.header.command_id
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serializes header and payload into one buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
