//! Streaming frame reassembly.
//!
//! Bytes arrive in arbitrary chunks. The reassembler appends them to a
//! single `BytesMut` and splits complete frames off the front, leaving any
//! trailing partial frame in place for the next chunk.
//!
//! A header carrying the wrong tag means the stream is out of sync. Nothing
//! after that point can be trusted, so the buffer is discarded and the
//! reassembler keeps reporting the violation on every call.

use bytes::{Buf, BytesMut};

use super::frame::{Frame, FrameHeader, DEFAULT_TAG, HEADER_SIZE};
use crate::error::ProtocolError;

const INITIAL_CAPACITY: usize = 4 * 1024;

pub struct FrameReassembler {
    buffer: BytesMut,
    tag: u32,
    desync: Option<ProtocolError>,
}

impl FrameReassembler {
    /// Reassembler expecting [`DEFAULT_TAG`].
    pub fn new() -> Self {
        Self::with_tag(DEFAULT_TAG)
    }

    pub fn with_tag(tag: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            tag,
            desync: None,
        }
    }

    /// Appends newly received bytes. Data pushed after a desync is dropped.
    pub fn extend(&mut self, data: &[u8]) {
        if self.desync.is_none() {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Splits the next complete frame off the buffer.
    ///
    /// - `Ok(Some(frame))` when a whole frame was buffered
    /// - `Ok(None)` when more bytes are needed
    /// - `Err(..)` when the stream is desynchronized
    ///
    /// Callers drain by looping until `Ok(None)`.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if let Some(err) = &self.desync {
            return Err(err.clone());
        }

        let Some(header) = FrameHeader::decode(&self.buffer) else {
            return Ok(None);
        };

        if header.tag != self.tag {
            let err = ProtocolError::TagMismatch {
                expected: self.tag,
                found: header.tag,
            };
            self.buffer.clear();
            self.desync = Some(err.clone());
            return Err(err);
        }

        if self.buffer.len() < header.frame_len() {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(header.length as usize).freeze();
        Ok(Some(Frame::new(header, payload)))
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desync.is_some()
    }

    pub fn expected_tag(&self) -> u32 {
        self.tag
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}
