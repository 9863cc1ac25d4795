//! Binary wire protocol spoken inside WebSocket messages.
//!
//! Every frame is an 8 byte big-endian header followed by its payload:
//!
//! ```text
//! +----------+----------+------------+------------------+
//! | tag: u32 | len: u16 | cmd_id: u16 | payload (len B) |
//! +----------+----------+------------+------------------+
//! ```
//!
//! Frames are not aligned to WebSocket messages. A message may carry part of
//! a frame or several frames; [`FrameReassembler`] restores the boundaries.

pub mod frame;
pub mod reassembler;

pub use frame::{Frame, FrameHeader, DEFAULT_TAG, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use reassembler::FrameReassembler;
