//! Outbound side of a connection.
//!
//! A [`ConnectionHandle`] is what collaborators keep to talk back to a peer.
//! Sends are queued on an unbounded channel and written by the session's
//! writer task, so callers never wait on the socket.

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::mpsc;

use super::ConnectionId;
use crate::error::ServerError;
use crate::protocol::Frame;

/// Items consumed by a session's writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Data(Bytes),
    Close,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    tag: u32,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        tag: u32,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id,
                remote_addr,
                tag,
                outbound,
            },
            receiver,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queues pre-encoded bytes as one binary WebSocket message.
    pub fn send_raw(&self, data: impl Into<Bytes>) -> Result<(), ServerError> {
        self.outbound
            .send(Outbound::Data(data.into()))
            .map_err(|_| ServerError::ConnectionClosed(self.id))
    }

    /// Encodes a frame with this connection's protocol tag and queues it.
    pub fn send_frame(&self, command_id: u16, payload: impl Into<Bytes>) -> Result<(), ServerError> {
        let frame = Frame::build(self.tag, command_id, payload).ok_or_else(|| {
            ServerError::Internal(format!(
                "payload for command {} exceeds the frame length limit",
                command_id
            ))
        })?;
        self.send_raw(frame.encode())
    }

    /// Asks the writer to close the transport. The read loop then ends when
    /// the peer acknowledges or the stream errors.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// `true` once the session's writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameHeader, DEFAULT_TAG, HEADER_SIZE};

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn send_frame_encodes_with_tag() {
        let (handle, mut rx) = ConnectionHandle::new(1, addr(), DEFAULT_TAG);
        handle.send_frame(12, &b"abc"[..]).unwrap();

        match rx.try_recv().unwrap() {
            Outbound::Data(bytes) => {
                let header = FrameHeader::decode(&bytes).unwrap();
                assert_eq!(header.tag, DEFAULT_TAG);
                assert_eq!(header.command_id, 12);
                assert_eq!(&bytes[HEADER_SIZE..], b"abc");
            }
            other => panic!("unexpected outbound item: {:?}", other),
        }
    }

    #[test]
    fn send_after_writer_gone_fails() {
        let (handle, rx) = ConnectionHandle::new(9, addr(), DEFAULT_TAG);
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send_raw(vec![1, 2, 3]),
            Err(ServerError::ConnectionClosed(9))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let (handle, _rx) = ConnectionHandle::new(1, addr(), DEFAULT_TAG);
        assert!(matches!(
            handle.send_frame(1, vec![0u8; 70_000]),
            Err(ServerError::Internal(_))
        ));
    }

    #[test]
    fn close_queues_close_request() {
        let (handle, mut rx) = ConnectionHandle::new(1, addr(), DEFAULT_TAG);
        handle.close();
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close));
    }
}
