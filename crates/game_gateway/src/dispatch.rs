//! Hand-off to the downstream dispatch subsystem.
//!
//! The gateway calls [`DispatchBridge::submit`] once per reassembled frame, in
//! the order frames were extracted from a session's stream, and
//! [`DispatchBridge::notify_closed`] once when a session ends outside
//! shutdown. Both run on the session's own task; a panic or an `Err` from
//! `submit` ends that session only.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::DispatchError;
use crate::identity::IdentityHandle;

/// Receiver of reassembled commands and logout notifications.
pub trait DispatchBridge: Send + Sync {
    /// Hands one command to the downstream system.
    ///
    /// # Arguments
    ///
    /// * `identity` - The identity of the session the frame arrived on
    /// * `command_id` - Command identifier from the frame header
    /// * `payload` - Frame payload with the header stripped
    ///
    /// # Returns
    ///
    /// `Ok(())` if the command was accepted. An `Err` ends the session with
    /// [`CloseReason::Fault`](crate::connection::CloseReason::Fault) and no
    /// further frames from it are submitted.
    fn submit(
        &self,
        identity: &IdentityHandle,
        command_id: u16,
        payload: Bytes,
    ) -> Result<(), DispatchError>;

    /// Reports that a session has ended.
    ///
    /// Called at most once per session, after [`Identity::close`] and never
    /// while the gateway is shutting down.
    ///
    /// # Arguments
    ///
    /// * `identity` - The identity of the session that closed
    ///
    /// [`Identity::close`]: crate::identity::Identity::close
    fn notify_closed(&self, identity: IdentityHandle);
}

/// Message delivered to a downstream actor mailbox.
#[derive(Debug)]
pub enum DispatchEvent {
    Command {
        identity: IdentityHandle,
        command_id: u16,
        payload: Bytes,
    },
    SessionClosed {
        identity: IdentityHandle,
    },
}

/// Bridge that forwards everything into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatch {
    sender: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelDispatch {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DispatchBridge for ChannelDispatch {
    fn submit(
        &self,
        identity: &IdentityHandle,
        command_id: u16,
        payload: Bytes,
    ) -> Result<(), DispatchError> {
        self.sender
            .send(DispatchEvent::Command {
                identity: identity.clone(),
                command_id,
                payload,
            })
            .map_err(|_| DispatchError::Closed)
    }

    fn notify_closed(&self, identity: IdentityHandle) {
        let connection_id = identity.connection().id();
        if self
            .sender
            .send(DispatchEvent::SessionClosed { identity })
            .is_err()
        {
            warn!(
                "Dropped logout notification for connection {}: dispatch mailbox closed",
                connection_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::identity::{AccountFactory, IdentityFactory};
    use crate::protocol::DEFAULT_TAG;

    fn identity() -> IdentityHandle {
        let (handle, _rx) =
            ConnectionHandle::new(5, "127.0.0.1:1234".parse().unwrap(), DEFAULT_TAG);
        AccountFactory.new_identity(handle)
    }

    #[test]
    fn forwards_commands_and_logout() {
        let (bridge, mut rx) = ChannelDispatch::new();
        let identity = identity();

        bridge
            .submit(&identity, 100, Bytes::from_static(b"move"))
            .unwrap();
        bridge.notify_closed(identity);

        match rx.try_recv().unwrap() {
            DispatchEvent::Command {
                command_id,
                payload,
                ..
            } => {
                assert_eq!(command_id, 100);
                assert_eq!(&payload[..], b"move");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            DispatchEvent::SessionClosed { .. }
        ));
    }

    #[test]
    fn submit_fails_once_mailbox_is_gone() {
        let (bridge, rx) = ChannelDispatch::new();
        drop(rx);
        assert_eq!(
            bridge.submit(&identity(), 1, Bytes::new()),
            Err(DispatchError::Closed)
        );
        // Logout is best effort and must not panic.
        bridge.notify_closed(identity());
    }
}
