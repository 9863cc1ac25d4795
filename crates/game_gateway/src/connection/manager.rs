//! Registry of live connections.
//!
//! Sessions register their [`ConnectionHandle`] once active and remove it
//! during close. Downstream code uses the registry to reach a peer by id or
//! to broadcast.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{ConnectionHandle, ConnectionId};
use crate::error::ServerError;

pub struct ConnectionManager {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out a fresh connection id. Ids are never reused.
    pub fn allocate_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, handle: ConnectionHandle) {
        debug!("Registering connection {}", handle.id());
        self.connections.insert(handle.id(), handle);
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Queues raw bytes for one connection.
    pub fn send_to_connection(
        &self,
        id: ConnectionId,
        data: impl Into<Bytes>,
    ) -> Result<(), ServerError> {
        let handle = self.get(id).ok_or(ServerError::ConnectionClosed(id))?;
        handle.send_raw(data)
    }

    /// Queues the same bytes for every live connection. Returns how many
    /// connections accepted the message.
    pub fn broadcast(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        self.connections
            .iter()
            .filter(|entry| entry.value().send_raw(data.clone()).is_ok())
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::Outbound;
    use crate::protocol::DEFAULT_TAG;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "10.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn ids_are_unique() {
        let manager = ConnectionManager::new();
        let a = manager.allocate_id();
        let b = manager.allocate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn register_lookup_unregister() {
        let manager = ConnectionManager::new();
        let (handle, _rx) = ConnectionHandle::new(manager.allocate_id(), addr(), DEFAULT_TAG);
        let id = handle.id();

        manager.register(handle);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.get(id).map(|h| h.remote_addr()), Some(addr()));

        assert!(manager.unregister(id).is_some());
        assert_eq!(manager.connection_count(), 0);
        assert!(manager.get(id).is_none());
    }

    #[test]
    fn send_to_unknown_connection_fails() {
        let manager = ConnectionManager::new();
        assert!(matches!(
            manager.send_to_connection(42, vec![0u8]),
            Err(ServerError::ConnectionClosed(42))
        ));
    }

    #[test]
    fn broadcast_skips_closed_connections() {
        let manager = ConnectionManager::new();
        let (open, mut open_rx) = ConnectionHandle::new(manager.allocate_id(), addr(), DEFAULT_TAG);
        let (closed, closed_rx) = ConnectionHandle::new(manager.allocate_id(), addr(), DEFAULT_TAG);
        drop(closed_rx);
        manager.register(open);
        manager.register(closed);

        assert_eq!(manager.broadcast(&b"hi"[..]), 1);
        match open_rx.try_recv().unwrap() {
            Outbound::Data(bytes) => assert_eq!(&bytes[..], b"hi"),
            other => panic!("unexpected outbound item: {:?}", other),
        }
    }
}
