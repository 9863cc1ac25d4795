//! Session identities.
//!
//! The identity layer is owned by the login/account subsystem. The gateway
//! only asks an [`IdentityFactory`] for a handle when a session becomes
//! active and passes that handle along with every dispatched command.
//!
//! [`Account`] and [`AccountFactory`] are the anonymous default used when no
//! account subsystem is plugged in.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::error::ServerError;

/// A participant bound to exactly one live session.
pub trait Identity: Send + Sync + fmt::Debug {
    /// The connection this identity speaks through.
    fn connection(&self) -> &ConnectionHandle;

    /// Called once when the session ends while the process is not shutting
    /// down, before the dispatch layer is told about the logout.
    fn close(&self) {}
}

pub type IdentityHandle = Arc<dyn Identity>;

/// Creates the identity for a freshly admitted connection.
pub trait IdentityFactory: Send + Sync {
    /// Builds the identity for a session that has just been admitted.
    ///
    /// # Arguments
    ///
    /// * `connection` - Outbound handle of the new session
    ///
    /// # Returns
    ///
    /// The handle passed to every [`DispatchBridge::submit`] call for this
    /// session.
    ///
    /// [`DispatchBridge::submit`]: crate::dispatch::DispatchBridge::submit
    fn new_identity(&self, connection: ConnectionHandle) -> IdentityHandle;
}

/// Anonymous account bound to a single connection.
#[derive(Debug)]
pub struct Account {
    account_id: Uuid,
    connection: ConnectionHandle,
    closed: AtomicBool,
}

impl Account {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            connection,
            closed: AtomicBool::new(false),
        }
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    /// Sends pre-encoded bytes to the peer.
    pub fn reply(&self, data: impl Into<Bytes>) -> Result<(), ServerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServerError::ConnectionClosed(self.connection.id()));
        }
        self.connection.send_raw(data)
    }

    /// Encodes and sends one frame to the peer.
    pub fn reply_frame(&self, command_id: u16, payload: impl Into<Bytes>) -> Result<(), ServerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServerError::ConnectionClosed(self.connection.id()));
        }
        self.connection.send_frame(command_id, payload)
    }
}

impl Identity for Account {
    fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.connection.close();
        }
    }
}

/// Hands out a new [`Account`] per connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccountFactory;

impl IdentityFactory for AccountFactory {
    fn new_identity(&self, connection: ConnectionHandle) -> IdentityHandle {
        Arc::new(Account::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::Outbound;
    use crate::protocol::DEFAULT_TAG;

    #[test]
    fn account_replies_until_closed() {
        let (handle, mut rx) =
            ConnectionHandle::new(3, "127.0.0.1:9000".parse().unwrap(), DEFAULT_TAG);
        let account = Account::new(handle);
        assert!(!account.connection().is_closed());

        account.reply_frame(1, &b"welcome"[..]).unwrap();
        assert!(rx.try_recv().is_ok());

        account.close();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        account.close();
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            account.reply(&b"late"[..]),
            Err(ServerError::ConnectionClosed(3))
        ));
    }

    #[test]
    fn factory_binds_identity_to_connection() {
        let (handle, _rx) =
            ConnectionHandle::new(11, "127.0.0.1:9000".parse().unwrap(), DEFAULT_TAG);
        let identity = AccountFactory.new_identity(handle);
        assert_eq!(identity.connection().id(), 11);
    }

    #[test]
    fn accounts_get_distinct_ids() {
        let addr = "127.0.0.1:9000".parse().unwrap();
        let (a, _ra) = ConnectionHandle::new(1, addr, DEFAULT_TAG);
        let (b, _rb) = ConnectionHandle::new(2, addr, DEFAULT_TAG);
        assert_ne!(Account::new(a).account_id(), Account::new(b).account_id());
    }
}
