//! Connection handling: outbound handles, the live-connection registry and
//! the per-connection session lifecycle.

pub mod handle;
pub mod manager;
pub mod session;

/// Process-unique identifier assigned to a connection once it is admitted.
pub type ConnectionId = u64;

pub use handle::ConnectionHandle;
pub use manager::ConnectionManager;
pub use session::{
    handle_connection, CloseReason, ConnectionSession, SessionContext, SessionOutcome,
    SessionState,
};
