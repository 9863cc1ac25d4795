//! Error types for the gateway.
//!
//! [`ServerError`] covers the server surface (binding, handshakes, TLS,
//! outbound sends). The narrower enums describe failures that end a single
//! session and never escape its task.

use thiserror::Error;

/// Errors raised by the gateway server and its connection handles.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Network-related error (socket creation, bind, accept)
    #[error("Network error: {0}")]
    Network(String),
    /// WebSocket upgrade or TLS handshake failed for a single connection
    #[error("Handshake error: {0}")]
    Handshake(String),
    /// Certificate or key material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
    /// The connection is gone; its outbound queue no longer accepts data
    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),
    /// Internal server error (invalid state)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The inbound byte stream can no longer be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame tag mismatch: expected {expected:#x}, found {found:#x}")]
    TagMismatch { expected: u32, found: u32 },
}

/// Failure reported by the downstream dispatch subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The downstream mailbox no longer accepts messages
    #[error("dispatch target is closed")]
    Closed,
    /// The collaborator rejected the command
    #[error("dispatch rejected command {command_id}: {reason}")]
    Rejected { command_id: u16, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission slot released more times than it was acquired")]
    ReleaseWithoutAdmit,
}
