//! # Game Gateway - Network Edge of the Game Backend
//!
//! The gateway accepts WebSocket clients, limits how many may be connected at
//! once, turns each client's byte stream into discrete protocol frames and
//! hands every frame to a downstream dispatch subsystem together with the
//! identity of the connection that sent it.
//!
//! The gateway contains **no game logic**. What a command means, who an
//! identity is and how logouts are processed all belong to collaborators
//! plugged in through [`DispatchBridge`] and [`IdentityFactory`].
//!
//! ## Architecture Overview
//!
//! * **Admission** - [`AdmissionController`] enforces an adjustable ceiling
//!   on concurrent sessions, bounded by a hard maximum
//! * **Framing** - [`FrameReassembler`] restores frame boundaries from
//!   arbitrarily fragmented WebSocket messages
//! * **Sessions** - one Tokio task per connection runs handshake, admission,
//!   the read loop and a single close routine
//! * **Listener** - [`GatewayServer`] binds the endpoint, optionally
//!   TLS-terminated, and spawns sessions
//!
//! ### Message Flow
//!
//! 1. Client completes the WebSocket upgrade
//! 2. The session takes an admission slot or is closed immediately
//! 3. Inbound messages are appended to the session's reassembly buffer
//! 4. Every complete frame is submitted to the [`DispatchBridge`] in order
//! 5. On close the slot is returned and, unless shutting down, the logout
//!    is reported
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use game_gateway::{AccountFactory, ChannelDispatch, GatewayServer, ServerConfig};
//!
//! # async fn run() -> Result<(), game_gateway::ServerError> {
//! let (dispatch, mut events) = ChannelDispatch::new();
//! let server = GatewayServer::new(
//!     ServerConfig::default(),
//!     Arc::new(dispatch),
//!     Arc::new(AccountFactory),
//! )?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! server.start().await
//! # }
//! ```
//!
//! ## Fault Isolation
//!
//! A panic or error raised while dispatching a frame ends only the session
//! that produced the frame. Its admission slot is still returned exactly
//! once.

pub use admission::{AdmissionController, AdmissionPermit, ConnectionQuota};
pub use config::{ServerConfig, TlsSettings};
pub use connection::{
    CloseReason, ConnectionHandle, ConnectionId, ConnectionManager, SessionOutcome, SessionState,
};
pub use dispatch::{ChannelDispatch, DispatchBridge, DispatchEvent};
pub use error::{AdmissionError, DispatchError, ProtocolError, ServerError};
pub use identity::{Account, AccountFactory, Identity, IdentityFactory, IdentityHandle};
pub use protocol::{Frame, FrameHeader, FrameReassembler, DEFAULT_TAG, HEADER_SIZE};
pub use server::{GatewayListener, GatewayServer};
pub use shutdown::ShutdownFlag;

pub mod admission;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod server;
pub mod shutdown;
