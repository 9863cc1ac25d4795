//! Per-connection session lifecycle.
//!
//! ```text
//! Connecting --handshake ok--> Admitting --slot--> Active --> Closing --> Closed
//!     |                            |
//!     +--handshake failed--> Closed +--no slot--> Rejected
//! ```
//!
//! Every exit from the read loop, including a panic inside a collaborator,
//! goes through [`ConnectionSession::close`]. That is the only place the
//! admission slot is returned and the logout notification is sent.

use bytes::Bytes;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use super::handle::Outbound;
use super::{ConnectionHandle, ConnectionId, ConnectionManager};
use crate::admission::{AdmissionController, AdmissionPermit};
use crate::dispatch::DispatchBridge;
use crate::error::{ProtocolError, ServerError};
use crate::identity::{IdentityFactory, IdentityHandle};
use crate::protocol::FrameReassembler;
use crate::shutdown::ShutdownFlag;

/// How long closing waits for queued outbound data to be flushed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared services every session needs.
pub struct SessionContext {
    pub admission: Arc<AdmissionController>,
    pub connections: Arc<ConnectionManager>,
    pub dispatch: Arc<dyn DispatchBridge>,
    pub identities: Arc<dyn IdentityFactory>,
    pub shutdown: ShutdownFlag,
    pub frame_tag: u32,
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Admitting,
    Active,
    Closing,
    Closed,
    Rejected,
}

impl SessionState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Admitting)
                | (Connecting, Closed)
                | (Admitting, Active)
                | (Admitting, Rejected)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// `Closed` and `Rejected` have no successors.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Rejected)
    }
}

fn advance(state: &mut SessionState, next: SessionState, remote_addr: SocketAddr) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal session transition {:?} -> {:?}",
        state,
        next
    );
    debug!("Connection from {}: {:?} -> {:?}", remote_addr, state, next);
    *state = next;
}

/// Why a session's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Reading from the transport failed
    Transport(String),
    /// A header carried the wrong tag
    ProtocolDesync(ProtocolError),
    /// The shutdown flag was observed
    Shutdown,
    /// No message arrived within the configured idle timeout
    IdleTimeout,
    /// Dispatch failed or panicked while handling a frame
    Fault(String),
}

/// Result of driving one inbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Handshake succeeded but the admission ceiling was reached
    Rejected,
    /// The session ran and closed
    Closed(CloseReason),
}

impl SessionOutcome {
    /// The state the connection ended in.
    pub fn final_state(&self) -> SessionState {
        match self {
            SessionOutcome::Rejected => SessionState::Rejected,
            SessionOutcome::Closed(_) => SessionState::Closed,
        }
    }
}

/// Drives one raw connection through handshake, admission and its session.
///
/// The connection moves through [`SessionState`] in order; the outcome's
/// [`final_state`](SessionOutcome::final_state) is where it stopped.
///
/// # Arguments
///
/// * `stream` - The accepted transport, plain TCP or TLS
/// * `remote_addr` - Peer address, used for logging and the handle
/// * `ctx` - Shared admission, registry, dispatch and shutdown services
///
/// # Returns
///
/// `Ok(SessionOutcome::Rejected)` when the ceiling was reached and
/// `Ok(SessionOutcome::Closed(reason))` once an admitted session has been
/// cleaned up. `Err(ServerError::Handshake)` is returned only for a failed
/// WebSocket upgrade, where nothing was allocated and nothing needs
/// releasing.
pub async fn handle_connection<S>(
    stream: S,
    remote_addr: SocketAddr,
    ctx: Arc<SessionContext>,
) -> Result<SessionOutcome, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut state = SessionState::Connecting;
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            advance(&mut state, SessionState::Closed, remote_addr);
            error!("WebSocket handshake failed for {}: {}", remote_addr, e);
            return Err(ServerError::Handshake(format!("{}: {}", remote_addr, e)));
        }
    };

    advance(&mut state, SessionState::Admitting, remote_addr);
    let Some(permit) = ctx.admission.try_acquire() else {
        advance(&mut state, SessionState::Rejected, remote_addr);
        let quota = ctx.admission.snapshot();
        info!(
            "🚫 Rejected {}: admission ceiling reached ({}/{})",
            remote_addr, quota.current, quota.real_max
        );
        let _ = ws.close(None).await;
        return Ok(SessionOutcome::Rejected);
    };

    advance(&mut state, SessionState::Active, remote_addr);
    let (sink, stream) = ws.split();
    let (mut session, outbound) = ConnectionSession::activate(remote_addr, permit, ctx);
    let writer = tokio::spawn(write_outbound(sink, outbound, session.id()));
    session.attach_writer(writer);

    Ok(SessionOutcome::Closed(session.run(stream).await))
}

/// Forwards queued outbound data to the WebSocket until asked to close or
/// the sink fails.
async fn write_outbound<W>(
    mut sink: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    connection_id: ConnectionId,
) where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Data(data) => {
                if let Err(e) = sink.send(Message::Binary(data)).await {
                    debug!("Write to connection {} failed: {}", connection_id, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    outbound.close();
    let _ = sink.close().await;
}

/// Live state of one admitted connection.
pub struct ConnectionSession {
    id: ConnectionId,
    remote_addr: SocketAddr,
    handle: ConnectionHandle,
    identity: IdentityHandle,
    reassembler: FrameReassembler,
    permit: Option<AdmissionPermit>,
    writer: Option<JoinHandle<()>>,
    state: SessionState,
    ctx: Arc<SessionContext>,
}

impl ConnectionSession {
    /// Builds the session for an admitted connection: allocates its id,
    /// obtains its identity and registers its handle.
    ///
    /// The returned receiver carries everything queued on the handle and
    /// must be drained by a writer.
    pub(crate) fn activate(
        remote_addr: SocketAddr,
        permit: AdmissionPermit,
        ctx: Arc<SessionContext>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let id = ctx.connections.allocate_id();
        let (handle, outbound) = ConnectionHandle::new(id, remote_addr, ctx.frame_tag);
        let identity = ctx.identities.new_identity(handle.clone());
        ctx.connections.register(handle.clone());
        info!("🔗 Connection {} established from {}", id, remote_addr);

        let session = Self {
            id,
            remote_addr,
            handle,
            identity,
            reassembler: FrameReassembler::with_tag(ctx.frame_tag),
            permit: Some(permit),
            writer: None,
            state: SessionState::Active,
            ctx,
        };
        (session, outbound)
    }

    pub(crate) fn attach_writer(&mut self, writer: JoinHandle<()>) {
        self.writer = Some(writer);
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the read loop to completion, then closes the session.
    pub async fn run<R>(mut self, mut reader: R) -> CloseReason
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let reason = match AssertUnwindSafe(self.read_loop(&mut reader))
            .catch_unwind()
            .await
        {
            Ok(reason) => reason,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    "💥 Connection {} from {} panicked: {}",
                    self.id, self.remote_addr, message
                );
                CloseReason::Fault(message)
            }
        };
        drop(reader);
        self.close(&reason).await;
        reason
    }

    async fn read_loop<R>(&mut self, reader: &mut R) -> CloseReason
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            let next = match self.ctx.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, reader.next()).await {
                    Ok(next) => next,
                    Err(_) => return CloseReason::IdleTimeout,
                },
                None => reader.next().await,
            };

            if self.ctx.shutdown.is_shutting_down() {
                return CloseReason::Shutdown;
            }

            match next {
                None | Some(Ok(Message::Close(_))) => return CloseReason::PeerClosed,
                Some(Err(e)) => return CloseReason::Transport(e.to_string()),
                Some(Ok(Message::Binary(data))) => self.reassembler.extend(&data),
                Some(Ok(Message::Text(text))) => self.reassembler.extend(text.as_bytes()),
                // Ping/pong are answered by the transport.
                Some(Ok(_)) => continue,
            }

            if let Some(reason) = self.drain_frames() {
                return reason;
            }
        }
    }

    /// Dispatches every complete frame currently buffered, in order.
    fn drain_frames(&mut self) -> Option<CloseReason> {
        loop {
            let frame = match self.reassembler.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => {
                    warn!(
                        "Connection {} from {} desynchronized: {}",
                        self.id, self.remote_addr, e
                    );
                    return Some(CloseReason::ProtocolDesync(e));
                }
            };

            if self.ctx.shutdown.is_shutting_down() {
                return Some(CloseReason::Shutdown);
            }

            let command_id = frame.command_id();
            debug!(
                "Connection {} frame: tag({:#x}) length({}) command({})",
                self.id,
                frame.tag(),
                frame.len(),
                command_id
            );
            if let Err(e) = self.dispatch(command_id, frame.payload) {
                error!(
                    "💥 Dispatch of command {} from connection {} ({}) failed: {}",
                    command_id, self.id, self.remote_addr, e
                );
                return Some(CloseReason::Fault(e.to_string()));
            }
        }
    }

    fn dispatch(&self, command_id: u16, payload: Bytes) -> Result<(), crate::error::DispatchError> {
        self.ctx.dispatch.submit(&self.identity, command_id, payload)
    }

    /// Closing: return the slot, notify the dispatch layer unless shutting
    /// down, then drop local resources.
    async fn close(&mut self, reason: &CloseReason) {
        advance(&mut self.state, SessionState::Closing, self.remote_addr);
        match reason {
            CloseReason::PeerClosed | CloseReason::Shutdown => {
                info!("👋 Connection {} from {} closed: {:?}", self.id, self.remote_addr, reason)
            }
            _ => warn!("Connection {} from {} closed: {:?}", self.id, self.remote_addr, reason),
        }

        if let Some(permit) = self.permit.take() {
            permit.release();
        }

        if !self.ctx.shutdown.is_shutting_down() {
            let identity = self.identity.clone();
            let dispatch = self.ctx.dispatch.clone();
            let notified = std::panic::catch_unwind(AssertUnwindSafe(move || {
                identity.close();
                dispatch.notify_closed(identity);
            }));
            if let Err(panic) = notified {
                error!(
                    "💥 Logout notification for connection {} panicked: {}",
                    self.id,
                    panic_message(&*panic)
                );
            }
        }

        self.ctx.connections.unregister(self.id);
        self.handle.close();
        self.reassembler = FrameReassembler::with_tag(self.ctx.frame_tag);
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
                .await
                .is_err()
            {
                debug!("Writer for connection {} did not finish, aborting", self.id);
                writer.abort();
            }
        }
        advance(&mut self.state, SessionState::Closed, self.remote_addr);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
