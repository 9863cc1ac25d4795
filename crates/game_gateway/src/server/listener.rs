//! TCP listeners and accept loops.

use futures::stream::{FuturesUnordered, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{handle_connection, SessionContext, SessionOutcome};
use crate::error::ServerError;

/// Pause after a failed `accept` so a persistent error (fd exhaustion) does
/// not spin the acceptor.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound listening sockets, ready to accept.
pub struct GatewayListener {
    listeners: Vec<TcpListener>,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    context: Arc<SessionContext>,
}

impl GatewayListener {
    /// Binds the configured address.
    ///
    /// With `use_reuse_port` one socket per CPU core is bound to the same
    /// address so the kernel balances accepts across acceptor tasks.
    pub fn bind(
        config: &ServerConfig,
        tls: Option<TlsAcceptor>,
        context: Arc<SessionContext>,
    ) -> Result<Self, ServerError> {
        let core_count = num_cpus::get();
        let num_acceptors = if config.use_reuse_port { core_count } else { 1 };
        info!(
            "🧠 Detected {} CPU cores, using {} acceptor(s)",
            core_count, num_acceptors
        );

        let mut listeners = Vec::with_capacity(num_acceptors);
        let mut address = config.bind_address;
        for i in 0..num_acceptors {
            let listener = bind_socket(address, config.use_reuse_port)?;
            // Later acceptors must share the port the first one got, which
            // matters when binding port 0.
            if i == 0 {
                address = listener
                    .local_addr()
                    .map_err(|e| ServerError::Network(format!("local_addr failed: {e}")))?;
            }
            info!("✅ Listener {} bound on {}", i, address);
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            local_addr: address,
            tls,
            context,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the shutdown flag is set.
    ///
    /// Sessions already running are not interrupted; they observe the flag
    /// on their next read.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = self.context.shutdown.clone();
        let mut accept_futures = self
            .listeners
            .into_iter()
            .map(|listener| accept_loop(listener, self.tls.clone(), self.context.clone()))
            .collect::<FuturesUnordered<_>>();

        tokio::select! {
            _ = accept_futures.next() => {}
            _ = shutdown.wait() => {
                info!("Shutdown signal received, no longer accepting connections");
            }
        }
        Ok(())
    }
}

fn bind_socket(address: SocketAddr, reuse_port: bool) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    if reuse_port {
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        match socket.set_reuse_port(true) {
            Ok(()) => debug!("SO_REUSEPORT enabled for load balancing across acceptors"),
            Err(e) => warn!("Failed to set SO_REUSEPORT: {}", e),
        }
        #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
        warn!("SO_REUSEPORT is not supported on this platform. Using SO_REUSEADDR only.");
    }

    socket
        .bind(&address.into())
        .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
    socket
        .listen(65535)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("set_nonblocking failed: {e}")))?;
    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    context: Arc<SessionContext>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if context.shutdown.is_shutting_down() {
                    break;
                }
                stream.set_nodelay(true).ok();
                let tls = tls.clone();
                let context = context.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => serve(tls_stream, addr, context).await,
                            Err(e) => error!("TLS handshake failed for {}: {}", addr, e),
                        },
                        None => serve(stream, addr, context).await,
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve<S>(stream: S, addr: SocketAddr, context: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match handle_connection(stream, addr, context).await {
        Ok(SessionOutcome::Rejected) => debug!("Connection from {} rejected", addr),
        Ok(SessionOutcome::Closed(reason)) => {
            debug!("Session for {} finished: {:?}", addr, reason)
        }
        // Already logged where the handshake failed.
        Err(_) => {}
    }
}
