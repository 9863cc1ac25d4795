//! Core gateway server implementation.
//!
//! `GatewayServer` is the composition root: it owns the configuration, the
//! admission controller, the connection registry and the shutdown flag, and
//! wires them together with the collaborator-supplied dispatch bridge and
//! identity factory.

use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use super::listener::GatewayListener;
use super::tls::load_tls_acceptor;
use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, SessionContext};
use crate::dispatch::DispatchBridge;
use crate::error::ServerError;
use crate::identity::IdentityFactory;
use crate::shutdown::ShutdownFlag;

/// The network edge of the game backend.
///
/// # Lifecycle
///
/// 1. [`GatewayServer::new`] validates the configuration and loads TLS
///    material if configured.
/// 2. [`GatewayServer::bind`] opens the listening sockets.
/// 3. [`GatewayListener::run`] (or [`GatewayServer::start`], which does both)
///    accepts until [`GatewayServer::shutdown`] is called.
pub struct GatewayServer {
    config: ServerConfig,
    context: Arc<SessionContext>,
    tls: Option<TlsAcceptor>,
}

impl GatewayServer {
    /// Creates a new gateway server.
    ///
    /// Validates the configuration, loads TLS material when `config.tls` is
    /// set and builds the admission controller with its ceiling at
    /// `initial_capacity` (or `max_connections` when unset). Nothing is bound
    /// until [`bind`](Self::bind) or [`start`](Self::start).
    ///
    /// # Arguments
    ///
    /// * `config` - Listener, admission and TLS settings
    /// * `dispatch` - Receiver of every reassembled frame and logout
    /// * `identities` - Builds the identity of each admitted session
    ///
    /// # Returns
    ///
    /// The server, or `ServerError::Config` for an invalid configuration and
    /// `ServerError::Tls` when the certificate or key cannot be loaded.
    pub fn new(
        config: ServerConfig,
        dispatch: Arc<dyn DispatchBridge>,
        identities: Arc<dyn IdentityFactory>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let tls = config.tls.as_ref().map(load_tls_acceptor).transpose()?;

        let admission = Arc::new(AdmissionController::with_capacity(
            config.max_connections,
            config.initial_capacity.unwrap_or(config.max_connections),
            config.min_capacity,
        ));
        let context = Arc::new(SessionContext {
            admission,
            connections: Arc::new(ConnectionManager::new()),
            dispatch,
            identities,
            shutdown: ShutdownFlag::new(),
            frame_tag: config.frame_tag,
            idle_timeout: config.idle_timeout(),
        });

        Ok(Self {
            config,
            context,
            tls,
        })
    }

    /// Shared admission controller; a load monitor may adjust its ceilings
    /// while the server runs.
    pub fn admission(&self) -> Arc<AdmissionController> {
        self.context.admission.clone()
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.context.connections.clone()
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.context.shutdown.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Opens the listening sockets without accepting yet.
    ///
    /// With `use_reuse_port` one socket per CPU core is bound to the same
    /// port; otherwise a single socket is used.
    ///
    /// # Returns
    ///
    /// A [`GatewayListener`] whose [`run`](GatewayListener::run) drives the
    /// accept loops, or `ServerError::Network` if binding failed.
    pub fn bind(&self) -> Result<GatewayListener, ServerError> {
        GatewayListener::bind(&self.config, self.tls.clone(), self.context.clone())
    }

    /// Binds and accepts connections until shutdown.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the accept loops have stopped after
    /// [`shutdown`](Self::shutdown), or the bind error.
    pub async fn start(&self) -> Result<(), ServerError> {
        let quota = self.context.admission.snapshot();
        info!(
            "🚀 Starting gateway on {} (ceiling {}/{}, tls: {})",
            self.config.bind_address,
            quota.real_max,
            quota.max,
            if self.tls.is_some() { "on" } else { "off" }
        );
        let listener = self.bind()?;
        listener.run().await?;
        info!("Gateway stopped");
        Ok(())
    }

    /// Sets the process-wide shutdown flag. Accept loops stop; sessions end
    /// on their next read without sending logout notifications.
    pub fn shutdown(&self) {
        self.context.shutdown.trigger();
    }
}
