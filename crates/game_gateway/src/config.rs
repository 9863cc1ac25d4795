//! Gateway configuration types and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::admission::DEFAULT_MIN_CAPACITY;
use crate::error::ServerError;
use crate::protocol::DEFAULT_TAG;

/// Certificate material for TLS termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM file holding the certificate chain
    pub cert_file: PathBuf,
    /// PEM file holding the private key
    pub key_file: PathBuf,
}

/// Configuration structure for the gateway.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the gateway to
    pub bind_address: SocketAddr,

    /// Hard maximum of concurrent connections
    pub max_connections: usize,

    /// Admission ceiling at startup; `None` starts at `max_connections`
    pub initial_capacity: Option<usize>,

    /// Floor the ceiling never shrinks below
    pub min_capacity: usize,

    /// Protocol tag expected in every frame header
    pub frame_tag: u32,

    /// Seconds a session may stay silent before it is closed; 0 disables
    pub connection_timeout: u64,

    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    pub use_reuse_port: bool,

    /// TLS termination; plaintext when `None`
    pub tls: Option<TlsSettings>,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.connection_timeout > 0).then(|| Duration::from_secs(self.connection_timeout))
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if let Some(initial) = self.initial_capacity {
            if initial > self.max_connections {
                return Err(ServerError::Config(format!(
                    "initial capacity {} exceeds max connections {}",
                    initial, self.max_connections
                )));
            }
        }
        if self.min_capacity > self.max_connections {
            return Err(ServerError::Config(format!(
                "min capacity {} exceeds max connections {}",
                self.min_capacity, self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            initial_capacity: None,
            min_capacity: DEFAULT_MIN_CAPACITY,
            frame_tag: DEFAULT_TAG,
            connection_timeout: 0,
            use_reuse_port: false,
            tls: None,
        }
    }
}
