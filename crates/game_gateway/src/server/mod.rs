//! Server orchestration: the [`GatewayServer`] composition root, its TCP
//! listeners and TLS termination.

pub mod core;
pub mod listener;
pub mod tls;

pub use self::core::GatewayServer;
pub use listener::GatewayListener;
pub use tls::load_tls_acceptor;
