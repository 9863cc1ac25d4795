//! Gateway binary: loads configuration, sets up logging and runs the
//! connection gateway until a termination signal arrives.

mod cli;
mod config;
mod signals;

use anyhow::anyhow;
use game_gateway::{
    AccountFactory, AdmissionController, ChannelDispatch, ConnectionManager, DispatchEvent,
    GatewayServer, ServerError,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinError;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use signals::wait_for_shutdown_signal;

/// Interval of the admission statistics log line.
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// How long shutdown waits for the accept loops to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Initialize logging system
fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
            .map_err(|e| anyhow!("logging init failed: {e}"))?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
            .map_err(|e| anyhow!("logging init failed: {e}"))?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

pub struct Application {
    config: AppConfig,
    server: Arc<GatewayServer>,
    events: UnboundedReceiver<DispatchEvent>,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(max_connections) = args.max_connections {
            config.server.max_connections = max_connections;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        setup_logging(&config.logging)?;

        let (dispatch, events) = ChannelDispatch::new();
        let server = GatewayServer::new(
            config.to_server_config()?,
            Arc::new(dispatch),
            Arc::new(AccountFactory),
        )?;

        info!(
            "🚀 Game Gateway v{} | Config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self {
            config,
            server: Arc::new(server),
            events,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            server,
            events,
        } = self;

        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", config.server.bind_address);
        info!("  👥 Max connections: {}", config.server.max_connections);
        info!(
            "  🎚️ Initial ceiling: {}",
            config
                .server
                .initial_capacity
                .unwrap_or(config.server.max_connections)
        );
        info!("  🏷️ Frame tag: {:#x}", config.server.frame_tag);
        info!("  ⏱️ Idle timeout: {}s", config.server.connection_timeout);
        info!(
            "  🔒 TLS: {}",
            if config.tls.is_some() { "enabled" } else { "disabled" }
        );

        let dispatch_handle = tokio::spawn(pump_dispatch_events(events));
        let monitoring_handle =
            tokio::spawn(monitor_admission(server.admission(), server.connections()));

        let mut server_handle = {
            let server = server.clone();
            tokio::spawn(async move { server.start().await })
        };

        info!("✅ Gateway is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // The server task only finishes on its own if startup failed.
        let stopped_early = tokio::select! {
            signal = wait_for_shutdown_signal() => {
                signal?;
                None
            }
            joined = &mut server_handle => Some(joined),
        };

        let result = match stopped_early {
            Some(joined) => flatten_server_result(joined),
            None => {
                info!("🛑 Shutdown signal received, initiating graceful shutdown...");
                server.shutdown();
                match timeout(SHUTDOWN_GRACE, server_handle).await {
                    Ok(joined) => flatten_server_result(joined),
                    Err(_) => {
                        warn!("⏳ Accept loops did not stop within {:?}", SHUTDOWN_GRACE);
                        Ok(())
                    }
                }
            }
        };

        monitoring_handle.abort();
        dispatch_handle.abort();

        let quota = server.admission().snapshot();
        info!(
            "📊 Final state: {} session(s) open, ceiling {}/{}",
            quota.current, quota.real_max, quota.max
        );
        info!("👋 Gateway shutdown complete");
        result
    }
}

fn flatten_server_result(
    joined: Result<Result<(), ServerError>, JoinError>,
) -> anyhow::Result<()> {
    match joined {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(anyhow!("server task failed: {e}")),
    }
}

/// Stand-in for the downstream dispatch subsystem: logs every event.
async fn pump_dispatch_events(mut events: UnboundedReceiver<DispatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::Command {
                identity,
                command_id,
                payload,
            } => debug!(
                "📨 Command {} from connection {} ({} bytes)",
                command_id,
                identity.connection().id(),
                payload.len()
            ),
            DispatchEvent::SessionClosed { identity } => info!(
                "👋 Connection {} from {} logged out",
                identity.connection().id(),
                identity.connection().remote_addr()
            ),
        }
    }
}

async fn monitor_admission(admission: Arc<AdmissionController>, connections: Arc<ConnectionManager>) {
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let quota = admission.snapshot();
        info!(
            "📊 Gateway Health - {} session(s) | ceiling {}/{} (floor {}) | {} registered",
            quota.current,
            quota.real_max,
            quota.max,
            admission.min_capacity(),
            connections.connection_count()
        );
        if quota.real_max > 0 && quota.current * 10 >= quota.real_max * 9 {
            warn!(
                "🔥 Admission ceiling nearly reached ({}/{})",
                quota.current, quota.real_max
            );
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
