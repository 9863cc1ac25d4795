//! Configuration file handling for the gateway binary.
//!
//! Loads the TOML configuration, validates it and converts it into the
//! library's [`ServerConfig`].

use anyhow::Context;
use game_gateway::{ServerConfig, TlsSettings, DEFAULT_TAG};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and admission settings
    pub server: ServerSettings,
    /// TLS termination; the listener is plaintext when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the gateway to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Hard maximum of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Admission ceiling at startup; defaults to `max_connections`
    #[serde(default)]
    pub initial_capacity: Option<usize>,
    /// Floor the adaptive ceiling never shrinks below
    #[serde(default = "default_min_capacity")]
    pub min_capacity: usize,
    /// Protocol tag expected in every frame header
    #[serde(default = "default_frame_tag")]
    pub frame_tag: u32,
    /// Idle timeout in seconds (0 disables)
    #[serde(default)]
    pub connection_timeout: u64,
    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    #[serde(default)]
    pub use_reuse_port: bool,
}

fn default_max_connections() -> usize {
    1000
}

fn default_min_capacity() -> usize {
    5
}

fn default_frame_tag() -> u32 {
    DEFAULT_TAG
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_file: String,
    /// PEM private key
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
                initial_capacity: None,
                min_capacity: default_min_capacity(),
                frame_tag: DEFAULT_TAG,
                connection_timeout: 0,
                use_reuse_port: false,
            },
            tls: None,
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self
                .server
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address {}", self.server.bind_address))?,
            max_connections: self.server.max_connections,
            initial_capacity: self.server.initial_capacity,
            min_capacity: self.server.min_capacity,
            frame_tag: self.server.frame_tag,
            connection_timeout: self.server.connection_timeout,
            use_reuse_port: self.server.use_reuse_port,
            tls: self.tls.as_ref().map(|tls| TlsSettings {
                cert_file: PathBuf::from(&tls.cert_file),
                key_file: PathBuf::from(&tls.key_file),
            }),
        })
    }

    /// Checks addresses, capacities, TLS paths and the log level.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if let Some(initial) = self.server.initial_capacity {
            if initial > self.server.max_connections {
                return Err(format!(
                    "initial_capacity ({initial}) cannot exceed max_connections ({})",
                    self.server.max_connections
                ));
            }
        }
        if self.server.min_capacity > self.server.max_connections {
            return Err(format!(
                "min_capacity ({}) cannot exceed max_connections ({})",
                self.server.min_capacity, self.server.max_connections
            ));
        }

        if let Some(tls) = &self.tls {
            if tls.cert_file.is_empty() || tls.key_file.is_empty() {
                return Err("TLS requires both cert_file and key_file".to_string());
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.min_capacity, 5);
        assert_eq!(config.server.frame_tag, 0xBEEF);
        assert_eq!(config.server.connection_timeout, 0);
        assert!(!config.server.use_reuse_port);
        assert!(config.server.initial_capacity.is_none());
        assert!(config.tls.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert!(path.exists());

        // The written default must load back.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.server.max_connections, 1000);
        assert!(reloaded.tls.is_none());
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:3000"
max_connections = 2000
initial_capacity = 500
min_capacity = 10
frame_tag = 4660
connection_timeout = 90
use_reuse_port = true

[tls]
cert_file = "/etc/gateway/cert.pem"
key_file = "/etc/gateway/key.pem"

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.server.max_connections, 2000);
        assert_eq!(config.server.initial_capacity, Some(500));
        assert_eq!(config.server.min_capacity, 10);
        assert_eq!(config.server.frame_tag, 0x1234);
        assert_eq!(config.server.connection_timeout, 90);
        assert!(config.server.use_reuse_port);
        assert_eq!(
            config.tls,
            Some(TlsConfig {
                cert_file: "/etc/gateway/cert.pem".to_string(),
                key_file: "/etc/gateway/key.pem".to_string(),
            })
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[server\nbind_address = ").await.unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_serde_deserialization_with_defaults() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:8080"

[logging]
level = "info"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.min_capacity, 5);
        assert_eq!(config.server.frame_tag, DEFAULT_TAG);
        assert_eq!(config.server.connection_timeout, 0);
        assert!(config.tls.is_none());
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut app_config = AppConfig::default();
        app_config.server.bind_address = "192.168.1.100:8080".to_string();
        app_config.server.max_connections = 3000;
        app_config.server.initial_capacity = Some(1200);
        app_config.server.connection_timeout = 180;
        app_config.tls = Some(TlsConfig {
            cert_file: "cert.pem".to_string(),
            key_file: "key.pem".to_string(),
        });

        let server_config = app_config.to_server_config().unwrap();
        assert_eq!(server_config.bind_address.to_string(), "192.168.1.100:8080");
        assert_eq!(server_config.max_connections, 3000);
        assert_eq!(server_config.initial_capacity, Some(1200));
        assert_eq!(server_config.connection_timeout, 180);
        assert_eq!(
            server_config.tls.map(|tls| tls.cert_file),
            Some(PathBuf::from("cert.pem"))
        );
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid_address".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_capacities() {
        let mut config = AppConfig::default();
        config.server.max_connections = 100;
        config.server.initial_capacity = Some(101);
        assert!(config.validate().unwrap_err().contains("initial_capacity"));

        config.server.initial_capacity = Some(100);
        config.server.min_capacity = 200;
        assert!(config.validate().unwrap_err().contains("min_capacity"));

        config.server.min_capacity = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_incomplete_tls() {
        let mut config = AppConfig::default();
        config.tls = Some(TlsConfig {
            cert_file: "cert.pem".to_string(),
            key_file: String::new(),
        });
        assert!(config.validate().unwrap_err().contains("TLS"));
    }

    #[test]
    fn test_validation_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }

        let mut config = AppConfig::default();
        config.logging.level = "invalid_level".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }
}
