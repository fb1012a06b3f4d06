//! TOML-based configuration file for the gateway.
//!
//! The file is optional.  When it is absent every setting takes its default,
//! and command-line flags or `DEVGATE_*` environment variables can still
//! override individual values (see `main.rs`).
//!
//! # What is TOML? (for beginners)
//!
//! TOML (Tom's Obvious Minimal Language) is a configuration file format designed
//! to be easy to read and write.  A complete gateway config looks like:
//!
//! ```toml
//! [daemon]
//! address = "127.0.0.1:5037"
//! program = "adb"
//! connect_timeout_ms = 3000
//!
//! [registry]
//! poll_interval_secs = 10
//! call_timeout_ms = 5000
//!
//! [proxy]
//! bind_ip = "127.0.0.1"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so a file only
//! needs to mention the settings it changes.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::GatewayConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable (bad address, zero interval, ...).
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// How to reach (and if necessary start) the device-bridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonSection {
    /// `ip:port` of the daemon.
    #[serde(default = "default_daemon_address")]
    pub address: String,
    /// Executable used to start the daemon when it is not reachable.
    #[serde(default = "default_daemon_program")]
    pub program: String,
    /// Bound on each TCP connect, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Reconciliation loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Bound on each device-list or property query, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

/// Per-device proxy listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxySection {
    /// IP address proxies bind to.  Ports are always OS-assigned.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_daemon_address() -> String {
    "127.0.0.1:5037".to_string()
}
fn default_daemon_program() -> String {
    "adb".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3_000
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_call_timeout_ms() -> u64 {
    5_000
}
fn default_bind_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            address: default_daemon_address(),
            program: default_daemon_program(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

impl FileConfig {
    /// Validates the file values and converts them into a [`GatewayConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable addresses, an empty
    /// daemon program, or a zero poll interval or timeout.
    pub fn resolve(&self) -> Result<GatewayConfig, ConfigError> {
        let daemon_addr: SocketAddr =
            self.daemon
                .address
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    field: "daemon.address",
                    reason: e.to_string(),
                })?;
        let proxy_bind_ip: IpAddr =
            self.proxy
                .bind_ip
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    field: "proxy.bind_ip",
                    reason: e.to_string(),
                })?;

        if self.daemon.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "daemon.program",
                reason: "must not be empty".to_string(),
            });
        }
        let poll_interval = non_zero(
            "registry.poll_interval_secs",
            Duration::from_secs(self.registry.poll_interval_secs),
        )?;
        let call_timeout = non_zero(
            "registry.call_timeout_ms",
            Duration::from_millis(self.registry.call_timeout_ms),
        )?;
        let connect_timeout = non_zero(
            "daemon.connect_timeout_ms",
            Duration::from_millis(self.daemon.connect_timeout_ms),
        )?;

        Ok(GatewayConfig {
            daemon_addr,
            proxy_bind_ip,
            poll_interval,
            call_timeout,
            connect_timeout,
            daemon_program: self.daemon.program.clone(),
            log_level: self.logging.level.clone(),
        })
    }
}

fn non_zero(field: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads the config file at `path`, returning defaults if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: FileConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("devgate-config-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_defaults_resolve_to_gateway_defaults() {
        // Arrange
        let file = FileConfig::default();

        // Act
        let cfg = file.resolve().expect("defaults must be valid");

        // Assert
        assert_eq!(cfg, GatewayConfig::default());
    }

    #[test]
    fn test_partial_file_fills_missing_fields() {
        // Arrange
        let text = "[registry]\npoll_interval_secs = 2\n";

        // Act
        let file: FileConfig = toml::from_str(text).expect("parse");
        let cfg = file.resolve().expect("resolve");

        // Assert
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.call_timeout, Duration::from_millis(5_000));
        assert_eq!(cfg.daemon_addr.port(), 5037);
    }

    #[test]
    fn test_bad_daemon_address_is_invalid() {
        let mut file = FileConfig::default();
        file.daemon.address = "not-an-address".to_string();

        let err = file.resolve().unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "daemon.address",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_poll_interval_is_invalid() {
        let mut file = FileConfig::default();
        file.registry.poll_interval_secs = 0;

        assert!(matches!(
            file.resolve(),
            Err(ConfigError::Invalid {
                field: "registry.poll_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let path = temp_path("broken.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[daemon\naddress = ").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let path = temp_path("absent.toml");
        assert_eq!(load_config(&path).unwrap(), FileConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        // Arrange
        let path = temp_path("devgate.toml");
        let mut cfg = FileConfig::default();
        cfg.proxy.bind_ip = "0.0.0.0".to_string();
        cfg.logging.level = "debug".to_string();

        // Act
        save_config(&path, &cfg).expect("save");
        let restored = load_config(&path).expect("load");

        // Assert
        assert_eq!(cfg, restored);
    }
}
