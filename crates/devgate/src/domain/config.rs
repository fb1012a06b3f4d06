//! Runtime configuration of the gateway.
//!
//! [`GatewayConfig`] is the resolved, validated form every component receives.
//! It is built from the on-disk TOML file (see
//! `infrastructure::storage::config`) with command-line and environment
//! overrides applied on top in `main.rs`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Address the device-bridge daemon listens on by default.
pub const DEFAULT_DAEMON_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5037);

/// Default delay between reconciliation cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default bound on a single daemon query (device list, properties).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on establishing a TCP connection to the daemon.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Fully resolved gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Where the daemon listens.
    pub daemon_addr: SocketAddr,
    /// IP the per-device proxies bind to; ports are always OS-assigned.
    pub proxy_bind_ip: IpAddr,
    /// Delay between reconciliation cycles.
    pub poll_interval: Duration,
    /// Bound on each device-list or property query.
    pub call_timeout: Duration,
    /// Bound on each TCP connect to the daemon.
    pub connect_timeout: Duration,
    /// Program invoked as `<program> start-server` when the daemon is down.
    pub daemon_program: String,
    /// Fallback `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            daemon_addr: DEFAULT_DAEMON_ADDR,
            proxy_bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            poll_interval: DEFAULT_POLL_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            daemon_program: "adb".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_loopback_daemon() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.daemon_addr.to_string(), "127.0.0.1:5037");
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
    }
}
