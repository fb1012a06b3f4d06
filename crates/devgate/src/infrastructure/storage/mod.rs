//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the optional TOML file, fills in defaults for
//! anything it omits and validates the result into a
//! [`GatewayConfig`](crate::domain::config::GatewayConfig).  All device state
//! is in memory and rebuilt from the daemon on every cycle, so this is the
//! only thing the gateway ever reads from disk.

pub mod config;
