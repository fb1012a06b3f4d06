//! devgate: local device gateway, entry point.
//!
//! Discovers the devices a device-bridge daemon reports, opens one proxy port
//! per device, and keeps that set in sync with the daemon every poll interval.
//!
//! # Usage
//!
//! ```text
//! devgate [OPTIONS] [COMMAND]
//!
//! Commands:
//!   serve     Run the reconciliation loop until Ctrl+C (default)
//!   devices   Print the daemon's current device list as JSON and exit
//!   version   Print the daemon's protocol version and exit
//!   shell     Run one shell command on a device through a pooled session
//!   logs      Follow a device's log until it ends or Ctrl+C
//!
//! Options:
//!   --config <PATH>            TOML config file [default: devgate.toml]
//!   --daemon-addr <ADDR>       Daemon address [default: 127.0.0.1:5037]
//!   --bind-ip <IP>             Proxy bind IP [default: 127.0.0.1]
//!   --poll-interval-secs <N>   Seconds between cycles [default: 10]
//!   --call-timeout-ms <N>      Bound on each daemon query [default: 5000]
//!   --daemon-program <PROG>    Program used to start the daemon [default: adb]
//!   --log-level <LEVEL>        Fallback when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! Command-line flags beat `DEVGATE_*` environment variables, which beat the
//! config file, which beats built-in defaults.
//!
//! # Architecture overview
//!
//! ```text
//! main()
//!  └─ HostClient             -- framed channels to the daemon, auto-start
//!  └─ DeviceRegistry::run()  -- reconciliation loop (one task)
//!       ├─ HostProxyLauncher -- one ProxyServer per device (accept task + relays)
//!       └─ LoggingInformer   -- JSON snapshot on every change
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use devgate::application::connection_pool::ConnectionPool;
use devgate::application::device_registry::{
    DeviceRegistry, DeviceSource, ProxyTable, RegistrySettings,
};
use devgate::domain::config::GatewayConfig;
use devgate::infrastructure::daemon::ProcessDaemonLauncher;
use devgate::infrastructure::host_client::HostClient;
use devgate::infrastructure::informer::LoggingInformer;
use devgate::infrastructure::proxy_server::HostProxyLauncher;
use devgate::infrastructure::reader::LogObserver;
use devgate::infrastructure::session::ShellSessionFactory;
use devgate::infrastructure::storage::config::load_config;
use devgate_core::DeviceId;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Local device gateway.
///
/// Every option is optional: unset options fall back to the environment, then
/// the config file, then built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "devgate",
    about = "Discovers daemon-attached devices and exposes one proxy port per device",
    version
)]
struct Cli {
    /// TOML config file.  A missing file means "all defaults".
    #[arg(long, default_value = "devgate.toml", env = "DEVGATE_CONFIG")]
    config: PathBuf,

    /// `ip:port` of the device-bridge daemon.
    #[arg(long, env = "DEVGATE_DAEMON_ADDR")]
    daemon_addr: Option<SocketAddr>,

    /// IP address per-device proxies bind to.
    #[arg(long, env = "DEVGATE_BIND_IP")]
    bind_ip: Option<IpAddr>,

    /// Seconds between reconciliation cycles.
    #[arg(long, env = "DEVGATE_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    /// Bound on each device-list or property query, in milliseconds.
    #[arg(long, env = "DEVGATE_CALL_TIMEOUT_MS")]
    call_timeout_ms: Option<u64>,

    /// Program run as `<program> -P <port> start-server` if the daemon is down.
    #[arg(long, env = "DEVGATE_DAEMON_PROGRAM")]
    daemon_program: Option<String>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "DEVGATE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reconciliation loop until Ctrl+C.
    Serve,
    /// Print the daemon's current device list as JSON and exit.
    Devices,
    /// Print the daemon's protocol version and exit.
    Version,
    /// Run one shell command on a device through a pooled session.
    Shell {
        /// Device id as listed by `devices`.
        device: String,
        /// Command and arguments, joined with spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Follow a device's log until the stream ends or Ctrl+C.
    Logs {
        /// Device id as listed by `devices`.
        device: String,
    },
}

impl Cli {
    /// Loads the config file and applies CLI/env overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged values are invalid.
    fn resolve_config(&self) -> anyhow::Result<GatewayConfig> {
        let file = load_config(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        let mut config = file.resolve().context("invalid configuration")?;

        if let Some(addr) = self.daemon_addr {
            config.daemon_addr = addr;
        }
        if let Some(ip) = self.bind_ip {
            config.proxy_bind_ip = ip;
        }
        if let Some(secs) = self.poll_interval_secs.filter(|s| *s > 0) {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = self.call_timeout_ms.filter(|ms| *ms > 0) {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(program) = &self.daemon_program {
            config.daemon_program = program.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    let launcher = Arc::new(ProcessDaemonLauncher::new(config.daemon_program.clone()));
    let client = Arc::new(HostClient::new(&config, launcher));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, client).await,
        Command::Devices => {
            let devices = client.list_devices().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        Command::Version => {
            let version = client.server_version().await?;
            println!("{version}");
            Ok(())
        }
        Command::Shell { device, command } => {
            let pool = ConnectionPool::new(ShellSessionFactory::new(Arc::clone(&client)));
            let command = command.join(" ");
            let output = pool
                .execute(&device, |session| {
                    let command = command.clone();
                    async move { session.run(&command).await }
                })
                .await?;
            print!("{output}");
            Ok(())
        }
        Command::Logs { device } => {
            let token = CancellationToken::new();
            let handle = client
                .stream_logs(
                    &DeviceId::from(device.as_str()),
                    Arc::new(LogObserver::new(device.clone())),
                    token.clone(),
                )
                .await?;
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });
            handle.finished().await;
            Ok(())
        }
    }
}

async fn serve(config: GatewayConfig, client: Arc<HostClient>) -> anyhow::Result<()> {
    info!(
        "devgate starting: daemon={}, proxies on {}, poll every {:?}",
        config.daemon_addr, config.proxy_bind_ip, config.poll_interval
    );

    let shutdown = CancellationToken::new();
    let registry = DeviceRegistry::new(
        Arc::clone(&client) as Arc<dyn DeviceSource>,
        Arc::new(HostProxyLauncher::new(
            Arc::clone(&client),
            config.proxy_bind_ip,
            shutdown.clone(),
        )),
        Arc::new(LoggingInformer),
        ProxyTable::new(),
        RegistrySettings {
            poll_interval: config.poll_interval,
            call_timeout: config.call_timeout,
        },
    );

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
        signal_token.cancel();
    });

    info!("devgate ready.  Press Ctrl-C to exit.");
    registry.run(shutdown).await;

    info!("devgate stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
