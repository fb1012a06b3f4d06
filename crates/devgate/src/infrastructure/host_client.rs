//! Client side of the daemon's host protocol.
//!
//! Every operation follows the same shape: open a fresh TCP connection, send
//! an opening command sequence through [`FramedChannel::open`], then read the
//! reply in whatever form that command produces.
//!
//! | Operation             | Opening commands                       | Reply read as             |
//! |-----------------------|----------------------------------------|---------------------------|
//! | `list_devices`        | `host:devices`                         | one length-prefixed block |
//! | `server_version`      | `host:version`                         | one length-prefixed block |
//! | `device_properties`   | `host:transport:<id>`, `shell:getprop` | text to end of stream     |
//! | `shell`               | `host:transport:<id>`, `shell:<cmd>`   | text to end of stream     |
//! | `screencap`           | `host:transport:<id>`, `shell:screencap -p` | bytes to end of stream |
//! | `stream_logs`         | `host:transport:<id>`, `shell:logcat`  | background reader         |
//!
//! # Daemon auto-start
//!
//! If the daemon refuses the connection, the client asks its
//! [`DaemonLauncher`] to start it and then tries to connect exactly once
//! more.  There is no loop: a second failure is returned to the caller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use devgate_core::domain::{parse_device_list, parse_device_properties};
use devgate_core::protocol::{device_shell, HostCommand, LocalId, LocalIdAllocator, RemoteId};
use devgate_core::{Device, DeviceId, DeviceProperties};

use crate::application::device_registry::DeviceSource;
use crate::domain::config::GatewayConfig;

use super::channel::{ChannelError, FramedChannel};
use super::daemon::DaemonLauncher;
use super::reader::{ReaderHandle, StreamObserver};

/// Error type for host-client operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// Nothing usable is listening at the daemon address.
    #[error("daemon unavailable at {addr}: {source}")]
    DaemonUnavailable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The launcher could not bring the daemon up.
    #[error("failed to start daemon: {0:#}")]
    DaemonStart(anyhow::Error),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The daemon's reply was well framed but meaningless.
    #[error("invalid reply to {command}: {reason}")]
    InvalidReply { command: String, reason: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Talks to the device-bridge daemon.
///
/// Cheap to share behind an `Arc`; every call opens its own connection.
pub struct HostClient {
    daemon_addr: SocketAddr,
    connect_timeout: Duration,
    ids: LocalIdAllocator,
    launcher: Arc<dyn DaemonLauncher>,
}

impl HostClient {
    pub fn new(config: &GatewayConfig, launcher: Arc<dyn DaemonLauncher>) -> Self {
        Self {
            daemon_addr: config.daemon_addr,
            connect_timeout: config.connect_timeout,
            ids: LocalIdAllocator::new(),
            launcher,
        }
    }

    pub fn daemon_addr(&self) -> SocketAddr {
        self.daemon_addr
    }

    /// Opens a TCP connection to the daemon, starting it once if refused.
    ///
    /// # Errors
    ///
    /// - [`HostError::DaemonStart`] if the launcher fails.
    /// - [`HostError::DaemonUnavailable`] / [`HostError::Timeout`] from the
    ///   last connect attempt.
    pub async fn connect(&self) -> Result<TcpStream, HostError> {
        match self.try_connect().await {
            Err(HostError::DaemonUnavailable { source, .. })
                if source.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                info!("daemon at {} refused connection; starting it", self.daemon_addr);
                self.launcher
                    .start(self.daemon_addr)
                    .await
                    .map_err(HostError::DaemonStart)?;
                self.try_connect().await
            }
            other => other,
        }
    }

    async fn try_connect(&self) -> Result<TcpStream, HostError> {
        let addr = self.daemon_addr;
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay on daemon connection failed: {e}");
                }
                Ok(stream)
            }
            Ok(Err(source)) => Err(HostError::DaemonUnavailable { addr, source }),
            Err(_) => Err(HostError::Timeout {
                operation: "daemon connect",
                timeout: self.connect_timeout,
            }),
        }
    }

    /// Connects and opens a channel with the given identifiers and commands.
    ///
    /// This is the primitive every other operation is built on.
    pub async fn create_stream(
        &self,
        local_id: LocalId,
        remote_id: RemoteId,
        commands: &[HostCommand],
    ) -> Result<FramedChannel<TcpStream>, HostError> {
        let stream = self.connect().await?;
        Ok(FramedChannel::open(stream, local_id, remote_id, commands).await?)
    }

    /// [`HostClient::create_stream`] with a freshly allocated local id.
    pub async fn open_stream(
        &self,
        commands: &[HostCommand],
    ) -> Result<FramedChannel<TcpStream>, HostError> {
        self.create_stream(self.ids.next(), RemoteId::default(), commands)
            .await
    }

    /// Lists the devices the daemon currently reports.
    pub async fn list_devices(&self) -> Result<Vec<Device>, HostError> {
        let mut channel = self.open_stream(&[HostCommand::Devices]).await?;
        let body = channel.read_length_prefixed_text().await?;
        channel.close().await;
        Ok(parse_device_list(&body))
    }

    /// The daemon's internal protocol version (`host:version`).
    pub async fn server_version(&self) -> Result<u32, HostError> {
        let mut channel = self.open_stream(&[HostCommand::Version]).await?;
        let body = channel.read_length_prefixed_text().await?;
        channel.close().await;
        u32::from_str_radix(body.trim(), 16).map_err(|e| HostError::InvalidReply {
            command: HostCommand::Version.to_wire(),
            reason: e.to_string(),
        })
    }

    /// Runs `getprop` on the device and extracts model, vendor and API level.
    pub async fn device_properties(&self, id: &DeviceId) -> Result<DeviceProperties, HostError> {
        let output = self.shell(id, "getprop").await?;
        Ok(parse_device_properties(&output))
    }

    /// Runs a shell command on the device and returns its output.
    pub async fn shell(&self, id: &DeviceId, command: &str) -> Result<String, HostError> {
        let mut channel = self.open_stream(&device_shell(id, command)).await?;
        let output = channel.read_to_string().await?;
        channel.close().await;
        Ok(output)
    }

    /// Captures the device screen as PNG bytes.
    pub async fn screencap(&self, id: &DeviceId) -> Result<Vec<u8>, HostError> {
        let commands = [HostCommand::Transport(id.clone()), HostCommand::screencap()];
        let mut channel = self.open_stream(&commands).await?;
        let png = channel.read_to_end().await?;
        channel.close().await;
        debug!("device {id}: screencap returned {} bytes", png.len());
        Ok(png)
    }

    /// Follows the device log, delivering chunks to `observer`.
    ///
    /// Faults arrive through `observer.on_fault` rather than as an error here,
    /// since nobody is waiting on the stream synchronously.
    pub async fn stream_logs(
        &self,
        id: &DeviceId,
        observer: Arc<dyn StreamObserver>,
        token: CancellationToken,
    ) -> Result<ReaderHandle, HostError> {
        let commands = [HostCommand::Transport(id.clone()), HostCommand::logcat()];
        let channel = self.open_stream(&commands).await?;
        Ok(channel.create_reader(observer, token))
    }
}

#[async_trait]
impl DeviceSource for HostClient {
    async fn list_devices(&self) -> anyhow::Result<Vec<Device>> {
        HostClient::list_devices(self)
            .await
            .context("host:devices failed")
    }

    async fn device_properties(&self, id: &DeviceId) -> anyhow::Result<DeviceProperties> {
        HostClient::device_properties(self, id)
            .await
            .with_context(|| format!("property query for {id} failed"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
