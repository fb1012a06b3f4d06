//! Per-device proxy: re-exposes one device on its own TCP port.
//!
//! # How a proxied connection works
//!
//! ```text
//! automation client ──TCP──► ProxyServer (ephemeral port)
//!                                │  accept, spawn relay task
//!                                ▼
//!                          HostClient::open_stream([host:transport:<id>])
//!                                │  daemon answers OKAY, channel now bound to the device
//!                                ▼
//!           copy_bidirectional(client socket, daemon socket) until either side closes
//! ```
//!
//! The proxy never looks at the bytes it relays.  Clients speak the same
//! framed protocol they would speak to the daemon directly, only already
//! switched to this proxy's device.
//!
//! The accept loop never blocks on a session: each accepted connection is
//! handed to its own task before the next `accept()`.  Stopping the proxy
//! cancels the accept loop and every relay it spawned.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use devgate_core::protocol::HostCommand;
use devgate_core::{Device, DeviceId};

use crate::application::device_registry::{DeviceProxy, ProxyLauncher};

use super::host_client::HostClient;

/// Error type for proxy lifecycle operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A running listener relaying connections to one device.
pub struct ProxyServer {
    device_id: DeviceId,
    local_addr: SocketAddr,
    url: String,
    token: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    /// Binds an OS-assigned port on `bind_ip` and starts accepting.
    ///
    /// `parent` is the gateway's shutdown token; the proxy stops when it is
    /// cancelled even if [`ProxyServer::stop`] is never called.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::BindFailed`] if the listener cannot be created.
    pub async fn start(
        device_id: DeviceId,
        bind_ip: IpAddr,
        client: Arc<HostClient>,
        parent: &CancellationToken,
    ) -> Result<Self, ProxyError> {
        let requested = SocketAddr::new(bind_ip, 0);
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| ProxyError::BindFailed {
                addr: requested,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ProxyError::BindFailed {
                addr: requested,
                source,
            })?;

        let token = parent.child_token();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            device_id.clone(),
            client,
            token.clone(),
        ));

        info!("device {device_id}: proxy listening on {local_addr}");
        Ok(Self {
            url: advertised_addr(local_addr).to_string(),
            device_id,
            local_addr,
            token,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancels the accept loop and all relays, then waits for the listener
    /// to be released.  Stopping twice is a no-op.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = match self.accept_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("device {}: proxy accept task ended abnormally: {e}", self.device_id);
            }
            info!("device {}: proxy on {} stopped", self.device_id, self.local_addr);
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl DeviceProxy for ProxyServer {
    fn device_id(&self) -> DeviceId {
        self.device_id.clone()
    }

    fn port(&self) -> u16 {
        self.local_addr.port()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    async fn stop(&self) {
        self.shutdown().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    device_id: DeviceId,
    client: Arc<HostClient>,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("device {device_id}: proxy accept loop cancelled");
                break;
            }
            r = listener.accept() => r,
        };

        match accepted {
            Ok((socket, peer_addr)) => {
                let session_id = Uuid::new_v4();
                info!("device {device_id}: proxy session {session_id} from {peer_addr}");
                tokio::spawn(relay_session(
                    socket,
                    session_id,
                    device_id.clone(),
                    Arc::clone(&client),
                    token.child_token(),
                ));
            }
            Err(e) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("device {device_id}: proxy accept error: {e}");
            }
        }
    }
}

async fn relay_session(
    mut socket: TcpStream,
    session_id: Uuid,
    device_id: DeviceId,
    client: Arc<HostClient>,
    token: CancellationToken,
) {
    let upstream = client
        .open_stream(&[HostCommand::Transport(device_id.clone())])
        .await
        .context("opening device transport")
        .and_then(|channel| channel.into_inner().context("releasing daemon stream"));

    let mut upstream = match upstream {
        Ok(stream) => stream,
        Err(e) => {
            warn!("session {session_id}: device {device_id} unreachable: {e:#}");
            return;
        }
    };

    tokio::select! {
        _ = token.cancelled() => {
            debug!("session {session_id}: relay cancelled");
        }
        result = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => match result {
            Ok((to_daemon, to_client)) => debug!(
                "session {session_id}: closed ({to_daemon} bytes up, {to_client} bytes down)"
            ),
            Err(e) => debug!("session {session_id}: relay ended with error: {e}"),
        },
    }
}

/// Address clients should dial for a listener bound to `local`.
///
/// A wildcard bind (`0.0.0.0` / `::`) is not dialable, so it is advertised
/// as the loopback address of the same family.
fn advertised_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

// ── Launcher ──────────────────────────────────────────────────────────────────

/// Starts real [`ProxyServer`]s for the device registry.
pub struct HostProxyLauncher {
    client: Arc<HostClient>,
    bind_ip: IpAddr,
    token: CancellationToken,
}

impl HostProxyLauncher {
    pub fn new(client: Arc<HostClient>, bind_ip: IpAddr, token: CancellationToken) -> Self {
        Self {
            client,
            bind_ip,
            token,
        }
    }
}

#[async_trait]
impl ProxyLauncher for HostProxyLauncher {
    async fn launch(&self, device: &Device) -> anyhow::Result<Arc<dyn DeviceProxy>> {
        let proxy = ProxyServer::start(
            device.id.clone(),
            self.bind_ip,
            Arc::clone(&self.client),
            &self.token,
        )
        .await?;
        Ok(Arc::new(proxy))
    }
}
