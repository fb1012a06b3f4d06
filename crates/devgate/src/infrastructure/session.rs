//! Shell sessions: the pooled automation connection for one device.
//!
//! A [`ShellSession`] is a thin handle bound to a device id.  Creating one
//! probes the device with a trivial command, so a session that exists is a
//! session that answered at least once.  Each call opens its own daemon
//! channel; a failed call makes the pool destroy the session and probe a
//! fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::debug;

use devgate_core::DeviceId;

use crate::application::connection_pool::{ConnectionFactory, PooledConnection};

use super::host_client::HostClient;

/// Command used to check a device answers before a session is handed out.
const PROBE_COMMAND: &str = "echo devgate-probe";
const PROBE_REPLY: &str = "devgate-probe";

pub struct ShellSession {
    device_id: DeviceId,
    client: Arc<HostClient>,
    closed: AtomicBool,
}

impl ShellSession {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `command` in the device shell and returns its output.
    pub async fn run(&self, command: &str) -> anyhow::Result<String> {
        self.ensure_open()?;
        self.client
            .shell(&self.device_id, command)
            .await
            .with_context(|| format!("shell `{command}` on {}", self.device_id))
    }

    /// Captures the device screen as PNG bytes.
    pub async fn screencap(&self) -> anyhow::Result<Vec<u8>> {
        self.ensure_open()?;
        self.client
            .screencap(&self.device_id)
            .await
            .with_context(|| format!("screencap on {}", self.device_id))
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            bail!("session for {} is closed", self.device_id);
        }
        Ok(())
    }
}

#[async_trait]
impl PooledConnection for ShellSession {
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("device {}: shell session closed", self.device_id);
    }
}

/// Creates probed [`ShellSession`]s; pool keys are device ids.
pub struct ShellSessionFactory {
    client: Arc<HostClient>,
}

impl ShellSessionFactory {
    pub fn new(client: Arc<HostClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectionFactory for ShellSessionFactory {
    type Connection = ShellSession;

    async fn create(&self, key: &str) -> anyhow::Result<ShellSession> {
        let device_id = DeviceId::from(key);
        let reply = self
            .client
            .shell(&device_id, PROBE_COMMAND)
            .await
            .with_context(|| format!("probing {device_id}"))?;
        if reply.trim() != PROBE_REPLY {
            bail!("unexpected probe reply from {device_id}: {:?}", reply.trim());
        }
        debug!("device {device_id}: shell session ready");
        Ok(ShellSession {
            device_id,
            client: Arc::clone(&self.client),
            closed: AtomicBool::new(false),
        })
    }
}
