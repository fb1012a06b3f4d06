//! Starting the device-bridge daemon when nothing is listening.
//!
//! The host client calls a [`DaemonLauncher`] at most once per connect
//! attempt, only after the first connection was refused.  The trait keeps
//! that side effect out of tests: they inject a launcher that records the
//! call (or brings up an in-process fake daemon) instead of spawning a
//! process.

use std::net::SocketAddr;
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Brings the daemon up.  Returns once the start attempt has completed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DaemonLauncher: Send + Sync {
    async fn start(&self, addr: SocketAddr) -> anyhow::Result<()>;
}

/// Runs `<program> -P <port> start-server` and waits for it to exit.
///
/// `start-server` forks the daemon and returns after it is accepting
/// connections, so no extra settle delay is needed.
#[derive(Debug, Clone)]
pub struct ProcessDaemonLauncher {
    program: String,
}

impl ProcessDaemonLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DaemonLauncher for ProcessDaemonLauncher {
    async fn start(&self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("starting daemon: {} -P {} start-server", self.program, addr.port());

        let output = Command::new(&self.program)
            .args(["-P", &addr.port().to_string(), "start-server"])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} start-server exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        debug!("daemon start-server completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        // Arrange
        let launcher = ProcessDaemonLauncher::new("devgate-no-such-daemon-binary");

        // Act
        let result = launcher.start("127.0.0.1:5037".parse().unwrap()).await;

        // Assert
        let err = result.unwrap_err();
        assert!(err.to_string().contains("devgate-no-such-daemon-binary"));
    }
}
