//! In-process fake device-bridge daemon shared by the integration tests.
//!
//! It speaks just enough of the host protocol for the gateway's operations,
//! built on the same `devgate_core` codec the gateway uses:
//!
//! | Command                 | Reply                                                   |
//! |-------------------------|---------------------------------------------------------|
//! | `host:devices`          | `OKAY` + length-prefixed `<id>\t<status>\n` listing     |
//! | `host:version`          | `OKAY` + length-prefixed `"0029"`                       |
//! | `host:transport:<id>`   | `OKAY` if the device is `device`, otherwise `FAIL`      |
//! | `shell:<cmd>`           | `OKAY` + command output, then the connection closes    |
//! | `host:broken`           | `WHAT` (protocol violation)                             |
//! | anything else           | `FAIL unknown host service`                             |

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devgate::infrastructure::daemon::DaemonLauncher;
use devgate_core::protocol::{
    decode_length, encode_fail, encode_length_prefixed, encode_okay, LENGTH_HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const GETPROP_PIXEL: &str = "\
[ro.build.version.sdk]: [34]
[ro.product.manufacturer]: [Google]
[ro.product.model]: [Pixel 7]
";

/// PNG signature followed by a few bytes of "image".
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[derive(Default)]
pub struct DaemonState {
    devices: Mutex<Vec<(String, String)>>,
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

pub struct FakeDaemon {
    pub addr: SocketAddr,
    state: Arc<DaemonState>,
    task: JoinHandle<()>,
}

impl FakeDaemon {
    /// Starts a daemon on an ephemeral loopback port.
    pub async fn start(devices: &[(&str, &str)]) -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap(), devices)
            .await
            .expect("bind fake daemon")
    }

    /// Starts a daemon on a specific address.
    pub async fn start_on(addr: SocketAddr, devices: &[(&str, &str)]) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(DaemonState::default());
        let daemon = Self {
            addr,
            state: Arc::clone(&state),
            task: tokio::spawn(accept_loop(listener, state)),
        };
        daemon.set_devices(devices);
        Ok(daemon)
    }

    pub fn set_devices(&self, devices: &[(&str, &str)]) {
        *self.state.devices.lock().unwrap() = devices
            .iter()
            .map(|(id, status)| (id.to_string(), status.to_string()))
            .collect();
    }

    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    /// Number of TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<DaemonState>) {
    while let Ok((socket, _)) = listener.accept().await {
        state.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve_connection(socket, Arc::clone(&state)));
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    socket.read_exact(&mut header).await.ok()?;
    let len = decode_length(header).ok()?;
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload).await.ok()?;
    String::from_utf8(payload).ok()
}

async fn serve_connection(mut socket: TcpStream, state: Arc<DaemonState>) {
    let mut transport: Option<String> = None;

    while let Some(command) = read_request(&mut socket).await {
        state.commands.lock().unwrap().push(command.clone());

        let reply: Vec<u8> = if command == "host:devices" {
            let listing: String = state
                .devices
                .lock()
                .unwrap()
                .iter()
                .map(|(id, status)| format!("{id}\t{status}\n"))
                .collect();
            let mut reply = encode_okay();
            reply.extend(encode_length_prefixed(listing.as_bytes()).unwrap());
            reply
        } else if command == "host:version" {
            let mut reply = encode_okay();
            reply.extend(encode_length_prefixed(b"0029").unwrap());
            reply
        } else if command == "host:broken" {
            b"WHAT".to_vec()
        } else if let Some(id) = command.strip_prefix("host:transport:") {
            let status = state
                .devices
                .lock()
                .unwrap()
                .iter()
                .find(|(known, _)| known == id)
                .map(|(_, status)| status.clone());
            match status.as_deref() {
                Some("device") => {
                    transport = Some(id.to_string());
                    encode_okay()
                }
                Some(other) => encode_fail(&format!("device {other}")).unwrap(),
                None => encode_fail(&format!("device '{id}' not found")).unwrap(),
            }
        } else if let Some(cmd) = command.strip_prefix("shell:") {
            if transport.is_none() {
                encode_fail("no device transport selected").unwrap()
            } else {
                let mut reply = encode_okay();
                reply.extend(shell_output(cmd));
                let _ = socket.write_all(&reply).await;
                let _ = socket.shutdown().await;
                return;
            }
        } else {
            encode_fail("unknown host service").unwrap()
        };

        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn shell_output(cmd: &str) -> Vec<u8> {
    match cmd {
        "getprop" => GETPROP_PIXEL.as_bytes().to_vec(),
        "screencap -p" => FAKE_PNG.to_vec(),
        "logcat" => b"I/boot: line 1\nI/boot: line 2\n".to_vec(),
        _ => match cmd.strip_prefix("echo ") {
            Some(text) => format!("{text}\n").into_bytes(),
            None => format!("ran: {cmd}\n").into_bytes(),
        },
    }
}

// ── Launchers ─────────────────────────────────────────────────────────────────

/// Launcher that brings a [`FakeDaemon`] up on the requested address.
#[derive(Default)]
pub struct StartingLauncher {
    pub calls: AtomicUsize,
    pub started: Mutex<Option<FakeDaemon>>,
    devices: Vec<(String, String)>,
}

impl StartingLauncher {
    pub fn with_devices(devices: &[(&str, &str)]) -> Self {
        Self {
            devices: devices
                .iter()
                .map(|(id, status)| (id.to_string(), status.to_string()))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DaemonLauncher for StartingLauncher {
    async fn start(&self, addr: SocketAddr) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let devices: Vec<(&str, &str)> = self
            .devices
            .iter()
            .map(|(id, status)| (id.as_str(), status.as_str()))
            .collect();
        let daemon = FakeDaemon::start_on(addr, &devices).await?;
        *self.started.lock().unwrap() = Some(daemon);
        Ok(())
    }
}

/// Launcher that records the call but starts nothing.
#[derive(Default)]
pub struct InertLauncher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DaemonLauncher for InertLauncher {
    async fn start(&self, _addr: SocketAddr) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
