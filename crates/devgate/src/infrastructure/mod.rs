//! Infrastructure layer of the gateway.
//!
//! Contains the adapters that touch the outside world: daemon sockets and
//! framing, background readers, the daemon launcher, per-device proxy
//! listeners, the bundled informer, pooled shell sessions, and config file
//! storage.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `devgate_core`, but MUST NOT be imported by the `application` layer.  The
//! application talks to it only through the traits it defines
//! (`DeviceSource`, `ProxyLauncher`, `DeviceInformer`, `ConnectionFactory`).

pub mod channel;
pub mod daemon;
pub mod host_client;
pub mod informer;
pub mod proxy_server;
pub mod reader;
pub mod session;
pub mod storage;
