//! # devgate-core
//!
//! Shared library for the devgate device gateway containing the host-protocol
//! codec and the device domain model.
//!
//! It has zero dependencies on sockets or an async runtime, so everything in
//! it can be tested with plain byte slices and strings.
//!
//! - **`protocol`** – How bytes travel to the device-bridge daemon.  Commands
//!   are framed with a four-hex-digit length header; replies start with a
//!   four-byte `OKAY`/`FAIL` status.
//!
//! - **`domain`** – Devices, their metadata and the text formats the daemon
//!   reports them in (`host:devices` listings and `getprop` dumps).

pub mod domain;
pub mod protocol;

pub use domain::device::{Device, DeviceId, DeviceProperties, ModelInfo};
pub use protocol::codec::{decode_response, encode_request, ProtocolError, Response, Status};
pub use protocol::commands::HostCommand;
