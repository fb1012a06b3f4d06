//! Domain entities for devgate.
//!
//! This module contains pure data types and text parsers with no
//! infrastructure dependencies: no sockets, no async runtime, no clocks.
//! Everything here can be unit-tested in isolation.

/// Devices, their metadata and the daemon's text formats.
pub mod device;

/// API level to release-name mapping.
pub mod version;

pub use device::{
    parse_device_list, parse_device_properties, parse_getprop, Device, DeviceId,
    DeviceProperties, ModelInfo, STATUS_ONLINE,
};
pub use version::{release_for_api_level, version_label};
