//! Device records and the text formats the daemon reports them in.
//!
//! # Device lifecycle
//!
//! ```text
//! first seen in host:devices ──► registered (proxy running, port/url set)
//!                                   │   status / properties refreshed in place
//!                                   ▼
//!                       missing from host:devices ──► removed (proxy stopped)
//! ```
//!
//! The daemon is the source of truth: a [`Device`] is rebuilt from its
//! reports every reconciliation cycle and carries no state of its own beyond
//! what the gateway attached (proxy port and URL).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::version_label;

/// Status string the daemon uses for a fully usable device.
pub const STATUS_ONLINE: &str = "device";

/// Stable identifier of an attached device (the daemon's serial).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a serial string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The serial as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Marketing name and vendor of a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub manufacturer: String,
}

/// Hardware metadata extracted from a one-shot property query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceProperties {
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub api_level: Option<u32>,
}

impl DeviceProperties {
    /// `true` when the query returned nothing the registry can use.
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.manufacturer.is_none() && self.api_level.is_none()
    }
}

/// A device as tracked by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Free-text state reported by the daemon (`device`, `unauthorized`, ...).
    pub status: String,
    /// Port of the per-device proxy, once one is running.
    pub port: Option<u16>,
    /// `host:port` clients should connect to, once a proxy is running.
    pub url: Option<String>,
    pub api_level: Option<u32>,
    /// Human label derived from `api_level` (e.g. `"Android 14"`).
    pub version: Option<String>,
    pub model: Option<ModelInfo>,
}

impl Device {
    /// Creates a device with only identity and status known.
    pub fn new(id: impl Into<DeviceId>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            port: None,
            url: None,
            api_level: None,
            version: None,
            model: None,
        }
    }

    /// `true` when the daemon reports the device as usable.
    pub fn is_online(&self) -> bool {
        self.status == STATUS_ONLINE
    }

    /// `true` until a property query has filled in any hardware metadata.
    pub fn properties_unknown(&self) -> bool {
        self.api_level.is_none() && self.model.is_none()
    }

    /// Copies hardware metadata in and derives the version label.
    ///
    /// Fields absent from `props` leave the current values untouched.
    pub fn apply_properties(&mut self, props: &DeviceProperties) {
        if let Some(level) = props.api_level {
            self.api_level = Some(level);
            self.version = Some(version_label(level));
        }
        if props.model.is_some() || props.manufacturer.is_some() {
            let current = self.model.take().unwrap_or_default();
            self.model = Some(ModelInfo {
                name: props.model.clone().unwrap_or(current.name),
                manufacturer: props.manufacturer.clone().unwrap_or(current.manufacturer),
            });
        }
    }

    /// Records where the device's proxy is listening.
    pub fn attach_proxy(&mut self, port: u16, url: impl Into<String>) {
        self.port = Some(port);
        self.url = Some(url.into());
    }
}

// ── Text formats ──────────────────────────────────────────────────────────────

/// Parses the body of a `host:devices` reply.
///
/// Each non-blank line is `<id>\t<status>`.  Lines are trimmed; a line with no
/// tab is reported with an empty status rather than dropped, since the id is
/// still meaningful.
///
/// # Examples
///
/// ```rust
/// use devgate_core::domain::parse_device_list;
///
/// let devices = parse_device_list("A\tdevice\nB\tunauthorized\n");
/// assert_eq!(devices.len(), 2);
/// assert_eq!(devices[1].status, "unauthorized");
/// ```
pub fn parse_device_list(body: &str) -> Vec<Device> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((id, status)) => Device::new(id.trim(), status.trim()),
            None => Device::new(line, ""),
        })
        .collect()
}

/// Parses `getprop` output (`[key]: [value]` per line) into a map.
///
/// Malformed lines are skipped.  Multi-line values are not supported; only
/// the first line of such a value is kept, which is enough for the keys the
/// gateway reads.
pub fn parse_getprop(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']').unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Extracts model, manufacturer and API level from `getprop` output.
pub fn parse_device_properties(output: &str) -> DeviceProperties {
    let props = parse_getprop(output);
    let non_empty = |key: &str| props.get(key).filter(|v| !v.is_empty()).cloned();
    DeviceProperties {
        model: non_empty("ro.product.model"),
        manufacturer: non_empty("ro.product.manufacturer"),
        api_level: props
            .get("ro.build.version.sdk")
            .and_then(|v| v.trim().parse().ok()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
