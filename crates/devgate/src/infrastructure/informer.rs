//! Bundled device informer: logs every device-list change as JSON.
//!
//! Deployments that push changes elsewhere (a web backend, a message bus)
//! implement `DeviceInformer` themselves; this one keeps the gateway useful
//! on its own.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use devgate_core::Device;

use crate::application::device_registry::DeviceInformer;

#[derive(Debug, Default)]
pub struct LoggingInformer;

#[derive(Serialize)]
struct Snapshot<'a> {
    count: usize,
    devices: &'a [Device],
}

impl LoggingInformer {
    /// Renders the snapshot exactly as it is logged.
    pub fn render(devices: &[Device]) -> serde_json::Result<String> {
        serde_json::to_string(&Snapshot {
            count: devices.len(),
            devices,
        })
    }
}

#[async_trait]
impl DeviceInformer for LoggingInformer {
    async fn devices_changed(&self, devices: &[Device]) -> anyhow::Result<()> {
        let json = Self::render(devices)?;
        info!("devices changed: {json}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_count_and_endpoints() {
        // Arrange
        let mut a = Device::new("A", "device");
        a.attach_proxy(40001, "127.0.0.1:40001");
        let b = Device::new("B", "unauthorized");

        // Act
        let json = LoggingInformer::render(&[a, b]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        // Assert
        assert_eq!(value["count"], 2);
        assert_eq!(value["devices"][0]["id"], "A");
        assert_eq!(value["devices"][0]["url"], "127.0.0.1:40001");
        assert_eq!(value["devices"][1]["status"], "unauthorized");
        assert!(value["devices"][1]["port"].is_null());
    }

    #[tokio::test]
    async fn test_devices_changed_never_fails_for_valid_devices() {
        let informer = LoggingInformer;
        assert!(informer.devices_changed(&[]).await.is_ok());
    }
}
