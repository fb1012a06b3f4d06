//! Typed daemon commands.
//!
//! Every request the gateway sends is one of these variants.  Rendering them
//! through [`HostCommand::to_wire`] keeps the command grammar in one place
//! instead of scattering `format!("host:transport:{id}")` calls around the
//! service crate.

use std::fmt;

use crate::domain::device::DeviceId;

/// A command understood by the device-bridge daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// `host:devices`: list attached devices and their states.
    Devices,
    /// `host:version`: the daemon's internal protocol version.
    Version,
    /// `host:transport:<id>`: switch this connection to a device.
    Transport(DeviceId),
    /// `shell:<command>`: run a shell command on the selected device.
    Shell(String),
}

impl HostCommand {
    /// `shell:getprop`: dump all system properties.
    pub fn getprop() -> Self {
        HostCommand::Shell("getprop".to_string())
    }

    /// `shell:screencap -p`: capture the screen as PNG.
    pub fn screencap() -> Self {
        HostCommand::Shell("screencap -p".to_string())
    }

    /// `shell:logcat`: follow the device log.
    pub fn logcat() -> Self {
        HostCommand::Shell("logcat".to_string())
    }

    /// Renders the command exactly as it is framed on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            HostCommand::Devices => "host:devices".to_string(),
            HostCommand::Version => "host:version".to_string(),
            HostCommand::Transport(id) => format!("host:transport:{id}"),
            HostCommand::Shell(cmd) => format!("shell:{cmd}"),
        }
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Builds the `[transport, shell]` pair used by every per-device one-shot query.
pub fn device_shell(id: &DeviceId, command: impl Into<String>) -> Vec<HostCommand> {
    vec![
        HostCommand::Transport(id.clone()),
        HostCommand::Shell(command.into()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_text_for_each_variant() {
        let id = DeviceId::from("emulator-5554");
        assert_eq!(HostCommand::Devices.to_wire(), "host:devices");
        assert_eq!(HostCommand::Version.to_wire(), "host:version");
        assert_eq!(
            HostCommand::Transport(id).to_wire(),
            "host:transport:emulator-5554"
        );
        assert_eq!(HostCommand::getprop().to_wire(), "shell:getprop");
        assert_eq!(HostCommand::screencap().to_wire(), "shell:screencap -p");
    }

    #[test]
    fn test_device_shell_selects_transport_first() {
        let id = DeviceId::from("A");
        let cmds = device_shell(&id, "ls /");
        assert_eq!(
            cmds.iter().map(HostCommand::to_wire).collect::<Vec<_>>(),
            vec!["host:transport:A", "shell:ls /"]
        );
    }
}
