//! Virtual machine configuration shared by the vz driver and runner.
//!
//! The driver builds a [`VirtualMachineConfig`] once per start attempt,
//! serializes it to JSON and hands it to the `vz` runner on its command
//! line. The runner parses it back and translates [`VirtualMachineConfig::devices`]
//! into hypervisor objects.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod mac;

pub use mac::{HardwareAddr, ParseHardwareAddrError};

/// Serial port value that attaches the console to the runner's stdio.
pub const SERIAL_STDIO: &str = "-";

/// Errors produced while decoding or validating a configuration payload.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The payload is not well-formed JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value the runner cannot use.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete description of one virtual machine.
///
/// Immutable once serialized for the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfig {
    /// Linux kernel image.
    pub kernel: PathBuf,
    /// Initial ramdisk.
    pub initrd: PathBuf,
    /// Kernel command line.
    pub command_line: String,
    /// Number of vCPUs.
    pub cpu_count: u32,
    /// Memory in MiB.
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
    /// Block devices, attached in order.
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
    /// Network interfaces, attached in order.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Host directories shared with the guest.
    #[serde(default)]
    pub shared_directories: Vec<SharedDirectory>,
    /// Serial console attachments: [`SERIAL_STDIO`] or a log file path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub serial_ports: Vec<String>,
}

/// A disk image attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

/// A NAT network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Empty means the runner picks a random address that is not persisted.
    #[serde(default, skip_serializing_if = "HardwareAddr::is_empty")]
    pub mac_address: HardwareAddr,
}

/// A host directory exposed to the guest over virtio-fs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDirectory {
    pub host_path: PathBuf,
    /// virtio-fs mount tag seen by the guest.
    pub tag: String,
}

/// One hypervisor device derived from a [`VirtualMachineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConfig {
    BlockStorage { path: PathBuf, read_only: bool },
    Network { mac_address: HardwareAddr },
    SerialConsole { attachment: SerialAttachment },
    DirectoryShare { host_path: PathBuf, tag: String },
    Entropy,
}

/// Where a serial console is connected on the host side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialAttachment {
    Stdio,
    File(PathBuf),
}

impl VirtualMachineConfig {
    /// Decode and validate a configuration received on the command line.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode the configuration for the runner.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the invariants the runner relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_count == 0 {
            return Err(ConfigError::Invalid("cpuCount must be at least 1".into()));
        }
        if self.memory_mb == 0 {
            return Err(ConfigError::Invalid("memoryMB must be at least 1".into()));
        }
        if self.kernel.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("kernel path is required".into()));
        }
        if self.disks.iter().any(|d| d.path.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("disk path must not be empty".into()));
        }
        for share in &self.shared_directories {
            if share.tag.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "shared directory {} has an empty tag",
                    share.host_path.display()
                )));
            }
        }
        Ok(())
    }

    /// Devices in attachment order: disks, network, entropy, shares, consoles.
    pub fn devices(&self) -> Vec<DeviceConfig> {
        let mut devices = Vec::new();

        devices.extend(self.disks.iter().map(|d| DeviceConfig::BlockStorage {
            path: d.path.clone(),
            read_only: d.read_only,
        }));

        devices.extend(self.network_interfaces.iter().map(|n| DeviceConfig::Network {
            mac_address: n.mac_address,
        }));

        devices.push(DeviceConfig::Entropy);

        devices.extend(
            self.shared_directories
                .iter()
                .map(|s| DeviceConfig::DirectoryShare {
                    host_path: s.host_path.clone(),
                    tag: s.tag.clone(),
                }),
        );

        devices.extend(self.serial_ports.iter().map(|port| {
            let attachment = if port == SERIAL_STDIO {
                SerialAttachment::Stdio
            } else {
                SerialAttachment::File(PathBuf::from(port))
            };
            DeviceConfig::SerialConsole { attachment }
        }));

        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VirtualMachineConfig {
        VirtualMachineConfig {
            kernel: "/m/vmlinuz".into(),
            initrd: "/m/initrd.img".into(),
            command_line: "console=hvc0".into(),
            cpu_count: 2,
            memory_mb: 2048,
            disks: vec![
                DiskConfig {
                    path: "/img/boot.iso".into(),
                    read_only: true,
                },
                DiskConfig {
                    path: "/img/disk.raw".into(),
                    read_only: false,
                },
            ],
            network_interfaces: vec![NetworkInterface::default()],
            shared_directories: vec![SharedDirectory {
                host_path: "/Users/me".into(),
                tag: "Home".into(),
            }],
            serial_ports: vec![],
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["cpuCount"], 2);
        assert_eq!(value["memoryMB"], 2048);
        assert_eq!(value["commandLine"], "console=hvc0");
        assert_eq!(value["disks"][0]["readOnly"], true);
        assert_eq!(value["sharedDirectories"][0]["hostPath"], "/Users/me");
        // Unset MAC is omitted rather than encoded as a placeholder
        assert!(value["networkInterfaces"][0].get("macAddress").is_none());
        assert!(value.get("serialPorts").is_none());
    }

    #[test]
    fn test_mac_address_on_the_wire() {
        let mut config = sample();
        config.network_interfaces[0].mac_address = "aa:bb:cc:dd:ee:ff".parse().unwrap();

        let json = config.to_json().unwrap();
        assert!(json.contains("\"macAddress\":\"aa:bb:cc:dd:ee:ff\""));

        let parsed = VirtualMachineConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            VirtualMachineConfig::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            VirtualMachineConfig::from_json(r#"{"kernel":"/k"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = sample();
        config.cpu_count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = sample();
        config.memory_mb = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.shared_directories[0].tag.clear();
        assert!(config.validate().is_err());

        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_devices_order() {
        let mut config = sample();
        config.serial_ports = vec![SERIAL_STDIO.into(), "/tmp/console.log".into()];

        let devices = config.devices();
        assert_eq!(devices.len(), 7);
        assert!(matches!(
            &devices[0],
            DeviceConfig::BlockStorage { read_only: true, .. }
        ));
        assert!(matches!(
            &devices[1],
            DeviceConfig::BlockStorage { read_only: false, .. }
        ));
        assert!(matches!(&devices[2], DeviceConfig::Network { .. }));
        assert_eq!(devices[3], DeviceConfig::Entropy);
        assert!(matches!(&devices[4], DeviceConfig::DirectoryShare { tag, .. } if tag == "Home"));
        assert_eq!(
            devices[5],
            DeviceConfig::SerialConsole {
                attachment: SerialAttachment::Stdio
            }
        );
        assert_eq!(
            devices[6],
            DeviceConfig::SerialConsole {
                attachment: SerialAttachment::File("/tmp/console.log".into())
            }
        );
    }
}
