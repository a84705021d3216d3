//! Persisted machine configuration.
//!
//! Each machine lives in its own directory under the storage root. The
//! driver's settings for it, including the generated MAC address and the
//! cached IP, are kept in `machine.toml` there.

use crate::error::{Error, Result};
use crate::runner::HypervisorKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vz_config::HardwareAddr;

/// Machine configuration file name.
pub const MACHINE_CONFIG_FILE: &str = "machine.toml";

/// Directory under the home directory that holds all machines.
const STORAGE_DIR: &str = ".vzdriver/machines";

pub const DEFAULT_CPUS: u32 = 1;
pub const DEFAULT_MEMORY_MB: u64 = 1024;
pub const DEFAULT_DISK_SIZE_MB: u64 = 20000;
pub const DEFAULT_SSH_USER: &str = "docker";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// vmnet's DHCP lease database on macOS.
pub const DEFAULT_LEASES_FILE: &str = "/var/db/dhcpd_leases";

/// Default storage root: `~/.vzdriver/machines`.
pub fn default_storage_root() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(STORAGE_DIR))
        .ok_or_else(|| Error::ConfigLoad("could not determine home directory".into()))
}

/// Settings supplied by the host orchestrator when a machine is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFlags {
    /// vCPUs; `-1` uses every CPU of the host.
    pub cpu_count: i32,
    pub memory_size_mb: u64,
    pub disk_size_mb: u64,
    pub boot2docker_url: String,
    pub no_share_directory: bool,
    /// Already-extracted kernel image.
    pub kernel: Option<PathBuf>,
    /// Already-extracted initial ramdisk.
    pub initrd: Option<PathBuf>,
    /// Kernel options extracted from the boot image.
    pub cmdline: String,
    pub runner: Option<PathBuf>,
    pub hypervisor: HypervisorKind,
}

impl Default for CreateFlags {
    fn default() -> Self {
        Self {
            cpu_count: DEFAULT_CPUS as i32,
            memory_size_mb: DEFAULT_MEMORY_MB,
            disk_size_mb: DEFAULT_DISK_SIZE_MB,
            boot2docker_url: String::new(),
            no_share_directory: false,
            kernel: None,
            initrd: None,
            cmdline: String::new(),
            runner: None,
            hypervisor: HypervisorKind::default(),
        }
    }
}

/// Persisted driver state for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,

    /// Creation timestamp.
    #[serde(default)]
    pub created_at: String,

    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// Memory in MiB.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Raw disk size in MB.
    #[serde(default = "default_disk_size_mb")]
    pub disk_size_mb: u64,

    #[serde(default)]
    pub boot2docker_url: String,

    /// Kernel file name inside the machine directory.
    #[serde(default)]
    pub kernel: String,

    /// Initrd file name inside the machine directory.
    #[serde(default)]
    pub initrd: String,

    /// Kernel options extracted from the boot image.
    #[serde(default)]
    pub cmdline: String,

    /// Share the user's home directory with the guest.
    #[serde(default = "default_true")]
    pub share_directory: bool,

    /// Persisted once generated so the guest keeps its DHCP lease.
    #[serde(default)]
    pub mac_address: HardwareAddr,

    /// Cached guest IP; cleared on every start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Private key for guest provisioning; ssh defaults when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,

    /// Runner executable; `vz` from PATH when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<PathBuf>,

    #[serde(default)]
    pub hypervisor: HypervisorKind,

    #[serde(default = "default_leases_file")]
    pub leases_file: PathBuf,
}

fn default_cpus() -> u32 {
    DEFAULT_CPUS
}

fn default_memory_mb() -> u64 {
    DEFAULT_MEMORY_MB
}

fn default_disk_size_mb() -> u64 {
    DEFAULT_DISK_SIZE_MB
}

fn default_true() -> bool {
    true
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_leases_file() -> PathBuf {
    PathBuf::from(DEFAULT_LEASES_FILE)
}

impl MachineConfig {
    /// Create a machine record with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: crate::util::current_timestamp(),
            cpus: DEFAULT_CPUS,
            memory_mb: DEFAULT_MEMORY_MB,
            disk_size_mb: DEFAULT_DISK_SIZE_MB,
            boot2docker_url: String::new(),
            kernel: String::new(),
            initrd: String::new(),
            cmdline: String::new(),
            share_directory: true,
            mac_address: HardwareAddr::empty(),
            ip_address: None,
            ssh_user: default_ssh_user(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_key: None,
            runner: None,
            hypervisor: HypervisorKind::default(),
            leases_file: default_leases_file(),
        }
    }

    /// Apply orchestrator flags.
    ///
    /// Kernel and initrd are reduced to file names; `create` copies them into
    /// the machine directory.
    pub fn apply_flags(&mut self, flags: &CreateFlags) -> Result<()> {
        self.cpus = match flags.cpu_count {
            -1 => std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(DEFAULT_CPUS),
            n if n >= 1 => n as u32,
            n => {
                return Err(Error::Config(format!(
                    "invalid CPU count {} (use -1 for all host CPUs)",
                    n
                )))
            }
        };

        if flags.memory_size_mb == 0 {
            return Err(Error::Config("memory size must be at least 1 MB".into()));
        }
        if flags.disk_size_mb == 0 {
            return Err(Error::Config("disk size must be at least 1 MB".into()));
        }

        self.memory_mb = flags.memory_size_mb;
        self.disk_size_mb = flags.disk_size_mb;
        self.boot2docker_url = flags.boot2docker_url.clone();
        self.share_directory = !flags.no_share_directory;
        let kernel = file_name(flags.kernel.as_deref());
        let initrd = file_name(flags.initrd.as_deref());
        if !kernel.is_empty() && kernel == initrd {
            return Err(Error::Config(format!(
                "kernel and initrd are both named {}",
                kernel
            )));
        }
        let reserved = self.reserved_file_names();
        for name in [&kernel, &initrd] {
            if reserved.iter().any(|r| r == name) {
                return Err(Error::Config(format!(
                    "{} clashes with a machine directory file",
                    name
                )));
            }
        }

        self.kernel = kernel;
        self.initrd = initrd;
        self.cmdline = flags.cmdline.trim().to_string();
        self.runner = flags.runner.clone();
        self.hypervisor = flags.hypervisor;
        Ok(())
    }

    /// Files the driver keeps in the machine directory.
    fn reserved_file_names(&self) -> [String; 6] {
        [
            MACHINE_CONFIG_FILE.to_string(),
            crate::driver::ISO_FILE_NAME.to_string(),
            crate::driver::LOG_FILE_NAME.to_string(),
            crate::driver::CONSOLE_LOG_FILE_NAME.to_string(),
            crate::pidfile::PID_FILE_NAME.to_string(),
            format!("{}.rawdisk", self.name),
        ]
    }

    /// Load the configuration stored in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MACHINE_CONFIG_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.display().to_string());
                return Err(Error::MachineNotFound(name));
            }
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };

        toml::from_str(&text).map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))
    }

    /// Save the configuration into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(dir.join(MACHINE_CONFIG_FILE), text)
            .map_err(|e| Error::ConfigSave(e.to_string()))
    }
}

fn file_name(path: Option<&Path>) -> String {
    path.and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
