//! Lifecycle supervisor for one machine.
//!
//! The [`Driver`] never keeps a handle to the runner. Every call re-derives
//! the runner's pid from the PID file and checks it against the process
//! table, so the file is the single source of truth:
//!
//! ```text
//!   Stopped ──start──► Running ──stop/kill──► Stopped
//!      ▲                  │
//!      └──start (stale)── Error ◄── pid gone or not `vz`
//! ```
//!
//! The supervisor reads the PID file and deletes it only when it is stale.

mod launcher;
mod state;

use std::path::{Path, PathBuf};
use std::time::Duration;

use vz_config::{
    DiskConfig, HardwareAddr, NetworkInterface, SharedDirectory, VirtualMachineConfig,
};

use crate::config::{CreateFlags, MachineConfig, MACHINE_CONFIG_FILE};
use crate::error::{Error, Result};
use crate::pidfile::{self, PID_FILE_NAME};
use crate::process::{self, ProcessTable, RunnerSignal, SystemProcessTable};
use crate::provision::{GuestProvisioner, SshProvisioner, SshTarget};
use crate::runner::RUNNER_BINARY;
use crate::util::wait_for;

pub use launcher::{LaunchRequest, ProcessLauncher, RunnerLauncher, SpawnedRunner};
pub use state::MachineState;

/// Kernel options prepended to the boot image's own.
pub const BASE_CMDLINE: &str = "irqaffinity=0 module_blacklist=vboxguest,vboxsf";

/// Boot image name inside the machine directory.
pub const ISO_FILE_NAME: &str = "boot2docker.iso";

/// Runner output inside the machine directory.
pub const LOG_FILE_NAME: &str = "vz.log";

/// Guest serial console log inside the machine directory.
pub const CONSOLE_LOG_FILE_NAME: &str = "console.log";

/// Tag under which the home directory is shared.
pub const HOME_SHARE_TAG: &str = "Home";

/// Docker daemon port inside the guest.
pub const DOCKER_PORT: u16 = 2376;

pub const IP_ATTEMPTS: u32 = 30;
pub const IP_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for a signalled runner to leave the process table.
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of stale PID file reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No PID file.
    Clean,
    /// The PID file belongs to a live runner and was left alone.
    AlreadyRunning,
    /// A stale PID file was deleted.
    Removed,
}

/// Supervisor for a single machine directory.
pub struct Driver {
    dir: PathBuf,
    config: MachineConfig,
    processes: Box<dyn ProcessTable>,
    launcher: Box<dyn RunnerLauncher>,
    provisioner: Box<dyn GuestProvisioner>,
    ip_attempts: u32,
    ip_interval: Duration,
    exit_timeout: Duration,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Create a driver backed by the host's process table, `ssh` and the
    /// `vz` runner.
    pub fn new(dir: impl Into<PathBuf>, config: MachineConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            processes: Box::new(SystemProcessTable::new()),
            launcher: Box::new(ProcessLauncher),
            provisioner: Box::new(SshProvisioner::new()),
            ip_attempts: IP_ATTEMPTS,
            ip_interval: IP_INTERVAL,
            exit_timeout: EXIT_TIMEOUT,
        }
    }

    /// Load the machine stored in `dir`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let config = MachineConfig::load(&dir)?;
        Ok(Self::new(dir, config))
    }

    pub fn with_process_table(mut self, processes: impl ProcessTable + 'static) -> Self {
        self.processes = Box::new(processes);
        self
    }

    pub fn with_launcher(mut self, launcher: impl RunnerLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_provisioner(mut self, provisioner: impl GuestProvisioner + 'static) -> Self {
        self.provisioner = Box::new(provisioner);
        self
    }

    /// Override the DHCP lease polling policy.
    pub fn with_ip_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.ip_attempts = attempts.max(1);
        self.ip_interval = interval;
        self
    }

    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MachineConfig {
        &mut self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the machine configuration.
    pub fn save(&self) -> Result<()> {
        self.config.save(&self.dir)
    }

    /// Resolve a file name inside the machine directory.
    pub fn store_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.dir.join(file)
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.store_path(PID_FILE_NAME)
    }

    pub fn disk_path(&self) -> PathBuf {
        self.store_path(format!("{}.rawdisk", self.config.name))
    }

    fn runner_binary(&self) -> PathBuf {
        self.config
            .runner
            .clone()
            .unwrap_or_else(|| PathBuf::from(RUNNER_BINARY))
    }

    /// Executable name the runner shows in the process table.
    fn runner_name(&self) -> String {
        self.config
            .runner
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| RUNNER_BINARY.to_string())
    }

    /// Current state, derived from the PID file and the process table.
    pub fn state(&self) -> Result<MachineState> {
        let path = self.pid_file_path();
        match pidfile::read_pid(&path) {
            Ok(None) => Ok(MachineState::Stopped),
            Ok(Some(pid)) => Ok(self.state_of(pid)),
            Err(e) => {
                tracing::error!(error = %e, "unusable PID file");
                Ok(MachineState::Error)
            }
        }
    }

    fn state_of(&self, pid: i32) -> MachineState {
        let expected = self.runner_name();
        match self.processes.lookup(pid) {
            Ok(Some(info)) if info.is_executable(&expected) => MachineState::Running,
            Ok(Some(info)) => {
                tracing::debug!(
                    pid,
                    executable = %info.executable,
                    "pid is stale and is being used by another program"
                );
                MachineState::Error
            }
            Ok(None) => {
                tracing::error!(pid, "{} process not found", expected);
                MachineState::Error
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "process lookup failed");
                MachineState::Error
            }
        }
    }

    /// Pid of the live runner, or an [`Error::InvalidState`].
    fn running_pid(&self) -> Result<i32> {
        match pidfile::read_pid(&self.pid_file_path()) {
            Ok(Some(pid)) => match self.state_of(pid) {
                MachineState::Running => Ok(pid),
                other => Err(Error::not_running(other)),
            },
            Ok(None) => Err(Error::not_running(MachineState::Stopped)),
            Err(e) => {
                tracing::error!(error = %e, "unusable PID file");
                Err(Error::not_running(MachineState::Error))
            }
        }
    }

    /// Delete a stale PID file left behind by a runner that did not exit
    /// cleanly. A file owned by a live runner is left alone.
    pub fn recover_from_unclean_shutdown(&self) -> Result<Recovery> {
        let path = self.pid_file_path();
        let Some(pid) = pidfile::read_pid(&path)? else {
            tracing::debug!(path = %path.display(), "clean start, PID file doesn't exist");
            return Ok(Recovery::Clean);
        };

        tracing::warn!(path = %path.display(), "PID file still exists");
        let state = self.state_of(pid);
        tracing::debug!(pid, %state, "state of recorded runner");
        if state == MachineState::Running {
            return Ok(Recovery::AlreadyRunning);
        }

        tracing::debug!(path = %path.display(), "removing stale PID file");
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(Recovery::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Recovery::Removed),
            Err(e) => Err(Error::stale(&path, e)),
        }
    }

    /// Assemble the configuration the runner boots from.
    ///
    /// Generates and records a MAC address if none is persisted yet.
    pub fn generate_vm_config(&mut self) -> Result<VirtualMachineConfig> {
        if self.config.kernel.is_empty() || self.config.initrd.is_empty() {
            return Err(Error::Config(format!(
                "machine {} has no kernel or initrd",
                self.config.name
            )));
        }

        if self.config.mac_address.is_empty() {
            self.config.mac_address = HardwareAddr::random_locally_administered();
            tracing::info!(mac = %self.config.mac_address, "generated hardware address");
        }

        let mut shared_directories = Vec::new();
        if self.config.share_directory {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
            shared_directories.push(SharedDirectory {
                host_path: home,
                tag: HOME_SHARE_TAG.to_string(),
            });
        }

        let command_line = format!("{} {}", BASE_CMDLINE, self.config.cmdline)
            .trim_end()
            .to_string();

        Ok(VirtualMachineConfig {
            kernel: self.store_path(&self.config.kernel),
            initrd: self.store_path(&self.config.initrd),
            command_line,
            cpu_count: self.config.cpus,
            memory_mb: self.config.memory_mb,
            disks: vec![
                DiskConfig {
                    path: self.store_path(ISO_FILE_NAME),
                    read_only: true,
                },
                DiskConfig {
                    path: self.disk_path(),
                    read_only: false,
                },
            ],
            network_interfaces: vec![NetworkInterface {
                mac_address: self.config.mac_address,
            }],
            shared_directories,
            serial_ports: vec![self
                .store_path(CONSOLE_LOG_FILE_NAME)
                .display()
                .to_string()],
        })
    }

    /// Start the runner.
    ///
    /// A live runner left from an earlier start makes this a no-op. Spawn
    /// failures are fatal. A provisioning failure is returned, but the VM
    /// stays up.
    pub fn start(&mut self) -> Result<()> {
        if self.recover_from_unclean_shutdown()? == Recovery::AlreadyRunning {
            tracing::info!(machine = %self.config.name, "runner already running");
            return Ok(());
        }

        self.config.ip_address = None;
        let vm_config = self.generate_vm_config()?;
        self.save()?;

        let request = LaunchRequest {
            binary: self.runner_binary(),
            pid_file: self.pid_file_path(),
            hypervisor: self.config.hypervisor,
            config_json: vm_config.to_json()?,
            log_file: self.store_path(LOG_FILE_NAME),
        };
        tracing::debug!(config = %request.config_json, "runner configuration");

        let runner = self.launcher.launch(&request)?;
        tracing::info!(machine = %self.config.name, pid = runner.pid(), "runner started");

        let provisioned = self.mount_shared_directories(&vm_config);
        runner.release();
        provisioned
    }

    fn mount_shared_directories(&mut self, vm_config: &VirtualMachineConfig) -> Result<()> {
        if vm_config.shared_directories.is_empty() {
            return Ok(());
        }

        let host = self
            .discover_ip()
            .map_err(|e| Error::Provision(e.to_string()))?;
        self.config.ip_address = Some(host.clone());
        self.save()?;

        let target = SshTarget {
            host,
            port: self.config.ssh_port,
            user: self.config.ssh_user.clone(),
            key: self.config.ssh_key.clone(),
        };
        self.provisioner
            .mount_shared_directories(&target, &vm_config.shared_directories)
    }

    /// Ask the runner to shut down gracefully. Does not wait.
    pub fn stop(&self) -> Result<()> {
        self.interrupt().map(|_| ())
    }

    fn interrupt(&self) -> Result<i32> {
        let pid = self.running_pid()?;
        self.processes.signal(pid, RunnerSignal::Interrupt)?;
        tracing::info!(machine = %self.config.name, pid, "stop requested");
        Ok(pid)
    }

    /// Terminate the runner forcefully.
    ///
    /// A killed runner cannot remove its PID file, so it is cleared here
    /// once the process is gone.
    pub fn kill(&self) -> Result<()> {
        let pid = self.running_pid()?;
        self.processes.signal(pid, RunnerSignal::Kill)?;
        tracing::info!(machine = %self.config.name, pid, "runner killed");

        if process::wait_for_exit(self.processes.as_ref(), pid, self.exit_timeout) {
            self.clear_pid_file(pid)?;
        } else {
            tracing::warn!(pid, "runner still present after SIGKILL");
        }
        Ok(())
    }

    /// Remove the PID file if it still records `pid`.
    fn clear_pid_file(&self, pid: i32) -> Result<()> {
        let path = self.pid_file_path();
        match pidfile::read_pid(&path) {
            Ok(Some(recorded)) if recorded == pid => match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::stale(&path, e)),
            },
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop, wait for the runner to exit, then start.
    ///
    /// Nothing is started if the stop fails.
    pub fn restart(&mut self) -> Result<()> {
        let pid = self.interrupt()?;
        if !process::wait_for_exit(self.processes.as_ref(), pid, self.exit_timeout) {
            return Err(Error::GracefulStopFailure(format!(
                "runner {} still running after {}",
                pid,
                humantime::format_duration(self.exit_timeout)
            )));
        }
        self.start()
    }

    /// Make sure no runner is left behind.
    ///
    /// A failed graceful stop falls back to [`Driver::kill`]. A runner that
    /// is already gone counts as removed.
    pub fn remove(&self) -> Result<()> {
        let state = self.state()?;
        if state != MachineState::Running {
            tracing::debug!(%state, "nothing to stop");
            return Ok(());
        }
        let pid = self.running_pid()?;

        let Err(stop_error) = self.stop() else {
            return Ok(());
        };
        tracing::warn!(error = %stop_error, "graceful stop failed, killing runner");

        match self.kill() {
            Ok(()) => Ok(()),
            Err(Error::ProcessLookup { .. }) | Err(Error::InvalidState { .. })
                if self.state_of(pid) != MachineState::Running =>
            {
                tracing::debug!(pid, "runner already gone");
                self.clear_pid_file(pid)
            }
            Err(e) => Err(e),
        }
    }

    /// Guest IP address, from the cache or the DHCP lease file.
    pub fn ip(&mut self) -> Result<String> {
        self.running_pid()?;

        if let Some(ip) = &self.config.ip_address {
            return Ok(ip.clone());
        }

        let ip = self.discover_ip()?;
        self.config.ip_address = Some(ip.clone());
        self.save()?;
        Ok(ip)
    }

    fn discover_ip(&self) -> Result<String> {
        let leases = &self.config.leases_file;
        let mac = &self.config.mac_address;

        let mut found = None;
        wait_for(self.ip_attempts, self.ip_interval, || {
            match crate::leases::lookup_ip(leases, mac) {
                Ok(ip) => {
                    found = Some(ip);
                    true
                }
                Err(e) => {
                    tracing::debug!(error = %e, "lease lookup failed");
                    false
                }
            }
        });

        found.ok_or_else(|| Error::IpNotFound {
            mac: mac.to_string(),
            leases: leases.clone(),
        })
    }

    /// Docker endpoint of the guest.
    pub fn url(&mut self) -> Result<String> {
        Ok(format!("tcp://{}:{}", self.ip()?, DOCKER_PORT))
    }

    /// Lay out a new machine directory and start the machine.
    ///
    /// The boot image, kernel and initrd must already be on the host.
    pub fn create(&mut self, flags: &CreateFlags) -> Result<()> {
        if self.store_path(MACHINE_CONFIG_FILE).exists() {
            return Err(Error::MachineExists(self.config.name.clone()));
        }
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::storage("create machine directory", e))?;

        tracing::info!(machine = %self.config.name, "copying boot image");
        let iso = local_source(&flags.boot2docker_url, "boot image")?;
        copy_into(&iso, &self.store_path(ISO_FILE_NAME))?;

        tracing::info!("copying kernel and initrd");
        let kernel = flags
            .kernel
            .as_deref()
            .ok_or_else(|| Error::Config("no kernel image given".into()))?;
        let initrd = flags
            .initrd
            .as_deref()
            .ok_or_else(|| Error::Config("no initrd image given".into()))?;
        copy_into(kernel, &self.store_path(&self.config.kernel))?;
        copy_into(initrd, &self.store_path(&self.config.initrd))?;

        create_raw_disk(&self.disk_path(), self.config.disk_size_mb)?;
        self.save()?;

        self.start()
    }
}

/// Resolve a boot image reference to a local file.
fn local_source(reference: &str, what: &str) -> Result<PathBuf> {
    if reference.is_empty() {
        return Err(Error::Config(format!("no {} given", what)));
    }
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Err(Error::Config(format!(
            "downloading the {} is not supported: {}",
            what, reference
        )));
    }

    let path = PathBuf::from(reference.strip_prefix("file://").unwrap_or(reference));
    if !path.is_file() {
        return Err(Error::Config(format!(
            "{} not found: {}",
            what,
            path.display()
        )));
    }
    Ok(path)
}

fn copy_into(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_file() {
        return Err(Error::Config(format!("{} not found", src.display())));
    }
    tracing::debug!(src = %src.display(), dest = %dest.display(), "copying");
    std::fs::copy(src, dest)
        .map_err(|e| Error::storage("copy", format!("{}: {}", src.display(), e)))?;
    Ok(())
}

/// Create the sparse read-write data disk. Never overwrites.
fn create_raw_disk(path: &Path, size_mb: u64) -> Result<()> {
    use std::fs::OpenOptions;

    if size_mb == 0 {
        return Err(Error::Config("disk size must be at least 1 MB".into()));
    }

    tracing::info!(path = %path.display(), size_mb, "creating raw disk image");
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::storage("create disk", format!("{}: {}", path.display(), e)))?;
    file.set_len(size_mb * 1_000_000)
        .map_err(|e| Error::storage("resize disk", e))?;
    file.sync_all()?;
    Ok(())
}
