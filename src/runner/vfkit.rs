//! Virtualization.framework backend driven through `vfkit`.
//!
//! Each [`DeviceConfig`] is translated independently into one `vfkit`
//! `--device` argument; the runner then supervises the `vfkit` child.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use vz_config::{DeviceConfig, HardwareAddr, SerialAttachment, VirtualMachineConfig};

use super::hypervisor::{Hypervisor, StartCompletion, VirtualMachine, VmState};
use crate::error::{Error, Result};

/// How long `vfkit` must survive before the start is considered successful.
const START_SETTLE: Duration = Duration::from_secs(1);

/// Poll interval of the child monitor.
const MONITOR_INTERVAL: Duration = Duration::from_millis(200);

/// How long a graceful stop may take before it is declared failed.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Common install locations (Homebrew on Apple Silicon and Intel).
const VFKIT_CANDIDATES: &[&str] = &["/opt/homebrew/bin/vfkit", "/usr/local/bin/vfkit"];

/// Builds machines backed by a `vfkit` child process.
#[derive(Debug, Default)]
pub struct VfkitHypervisor {
    binary: Option<PathBuf>,
}

impl VfkitHypervisor {
    /// Use `binary`, or search `PATH` and common locations when `None`.
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(binary) = &self.binary {
            if binary.exists() {
                return Ok(binary.clone());
            }
            return Err(Error::Config(format!(
                "vfkit binary not found: {}",
                binary.display()
            )));
        }

        if let Ok(path_var) = std::env::var("PATH") {
            for dir in std::env::split_paths(&path_var) {
                let candidate = dir.join("vfkit");
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        VFKIT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or_else(|| {
                Error::Config("vfkit binary not found; install it with: brew install vfkit".into())
            })
    }
}

impl Hypervisor for VfkitHypervisor {
    fn name(&self) -> &'static str {
        "vfkit"
    }

    fn build(&self, config: &VirtualMachineConfig) -> Result<Box<dyn VirtualMachine>> {
        config.validate()?;
        check_paths(config)?;

        let program = self.resolve_binary()?;
        let args = command_line(config);
        let stdio_console = config.devices().iter().any(|d| {
            matches!(
                d,
                DeviceConfig::SerialConsole {
                    attachment: SerialAttachment::Stdio
                }
            )
        });

        tracing::debug!(program = %program.display(), ?args, "built vfkit machine");

        let (state, _) = watch::channel(VmState::Stopped);
        Ok(Box::new(VfkitMachine {
            program,
            args,
            stdio_console,
            child: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
        }))
    }
}

/// Every file the guest needs must exist before `vfkit` is started.
fn check_paths(config: &VirtualMachineConfig) -> Result<()> {
    let require = |path: &Path, what: &str| {
        if path.exists() {
            Ok(())
        } else {
            Err(Error::Config(format!("{} not found: {}", what, path.display())))
        }
    };

    require(&config.kernel, "kernel")?;
    if !config.initrd.as_os_str().is_empty() {
        require(&config.initrd, "initrd")?;
    }
    for disk in &config.disks {
        require(&disk.path, "disk image")?;
    }
    for share in &config.shared_directories {
        require(&share.host_path, "shared directory")?;
    }
    Ok(())
}

/// Translate a configuration into `vfkit` arguments.
pub fn command_line(config: &VirtualMachineConfig) -> Vec<String> {
    let mut args = vec![
        "--cpus".to_string(),
        config.cpu_count.to_string(),
        "--memory".to_string(),
        config.memory_mb.to_string(),
        "--bootloader".to_string(),
        bootloader_arg(config),
    ];

    for device in config.devices() {
        args.push("--device".to_string());
        args.push(device_arg(&device));
    }

    args
}

fn bootloader_arg(config: &VirtualMachineConfig) -> String {
    let mut arg = format!("linux,kernel={}", config.kernel.display());
    if !config.initrd.as_os_str().is_empty() {
        arg.push_str(&format!(",initrd={}", config.initrd.display()));
    }
    arg.push_str(&format!(",cmdline=\"{}\"", config.command_line.trim()));
    arg
}

fn device_arg(device: &DeviceConfig) -> String {
    match device {
        DeviceConfig::BlockStorage { path, read_only } => {
            let mut arg = format!("virtio-blk,path={}", path.display());
            if *read_only {
                arg.push_str(",readonly");
            }
            arg
        }
        DeviceConfig::Network { mac_address } => {
            // Not persisted at this layer
            let mac = if mac_address.is_empty() {
                HardwareAddr::random_locally_administered()
            } else {
                *mac_address
            };
            format!("virtio-net,nat,mac={}", mac)
        }
        DeviceConfig::Entropy => "virtio-rng".to_string(),
        DeviceConfig::DirectoryShare { host_path, tag } => {
            format!("virtio-fs,sharedDir={},mountTag={}", host_path.display(), tag)
        }
        DeviceConfig::SerialConsole { attachment } => match attachment {
            SerialAttachment::Stdio => "virtio-serial,stdio".to_string(),
            SerialAttachment::File(path) => {
                format!("virtio-serial,logFilePath={}", path.display())
            }
        },
    }
}

struct VfkitMachine {
    program: PathBuf,
    args: Vec<String>,
    stdio_console: bool,
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<watch::Sender<VmState>>,
}

impl VfkitMachine {
    fn spawn(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if !self.stdio_console {
            cmd.stdin(Stdio::null());
        }
        cmd.spawn().map_err(|source| Error::Spawn {
            binary: self.program.clone(),
            source,
        })
    }
}

impl VirtualMachine for VfkitMachine {
    fn start(&mut self) -> StartCompletion {
        let (tx, rx) = oneshot::channel();
        self.state.send_replace(VmState::Starting);

        let child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state.send_replace(VmState::Error);
                let _ = tx.send(Err(e));
                return rx;
            }
        };
        tracing::info!(pid = child.id(), "vfkit started");
        *self.child.lock() = Some(child);

        let child = Arc::clone(&self.child);
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || monitor(child, state, tx));

        rx
    }

    fn request_stop(&mut self) -> Result<bool> {
        let mut guard = self.child.lock();
        let Some(child) = guard.as_mut() else {
            return Ok(true);
        };

        if let Some(status) = child.try_wait()? {
            tracing::warn!(?status, "vfkit already exited before stop request");
            self.state.send_replace(VmState::Stopped);
            return Ok(status.success());
        }

        self.state.send_replace(VmState::Stopping);
        let pid = child.id() as libc::pid_t;
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let start = Instant::now();
        while start.elapsed() < STOP_TIMEOUT {
            if let Some(status) = child.try_wait()? {
                tracing::info!(?status, "vfkit exited");
                self.state.send_replace(VmState::Stopped);
                return Ok(true);
            }
            std::thread::sleep(MONITOR_INTERVAL);
        }

        tracing::warn!(pid, "vfkit did not stop in time, killing it");
        let _ = child.kill();
        let _ = child.wait();
        self.state.send_replace(VmState::Error);
        Ok(false)
    }

    fn state_changes(&self) -> watch::Receiver<VmState> {
        self.state.subscribe()
    }
}

/// Report the start outcome, then track unexpected exits.
fn monitor(
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<watch::Sender<VmState>>,
    started: oneshot::Sender<Result<()>>,
) {
    let poll = |child: &Arc<Mutex<Option<Child>>>| -> Option<std::process::ExitStatus> {
        child.lock().as_mut().and_then(|c| c.try_wait().ok().flatten())
    };

    let deadline = Instant::now() + START_SETTLE;
    let mut started = Some(started);
    while Instant::now() < deadline {
        if let Some(status) = poll(&child) {
            state.send_replace(VmState::Error);
            if let Some(tx) = started.take() {
                let _ = tx.send(Err(Error::Start(format!("vfkit exited early: {}", status))));
            }
            return;
        }
        std::thread::sleep(MONITOR_INTERVAL);
    }

    state.send_replace(VmState::Running);
    if let Some(tx) = started.take() {
        let _ = tx.send(Ok(()));
    }

    loop {
        std::thread::sleep(MONITOR_INTERVAL);
        // request_stop holds the lock while it owns the shutdown
        let mut guard = child.lock();
        let current = *state.borrow();
        if current != VmState::Running {
            return;
        }
        if let Some(status) = guard.as_mut().and_then(|c| c.try_wait().ok().flatten()) {
            tracing::warn!(?status, "vfkit exited unexpectedly");
            let next = if status.success() {
                VmState::Stopped
            } else {
                VmState::Error
            };
            state.send_replace(next);
            return;
        }
    }
}
