//! The VM runner: the only process that owns a hypervisor session.
//!
//! Sequence:
//!
//! ```text
//! parse config ─► install signal handlers ─► create PID file (exclusive)
//!     ─► build VM ─► start (await completion) ─► wait for SIGTERM/SIGINT
//!     ─► graceful stop ─► drop PID file ─► exit
//! ```
//!
//! Every failure is fatal. The [`PidFile`] guard is dropped on all return
//! paths, so the file never outlives the runner except after SIGKILL.

pub mod hypervisor;
pub mod idle;
pub mod vfkit;

use std::path::PathBuf;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use vz_config::VirtualMachineConfig;

use crate::error::{Error, Result};
use crate::pidfile::PidFile;
pub use hypervisor::{Hypervisor, HypervisorKind, VirtualMachine, VmState};

/// Name of the runner executable, as the supervisor expects to find it in
/// the process table.
pub const RUNNER_BINARY: &str = "vz";

/// Everything the runner needs from its command line.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Serialized [`VirtualMachineConfig`].
    pub config: String,
    /// Where to record our pid, if anywhere.
    pub pid_file: Option<PathBuf>,
    pub hypervisor: HypervisorKind,
    /// Explicit `vfkit` binary for the vfkit backend.
    pub vfkit: Option<PathBuf>,
}

impl RunnerOptions {
    fn backend(&self) -> Box<dyn Hypervisor> {
        match self.hypervisor {
            HypervisorKind::Vfkit => Box::new(vfkit::VfkitHypervisor::new(self.vfkit.clone())),
            HypervisorKind::Idle => Box::new(idle::IdleHypervisor),
        }
    }
}

/// Signals that request a shutdown. SIGKILL cannot be caught.
struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    /// Must be called inside a runtime context.
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

/// Run one virtual machine until a stop signal arrives.
pub fn run(options: RunnerOptions) -> Result<()> {
    // Malformed input is rejected before any side effect
    let config = VirtualMachineConfig::from_json(&options.config)?;
    tracing::debug!(?config, "parsed VM configuration");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("vz-runner")
        .enable_all()
        .build()?;

    let mut signals = {
        let _enter = runtime.enter();
        ShutdownSignals::install()?
    };

    let _pid_file = match &options.pid_file {
        Some(path) => Some(PidFile::create(path)?),
        None => None,
    };

    let backend = options.backend();
    let mut vm = backend.build(&config)?;
    tracing::info!(
        hypervisor = backend.name(),
        cpus = config.cpu_count,
        memory_mb = config.memory_mb,
        "virtual machine constructed"
    );

    let watcher = runtime.spawn(log_state_changes(vm.state_changes()));

    let started = runtime
        .block_on(vm.start())
        .map_err(|_| Error::Start("start completion dropped".into()))?;
    if let Err(e) = started {
        watcher.abort();
        return Err(e);
    }
    tracing::info!(pid = std::process::id(), "virtual machine started");

    let received = runtime.block_on(signals.recv());
    tracing::info!(signal = received, "received signal");

    let stopped = vm.request_stop();
    watcher.abort();

    match stopped {
        Ok(true) => {
            tracing::info!("virtual machine stopped");
            Ok(())
        }
        Ok(false) => Err(Error::GracefulStopFailure(
            "virtual machine refused to stop".into(),
        )),
        Err(e) => Err(Error::GracefulStopFailure(e.to_string())),
    }
}

/// Log every state transition. Advisory only.
async fn log_state_changes(mut states: watch::Receiver<VmState>) {
    let initial = *states.borrow();
    tracing::debug!(state = %initial, "initial VM state");
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        if state == VmState::Error {
            tracing::warn!(%state, "virtual machine state changed");
        } else {
            tracing::info!(%state, "virtual machine state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pidfile::PID_FILE_NAME;

    fn options(config: &str, pid_file: Option<PathBuf>) -> RunnerOptions {
        RunnerOptions {
            config: config.to_string(),
            pid_file,
            hypervisor: HypervisorKind::Idle,
            vfkit: None,
        }
    }

    const VALID: &str = r#"{"kernel":"/k","initrd":"/i","commandLine":"","cpuCount":1,"memoryMB":128}"#;

    #[test]
    fn test_malformed_config_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join(PID_FILE_NAME);

        let err = run(options("{not json", Some(pid_path.clone()))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_pid_conflict_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join(PID_FILE_NAME);
        std::fs::write(&pid_path, "1").unwrap();

        let err = run(options(VALID, Some(pid_path.clone()))).unwrap_err();
        assert!(matches!(err, Error::ResourceConflict { .. }));
        assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "1");
    }

    #[test]
    fn test_build_failure_removes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join(PID_FILE_NAME);

        let mut opts = options(VALID, Some(pid_path.clone()));
        opts.hypervisor = HypervisorKind::Vfkit;
        // kernel "/k" does not exist, so the backend rejects the config
        let err = run(opts).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!pid_path.exists());
    }
}
