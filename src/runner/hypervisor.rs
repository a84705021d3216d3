//! Hypervisor backend abstraction used by the runner.

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use vz_config::VirtualMachineConfig;

use crate::error::Result;

/// Observed state of a virtual machine inside the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Stopped => write!(f, "stopped"),
            VmState::Starting => write!(f, "starting"),
            VmState::Running => write!(f, "running"),
            VmState::Stopping => write!(f, "stopping"),
            VmState::Error => write!(f, "error"),
        }
    }
}

/// Completion of an asynchronous start request.
pub type StartCompletion = oneshot::Receiver<Result<()>>;

/// A constructed, validated virtual machine.
pub trait VirtualMachine: Send {
    /// Request the VM to start. The outcome arrives on the returned channel.
    fn start(&mut self) -> StartCompletion;

    /// Ask the guest to shut down and block until it has.
    ///
    /// `Ok(false)` means the VM could not be stopped gracefully.
    fn request_stop(&mut self) -> Result<bool>;

    /// Subscribe to state transitions.
    fn state_changes(&self) -> watch::Receiver<VmState>;
}

/// Factory that turns a configuration into a [`VirtualMachine`].
pub trait Hypervisor {
    fn name(&self) -> &'static str;

    /// Translate every device and validate the result.
    fn build(&self, config: &VirtualMachineConfig) -> Result<Box<dyn VirtualMachine>>;
}

/// Backend selection passed to the runner on its command line.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorKind {
    /// Virtualization.framework through the `vfkit` binary.
    #[default]
    Vfkit,
    /// No guest; reaches running immediately and always stops cleanly.
    Idle,
}

impl HypervisorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorKind::Vfkit => "vfkit",
            HypervisorKind::Idle => "idle",
        }
    }
}

impl std::fmt::Display for HypervisorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
