/// Supervisor's view of a machine, derived from the PID file and the
/// process table. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// No PID file.
    Stopped,
    /// The PID file names a live `vz` runner.
    Running,
    /// The PID file is stale, unreadable, or names another program.
    /// Never safe to treat as stopped.
    Error,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineState::Stopped => write!(f, "stopped"),
            MachineState::Running => write!(f, "running"),
            MachineState::Error => write!(f, "error"),
        }
    }
}
