//! Error types for the vz driver and runner.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the lifecycle supervisor and the VM runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The PID file slot is already taken.
    #[error("PID file {} already exists: VM may already be running", path.display())]
    ResourceConflict { path: PathBuf },

    /// The signal target could not be found.
    #[error("process {pid} not found: {reason}")]
    ProcessLookup { pid: i32, reason: String },

    /// The VM declined a graceful shutdown.
    #[error("failed to gracefully stop virtual machine: {0}")]
    GracefulStopFailure(String),

    /// A stale PID file could not be read, parsed or removed.
    #[error("reconciling PID file {}: {reason}", path.display())]
    StaleState { path: PathBuf, reason: String },

    /// A lifecycle call was made in the wrong state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The runner process could not be spawned.
    #[error("failed to spawn runner {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The virtual machine failed to start.
    #[error("failed to start VM: {0}")]
    Start(String),

    /// Post-boot provisioning failed; the VM is left running.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// No DHCP lease matched the machine's hardware address.
    #[error("IP address for {mac} not found in {}", leases.display())]
    IpNotFound { mac: String, leases: PathBuf },

    /// No machine is stored under the given name.
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    /// A machine with the given name already exists.
    #[error("machine already exists: {0}")]
    MachineExists(String),

    #[error("failed to load machine config: {0}")]
    ConfigLoad(String),

    #[error("failed to save machine config: {0}")]
    ConfigSave(String),

    /// Disk image or machine directory manipulation failed.
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::Storage`] from an operation name and message.
    pub fn storage(operation: impl Into<String>, message: impl ToString) -> Self {
        Error::Storage {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Build a [`Error::StaleState`] for `path`.
    pub fn stale(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::StaleState {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Precondition failure for calls that need a running machine.
    pub fn not_running(actual: impl ToString) -> Self {
        Error::InvalidState {
            expected: "running".to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<vz_config::ConfigError> for Error {
    fn from(e: vz_config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = Error::ResourceConflict {
            path: PathBuf::from("/m/vz.pid"),
        };
        assert_eq!(
            err.to_string(),
            "PID file /m/vz.pid already exists: VM may already be running"
        );

        assert_eq!(
            Error::not_running("stopped").to_string(),
            "invalid state: expected running, got stopped"
        );

        let err = Error::stale("/m/vz.pid", "invalid digit found in string");
        assert!(err.to_string().starts_with("reconciling PID file /m/vz.pid"));
    }
}
