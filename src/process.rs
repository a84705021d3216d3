//! Process table inspection and signal delivery.
//!
//! The supervisor never holds a handle to the runner after start; it finds
//! the runner through the PID file and this module. [`ProcessTable`] is the
//! seam that lets tests replace the host's process table.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Poll interval used while waiting for a process to exit.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signals the supervisor sends to a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerSignal {
    /// Graceful stop request (SIGINT).
    Interrupt,
    /// Forceful termination (SIGKILL).
    Kill,
}

impl RunnerSignal {
    fn as_raw(self) -> libc::c_int {
        match self {
            RunnerSignal::Interrupt => libc::SIGINT,
            RunnerSignal::Kill => libc::SIGKILL,
        }
    }
}

impl std::fmt::Display for RunnerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerSignal::Interrupt => write!(f, "SIGINT"),
            RunnerSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// What the process table knows about a live process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    /// Executable file name (not the full path).
    pub executable: String,
}

/// Longest process name the Linux kernel reports (`comm`).
const COMM_MAX: usize = 15;

impl ProcessInfo {
    /// Whether this process is an instance of `expected`.
    ///
    /// Accepts the kernel's truncated `comm` form of long executable names.
    pub fn is_executable(&self, expected: &str) -> bool {
        self.executable == expected
            || (self.executable.len() == COMM_MAX && expected.starts_with(&self.executable))
    }
}

/// Capability to resolve process ids and deliver signals.
pub trait ProcessTable: Send + Sync {
    /// Resolve `pid` to a live process. `Ok(None)` means no such process.
    fn lookup(&self, pid: i32) -> Result<Option<ProcessInfo>>;

    /// Deliver `signal` to `pid`.
    fn signal(&self, pid: i32, signal: RunnerSignal) -> Result<()>;
}

/// The host's process table, read through `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    fn lookup(&self, pid: i32) -> Result<Option<ProcessInfo>> {
        use sysinfo::{Pid, ProcessStatus, System};

        if pid <= 0 {
            return Ok(None);
        }

        let mut sys = System::new();
        let pid_obj = Pid::from_u32(pid as u32);
        if !sys.refresh_process(pid_obj) {
            return Ok(None);
        }

        let Some(process) = sys.process(pid_obj) else {
            return Ok(None);
        };

        // An exited but unreaped runner still has a table entry
        if process.status() == ProcessStatus::Zombie {
            tracing::debug!(pid, "process is a zombie");
            return Ok(None);
        }

        let executable = process
            .exe()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_else(|| process.name())
            .to_string();

        Ok(Some(ProcessInfo { pid, executable }))
    }

    fn signal(&self, pid: i32, signal: RunnerSignal) -> Result<()> {
        send_signal(pid, signal)
    }
}

/// Send `signal` to `pid` with `kill(2)`.
pub fn send_signal(pid: libc::pid_t, signal: RunnerSignal) -> Result<()> {
    if pid <= 0 {
        return Err(Error::ProcessLookup {
            pid,
            reason: "invalid process id".to_string(),
        });
    }

    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == 0 {
        tracing::debug!(pid, %signal, "signal delivered");
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(Error::ProcessLookup {
            pid,
            reason: err.to_string(),
        })
    } else {
        Err(Error::Io(err))
    }
}

/// Wait until `pid` disappears from `table`.
///
/// Returns false if it is still present after `timeout`.
pub fn wait_for_exit(table: &dyn ProcessTable, pid: i32, timeout: Duration) -> bool {
    let start = Instant::now();

    loop {
        match table.lookup(pid) {
            Ok(None) => return true,
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::debug!(pid, error = %e, "process lookup failed while waiting for exit");
            }
        }

        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_self() {
        let table = SystemProcessTable::new();
        let pid = std::process::id() as i32;
        let info = table.lookup(pid).unwrap().expect("current process is listed");
        assert_eq!(info.pid, pid);
        assert!(!info.executable.is_empty());
        assert!(!info.is_executable("vz"));
    }

    #[test]
    fn test_lookup_nonexistent() {
        let table = SystemProcessTable::new();
        assert_eq!(table.lookup(99999999).unwrap(), None);
        assert_eq!(table.lookup(-1).unwrap(), None);
    }

    #[test]
    fn test_signal_nonexistent() {
        let err = send_signal(99999999, RunnerSignal::Interrupt).unwrap_err();
        assert!(matches!(err, Error::ProcessLookup { pid: 99999999, .. }));
    }

    #[test]
    fn test_is_executable_truncated_comm() {
        let info = ProcessInfo {
            pid: 1,
            executable: "vzdriver-runner".to_string(),
        };
        assert!(info.is_executable("vzdriver-runner-debug"));
        assert!(!info.is_executable("vz"));

        let info = ProcessInfo {
            pid: 1,
            executable: "vz".to_string(),
        };
        assert!(info.is_executable("vz"));
        assert!(!info.is_executable("vzx"));
    }

    #[test]
    fn test_wait_for_exit_nonexistent() {
        let table = SystemProcessTable::new();
        assert!(wait_for_exit(&table, 99999999, Duration::ZERO));
    }
}
