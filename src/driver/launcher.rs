//! Spawning the `vz` runner.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{Error, Result};
use crate::runner::HypervisorKind;

/// Everything needed to launch one runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub binary: PathBuf,
    pub pid_file: PathBuf,
    pub hypervisor: HypervisorKind,
    /// Serialized `VirtualMachineConfig`.
    pub config_json: String,
    /// Receives the runner's stdout and stderr.
    pub log_file: PathBuf,
}

impl LaunchRequest {
    /// Runner arguments, in order.
    pub fn args(&self) -> Vec<String> {
        vec![
            "--pid".to_string(),
            self.pid_file.display().to_string(),
            "--hypervisor".to_string(),
            self.hypervisor.as_str().to_string(),
            self.config_json.clone(),
        ]
    }
}

/// A runner the supervisor has spawned but not yet let go of.
#[derive(Debug)]
pub struct SpawnedRunner {
    pid: u32,
    child: Option<Child>,
}

impl SpawnedRunner {
    /// A runner known only by its pid.
    pub fn from_pid(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Give up ownership of the child without waiting for or killing it.
    pub fn release(mut self) {
        if let Some(child) = self.child.take() {
            tracing::debug!(pid = child.id(), "released runner process");
        }
    }
}

/// Capability to start a runner process.
pub trait RunnerLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<SpawnedRunner>;
}

/// Launches the runner as a detached child of this process.
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl RunnerLauncher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<SpawnedRunner> {
        let spawn_error = |source: io::Error| Error::Spawn {
            binary: request.binary.clone(),
            source,
        };

        let stdout = open_log(&request.log_file).map_err(spawn_error)?;
        let stderr = stdout.try_clone().map_err(spawn_error)?;

        let mut cmd = Command::new(&request.binary);
        cmd.args(request.args())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // SAFETY: setsid is async-signal-safe. The runner leads its own
        // session so terminal signals aimed at the supervisor never reach it.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        tracing::debug!(
            binary = %request.binary.display(),
            pid_file = %request.pid_file.display(),
            hypervisor = %request.hypervisor,
            "spawning runner"
        );

        let child = cmd.spawn().map_err(spawn_error)?;
        Ok(SpawnedRunner {
            pid: child.id(),
            child: Some(child),
        })
    }
}

fn open_log(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(binary: &str, dir: &Path) -> LaunchRequest {
        LaunchRequest {
            binary: binary.into(),
            pid_file: dir.join("vz.pid"),
            hypervisor: HypervisorKind::Idle,
            config_json: "{}".into(),
            log_file: dir.join("vz.log"),
        }
    }

    #[test]
    fn test_args() {
        let req = request("vz", Path::new("/m"));
        assert_eq!(
            req.args(),
            vec!["--pid", "/m/vz.pid", "--hypervisor", "idle", "{}"]
        );
    }

    #[test]
    fn test_launch_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessLauncher
            .launch(&request("/nonexistent/vz", dir.path()))
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_launch_detaches_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessLauncher
            .launch(&request("/bin/echo", dir.path()))
            .unwrap();
        assert!(runner.pid() > 0);
        let pid = runner.pid();
        runner.release();

        let log = dir.path().join("vz.log");
        let written = crate::util::wait_for(50, std::time::Duration::from_millis(20), || {
            std::fs::read_to_string(&log)
                .map(|s| s.contains("--hypervisor idle"))
                .unwrap_or(false)
        });
        assert!(written, "runner output should reach {}", log.display());

        // Reap the released child so it does not linger as a zombie.
        unsafe {
            libc::waitpid(pid as libc::pid_t, std::ptr::null_mut(), 0);
        }
    }
}
