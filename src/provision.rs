//! Post-boot guest provisioning over SSH.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::wait_for;
use vz_config::SharedDirectory;

/// Mount attempts before provisioning gives up.
pub const MOUNT_ATTEMPTS: u32 = 6;

/// Delay between mount attempts.
pub const MOUNT_INTERVAL: Duration = Duration::from_secs(5);

/// Where and as whom to reach the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: Option<PathBuf>,
}

/// Capability to prepare a freshly booted guest.
pub trait GuestProvisioner: Send + Sync {
    /// Mount every shared directory inside the guest at its host path.
    fn mount_shared_directories(&self, target: &SshTarget, shares: &[SharedDirectory])
        -> Result<()>;
}

/// Provisioner that runs commands through the host's `ssh` client.
#[derive(Debug, Clone)]
pub struct SshProvisioner {
    binary: PathBuf,
    attempts: u32,
    interval: Duration,
}

impl Default for SshProvisioner {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            attempts: MOUNT_ATTEMPTS,
            interval: MOUNT_INTERVAL,
        }
    }
}

impl SshProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.interval = interval;
        self
    }

    /// Use a specific `ssh` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn run(&self, target: &SshTarget, script: &str) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(ssh_args(target))
            .arg(script)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::Provision(format!(
            "ssh exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

impl GuestProvisioner for SshProvisioner {
    fn mount_shared_directories(
        &self,
        target: &SshTarget,
        shares: &[SharedDirectory],
    ) -> Result<()> {
        if shares.is_empty() {
            return Ok(());
        }

        let script = mount_script(shares);
        tracing::debug!(host = %target.host, %script, "mounting shared directories");

        let mut last_error = None;
        let mounted = wait_for(self.attempts, self.interval, || match self.run(target, &script) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "mount attempt failed");
                last_error = Some(e);
                false
            }
        });

        if mounted {
            tracing::info!(count = shares.len(), "shared directories mounted");
            return Ok(());
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::Provision(format!(
            "unable to mount shared directories: {}",
            reason
        )))
    }
}

/// Non-interactive client options followed by the destination.
fn ssh_args(target: &SshTarget) -> Vec<String> {
    let mut args: Vec<String> = [
        "-F",
        "/dev/null",
        "-o",
        "BatchMode=yes",
        "-o",
        "ConnectTimeout=10",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "LogLevel=quiet",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(key) = &target.key {
        args.push("-o".into());
        args.push("IdentitiesOnly=yes".into());
        args.push("-i".into());
        args.push(key.display().to_string());
    }

    args.push("-p".into());
    args.push(target.port.to_string());
    args.push(format!("{}@{}", target.user, target.host));
    args
}

/// Shell script that mounts each share at its host path.
pub fn mount_script(shares: &[SharedDirectory]) -> String {
    shares
        .iter()
        .map(|share| {
            let dir = quote(&share.host_path.display().to_string());
            format!(
                "sudo mkdir -p {dir} && sudo mount -t virtiofs {} {dir}",
                quote(&share.tag)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(path: &str, tag: &str) -> SharedDirectory {
        SharedDirectory {
            host_path: path.into(),
            tag: tag.into(),
        }
    }

    fn target() -> SshTarget {
        SshTarget {
            host: "192.168.64.3".into(),
            port: 22,
            user: "docker".into(),
            key: Some("/m/id_rsa".into()),
        }
    }

    #[test]
    fn test_mount_script() {
        let script = mount_script(&[share("/Users/me", "Home"), share("/data dir", "Data")]);
        assert_eq!(
            script,
            "sudo mkdir -p \"/Users/me\" && sudo mount -t virtiofs \"Home\" \"/Users/me\"\n\
             sudo mkdir -p \"/data dir\" && sudo mount -t virtiofs \"Data\" \"/data dir\""
        );
    }

    #[test]
    fn test_quote_escapes_shell_metacharacters() {
        assert_eq!(quote("a\"b$c`d"), "\"a\\\"b\\$c\\`d\"");
    }

    #[test]
    fn test_ssh_args() {
        let args = ssh_args(&target());
        let tail: Vec<&str> = args.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, vec!["docker@192.168.64.3", "22", "-p"]);
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/m/id_rsa"));
        assert!(args.iter().any(|a| a == "BatchMode=yes"));
    }

    #[test]
    fn test_no_shares_is_a_no_op() {
        let provisioner = SshProvisioner::new().with_binary("/nonexistent/ssh");
        provisioner.mount_shared_directories(&target(), &[]).unwrap();
    }

    #[test]
    fn test_mount_gives_up_after_retries() {
        let provisioner = SshProvisioner::new()
            .with_binary("/nonexistent/ssh")
            .with_retry(2, Duration::ZERO);
        let err = provisioner
            .mount_shared_directories(&target(), &[share("/Users/me", "Home")])
            .unwrap_err();
        assert!(matches!(err, Error::Provision(_)));
    }
}
