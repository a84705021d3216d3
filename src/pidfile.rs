//! PID file authorship and parsing.
//!
//! The runner is the single writer: it creates the file exclusively with its
//! own pid and removes it when the [`PidFile`] guard drops, on every exit
//! path. The supervisor only reads it, and deletes it only during stale-state
//! reconciliation.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// PID file name inside a machine directory.
pub const PID_FILE_NAME: &str = "vz.pid";

/// An exclusively created PID file, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create `path` containing the current process id.
    ///
    /// Fails with [`Error::ResourceConflict`] if the file already exists.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        Self::create_with_pid(path, std::process::id())
    }

    fn create_with_pid(path: impl Into<PathBuf>, pid: u32) -> Result<Self> {
        let path = path.into();

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::ResourceConflict { path });
            }
            Err(e) => return Err(e.into()),
        };

        // From here on the guard owns the file, so a failed write still cleans up
        let guard = Self { path };
        write!(file, "{}", pid)?;
        file.sync_all()?;

        tracing::debug!(path = %guard.path.display(), pid, "PID file created");
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "PID file removed"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove PID file")
            }
        }
    }
}

/// Parse PID file contents: a decimal process id, surrounding whitespace allowed.
pub fn parse_pid(contents: &str) -> std::result::Result<i32, String> {
    let trimmed = contents.trim();
    let pid: i32 = trimmed
        .parse()
        .map_err(|e| format!("invalid pid {:?}: {}", trimmed, e))?;
    if pid <= 0 {
        return Err(format!("invalid pid {}", pid));
    }
    Ok(pid)
}

/// Read the PID file at `path`.
///
/// `Ok(None)` means the file does not exist.
pub fn read_pid(path: &Path) -> Result<Option<i32>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::stale(path, e)),
    };

    parse_pid(&contents)
        .map(Some)
        .map_err(|reason| Error::stale(path, reason))
}
