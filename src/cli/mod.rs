//! CLI command implementations.

pub mod create;
pub mod delete;
pub mod inspect;
pub mod start;
pub mod stop;

use std::path::PathBuf;

use vzdriver::config::default_storage_root;
use vzdriver::driver::Driver;
use vzdriver::Error;

/// Root directory holding one subdirectory per machine.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Use `root`, or `~/.vzdriver/machines` when unset.
    pub fn new(root: Option<PathBuf>) -> vzdriver::Result<Self> {
        let root = match root {
            Some(root) => root,
            None => default_storage_root()?,
        };
        Ok(Self { root })
    }

    /// Directory of machine `name`.
    pub fn machine_dir(&self, name: &str) -> vzdriver::Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Load the driver for an existing machine.
    pub fn driver(&self, name: &str) -> vzdriver::Result<Driver> {
        Driver::load(self.machine_dir(name)?)
    }
}

fn validate_name(name: &str) -> vzdriver::Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(Error::Config(format!("invalid machine name: {:?}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_dir() {
        let storage = Storage::new(Some("/tmp/machines".into())).unwrap();
        assert_eq!(
            storage.machine_dir("default").unwrap(),
            PathBuf::from("/tmp/machines/default")
        );
        assert!(storage.machine_dir("../etc").is_err());
        assert!(storage.machine_dir("").is_err());
        assert!(storage.machine_dir("a/b").is_err());
    }

    #[test]
    fn test_missing_machine() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(matches!(
            storage.driver("ghost"),
            Err(Error::MachineNotFound(_))
        ));
    }
}
