//! Stop and kill command implementations.

use clap::Args;

use super::Storage;

/// Ask a running machine to shut down.
///
/// Returns once the signal is delivered; the runner stops the guest on
/// its own.
#[derive(Args, Debug)]
pub struct StopCmd {
    /// Machine name to stop.
    pub name: String,
}

impl StopCmd {
    /// Execute the stop command.
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let driver = storage.driver(&self.name)?;
        driver.stop()?;
        println!("Stopping machine: {}", self.name);
        Ok(())
    }
}

/// Terminate a running machine forcefully.
#[derive(Args, Debug)]
pub struct KillCmd {
    /// Machine name to kill.
    pub name: String,
}

impl KillCmd {
    /// Execute the kill command.
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let driver = storage.driver(&self.name)?;
        driver.kill()?;
        println!("Killed machine: {}", self.name);
        Ok(())
    }
}
