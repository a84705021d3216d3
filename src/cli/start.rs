//! Start and restart command implementations.

use clap::Args;

use super::Storage;

/// Start a stopped machine.
#[derive(Args, Debug)]
pub struct StartCmd {
    /// Machine name to start.
    pub name: String,
}

impl StartCmd {
    /// Execute the start command.
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let mut driver = storage.driver(&self.name)?;

        println!("Starting machine {}...", self.name);
        driver.start()?;

        println!("Started machine: {}", self.name);
        Ok(())
    }
}

/// Stop a machine gracefully, wait for it to exit, then start it again.
#[derive(Args, Debug)]
pub struct RestartCmd {
    /// Machine name to restart.
    pub name: String,
}

impl RestartCmd {
    /// Execute the restart command.
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let mut driver = storage.driver(&self.name)?;

        println!("Restarting machine {}...", self.name);
        driver.restart()?;

        println!("Restarted machine: {}", self.name);
        Ok(())
    }
}
