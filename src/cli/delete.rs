//! Remove command implementation.

use clap::Args;
use std::time::Duration;
use vzdriver::driver::MachineState;
use vzdriver::util::wait_for;

use super::Storage;

const REMOVE_ATTEMPTS: u32 = 120;
const REMOVE_INTERVAL: Duration = Duration::from_millis(500);

/// Stop a machine and delete it.
#[derive(Args, Debug)]
pub struct DeleteCmd {
    /// Machine name to remove.
    pub name: String,

    /// Force removal without confirmation.
    #[arg(short, long)]
    pub force: bool,
}

impl DeleteCmd {
    /// Execute the remove command.
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let driver = storage.driver(&self.name)?;

        // Confirm removal unless --force
        if !self.force {
            eprint!("Remove machine '{}'? [y/N] ", self.name);
            let mut input = String::new();
            if std::io::stdin().read_line(&mut input).is_ok() {
                let input = input.trim().to_lowercase();
                if input != "y" && input != "yes" {
                    println!("Cancelled");
                    return Ok(());
                }
            } else {
                println!("Cancelled");
                return Ok(());
            }
        }

        driver.remove()?;

        // The runner removes its PID file on the way out
        let stopped = wait_for(REMOVE_ATTEMPTS, REMOVE_INTERVAL, || {
            matches!(driver.state(), Ok(state) if state != MachineState::Running)
        });
        if !stopped {
            return Err(vzdriver::Error::GracefulStopFailure(format!(
                "machine {} is still running",
                self.name
            )));
        }

        std::fs::remove_dir_all(driver.dir())
            .map_err(|e| vzdriver::Error::storage("remove machine directory", e))?;

        println!("Removed machine: {}", self.name);
        Ok(())
    }
}
