//! Read-only queries: state, ip, url and config.

use clap::Args;
use std::time::Duration;

use super::Storage;

/// Print the machine state.
#[derive(Args, Debug)]
pub struct StateCmd {
    /// Machine name.
    pub name: String,
}

impl StateCmd {
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let driver = storage.driver(&self.name)?;
        println!("{}", driver.state()?);
        Ok(())
    }
}

/// Print the guest IP address.
#[derive(Args, Debug)]
pub struct IpCmd {
    /// Machine name.
    pub name: String,

    /// How long to wait for a DHCP lease (e.g. "30s", "1m").
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub timeout: Duration,
}

impl IpCmd {
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let interval = vzdriver::driver::IP_INTERVAL;
        let attempts = lease_attempts(self.timeout, interval);

        let mut driver = storage.driver(&self.name)?.with_ip_retry(attempts, interval);
        println!("{}", driver.ip()?);
        Ok(())
    }
}

/// Lease polls that fit in `timeout`, at least one.
fn lease_attempts(timeout: Duration, interval: Duration) -> u32 {
    let polls = timeout.as_millis() / interval.as_millis().max(1);
    u32::try_from(polls).unwrap_or(u32::MAX).max(1)
}

/// Print the Docker endpoint of the guest.
#[derive(Args, Debug)]
pub struct UrlCmd {
    /// Machine name.
    pub name: String,
}

impl UrlCmd {
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let mut driver = storage.driver(&self.name)?;
        println!("{}", driver.url()?);
        Ok(())
    }
}

/// Print the VM configuration the next start would hand to the runner.
#[derive(Args, Debug)]
pub struct ConfigCmd {
    /// Machine name.
    pub name: String,
}

impl ConfigCmd {
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let mut driver = storage.driver(&self.name)?;
        let had_mac = !driver.config().mac_address.is_empty();

        let config = driver.generate_vm_config()?;
        if !had_mac {
            driver.save()?;
        }

        println!("{}", serde_json::to_string_pretty(&config)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_attempts() {
        let interval = Duration::from_secs(2);
        assert_eq!(lease_attempts(Duration::from_secs(60), interval), 30);
        assert_eq!(lease_attempts(Duration::ZERO, interval), 1);
        assert_eq!(lease_attempts(Duration::MAX, interval), u32::MAX);
    }
}
