//! Lookup of guest addresses in the host's DHCP lease database.
//!
//! vmnet's `bootpd` records leases as brace-delimited blocks of `key=value`
//! lines:
//!
//! ```text
//! {
//! 	name=boot2docker
//! 	ip_address=192.168.64.3
//! 	hw_address=1,a2:4:3c:e:5:1
//! 	identifier=1,a2:4:3c:e:5:1
//! 	lease=0x6543a1b2
//! }
//! ```
//!
//! Hardware address octets are written without leading zeros.

use std::path::Path;

use crate::error::{Error, Result};
use vz_config::HardwareAddr;

/// A single DHCP lease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lease {
    pub name: Option<String>,
    pub ip_address: String,
    /// Hardware address with the `1,` type prefix removed.
    pub hw_address: String,
    /// Lease expiry as a Unix timestamp.
    pub lease: Option<u64>,
}

/// Parse every complete lease block in `text`.
///
/// Blocks missing an IP or hardware address are skipped.
pub fn parse_leases(text: &str) -> Vec<Lease> {
    let mut leases = Vec::new();
    let mut current: Option<Lease> = None;

    for line in text.lines() {
        let line = line.trim();
        match line {
            "{" => current = Some(Lease::default()),
            "}" => {
                if let Some(lease) = current.take() {
                    if !lease.ip_address.is_empty() && !lease.hw_address.is_empty() {
                        leases.push(lease);
                    }
                }
            }
            _ => {
                let (Some(lease), Some((key, value))) = (current.as_mut(), line.split_once('='))
                else {
                    continue;
                };
                match key {
                    "name" => lease.name = Some(value.to_string()),
                    "ip_address" => lease.ip_address = value.to_string(),
                    "hw_address" => {
                        let addr = value.split_once(',').map_or(value, |(_, addr)| addr);
                        lease.hw_address = addr.to_string();
                    }
                    "lease" => {
                        lease.lease = value
                            .strip_prefix("0x")
                            .and_then(|hex| u64::from_str_radix(hex, 16).ok());
                    }
                    _ => {}
                }
            }
        }
    }

    leases
}

/// Normalise a colon-hex address the way the lease file writes it.
fn strip_octets(addr: &str) -> String {
    addr.split(':')
        .map(|octet| {
            let trimmed = octet.trim_start_matches('0');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_ascii_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

/// Find the IP leased to `mac` in `leases`.
///
/// The lease with the latest expiry wins when the file holds several for one
/// address. Ties go to the first in file order.
pub fn find_ip<'a>(leases: &'a [Lease], mac: &HardwareAddr) -> Option<&'a str> {
    if mac.is_empty() {
        return None;
    }
    let wanted = strip_octets(&mac.to_string());

    leases
        .iter()
        .filter(|lease| strip_octets(&lease.hw_address) == wanted)
        .fold(None, |best: Option<&Lease>, lease| match best {
            Some(b) if b.lease >= lease.lease => Some(b),
            _ => Some(lease),
        })
        .map(|lease| lease.ip_address.as_str())
}

/// Read the lease file at `path` and look up `mac`.
pub fn lookup_ip(path: &Path, mac: &HardwareAddr) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    let leases = parse_leases(&text);
    tracing::trace!(path = %path.display(), count = leases.len(), "parsed DHCP leases");

    find_ip(&leases, mac)
        .map(str::to_string)
        .ok_or_else(|| Error::IpNotFound {
            mac: mac.to_string(),
            leases: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASES: &str = "{\n\tname=boot2docker\n\tip_address=192.168.64.3\n\thw_address=1,a2:4:3c:e:5:1\n\tidentifier=1,a2:4:3c:e:5:1\n\tlease=0x6543a1b2\n}\n{\n\tname=other\n\tip_address=192.168.64.2\n\thw_address=1,be:ef:0:0:0:1\n\tlease=0x6543a000\n}\n";

    #[test]
    fn test_parse_leases() {
        let leases = parse_leases(LEASES);
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].name.as_deref(), Some("boot2docker"));
        assert_eq!(leases[0].ip_address, "192.168.64.3");
        assert_eq!(leases[0].hw_address, "a2:4:3c:e:5:1");
        assert_eq!(leases[0].lease, Some(0x6543a1b2));
    }

    #[test]
    fn test_find_ip_prefers_latest_lease() {
        let text = "{\n\tip_address=192.168.64.4\n\thw_address=1,a2:4:3c:e:5:1\n\tlease=0x6543a000\n}\n\
                    {\n\tip_address=192.168.64.9\n\thw_address=1,a2:4:3c:e:5:1\n\tlease=0x6543b000\n}\n\
                    {\n\tip_address=192.168.64.5\n\thw_address=1,a2:4:3c:e:5:1\n\tlease=0x6543a800\n}\n";
        let leases = parse_leases(text);
        let mac: HardwareAddr = "a2:04:3c:0e:05:01".parse().unwrap();
        assert_eq!(find_ip(&leases, &mac), Some("192.168.64.9"));
    }

    #[test]
    fn test_parse_skips_incomplete_blocks() {
        let text = "{\n\tname=x\n\tip_address=10.0.0.1\n}\nip_address=10.0.0.2\n";
        assert!(parse_leases(text).is_empty());
    }

    #[test]
    fn test_find_ip_strips_leading_zeros() {
        let leases = parse_leases(LEASES);

        let mac: HardwareAddr = "a2:04:3c:0e:05:01".parse().unwrap();
        assert_eq!(find_ip(&leases, &mac), Some("192.168.64.3"));

        let mac: HardwareAddr = "BE:EF:00:00:00:01".parse().unwrap();
        assert_eq!(find_ip(&leases, &mac), Some("192.168.64.2"));

        let mac: HardwareAddr = "02:00:00:00:00:99".parse().unwrap();
        assert_eq!(find_ip(&leases, &mac), None);
        assert_eq!(find_ip(&leases, &HardwareAddr::empty()), None);
    }

    #[test]
    fn test_lookup_ip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd_leases");
        std::fs::write(&path, LEASES).unwrap();

        let mac: HardwareAddr = "a2:04:3c:0e:05:01".parse().unwrap();
        assert_eq!(lookup_ip(&path, &mac).unwrap(), "192.168.64.3");

        let missing: HardwareAddr = "02:00:00:00:00:99".parse().unwrap();
        assert!(matches!(
            lookup_ip(&path, &missing),
            Err(Error::IpNotFound { .. })
        ));

        let absent = dir.path().join("none");
        assert!(matches!(lookup_ip(&absent, &mac), Err(Error::Io(_))));
    }
}
