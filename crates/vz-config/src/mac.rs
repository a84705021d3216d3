//! Hardware (MAC) address value type.
//!
//! [`HardwareAddr`] serializes as canonical lowercase colon-hex text. The
//! empty address is a legal value: it encodes to the empty string and means
//! "not assigned yet".

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of octets in an EUI-48 address.
const OCTETS: usize = 6;

/// Locally administered bit of the first octet.
const LOCALLY_ADMINISTERED: u8 = 0x02;

/// Multicast bit of the first octet.
const MULTICAST: u8 = 0x01;

/// Error returned when text is not a valid MAC address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("address {input}: invalid MAC address")]
pub struct ParseHardwareAddrError {
    input: String,
}

/// A MAC address, possibly unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HardwareAddr(Option<[u8; OCTETS]>);

impl HardwareAddr {
    /// The unset address.
    pub const fn empty() -> Self {
        Self(None)
    }

    /// Build an address from raw octets.
    pub const fn from_octets(octets: [u8; OCTETS]) -> Self {
        Self(Some(octets))
    }

    /// Generate a random unicast, locally administered address.
    pub fn random_locally_administered() -> Self {
        let mut octets = [0u8; OCTETS];
        rand::rng().fill(&mut octets);
        octets[0] = (octets[0] | LOCALLY_ADMINISTERED) & !MULTICAST;
        Self(Some(octets))
    }

    /// Raw octets, or `None` when unset.
    pub fn octets(&self) -> Option<[u8; OCTETS]> {
        self.0
    }

    /// Whether no address has been assigned.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Whether the locally administered bit is set.
    pub fn is_locally_administered(&self) -> bool {
        self.0
            .map(|o| o[0] & LOCALLY_ADMINISTERED != 0)
            .unwrap_or(false)
    }

    /// Parse `text` into `self`.
    ///
    /// On failure the value is reset to the empty address and the error
    /// names the rejected input.
    pub fn set_from_text(&mut self, text: &str) -> Result<(), ParseHardwareAddrError> {
        match text.parse() {
            Ok(addr) => {
                *self = addr;
                tracing::debug!(mac = %self, "parsed MAC address");
                Ok(())
            }
            Err(e) => {
                *self = Self::empty();
                Err(e)
            }
        }
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(octets) = self.0 else {
            return Ok(());
        };
        for (i, octet) in octets.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

impl FromStr for HardwareAddr {
    type Err = ParseHardwareAddrError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`. The empty string
    /// parses to the empty address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::empty());
        }

        let invalid = || ParseHardwareAddrError {
            input: s.to_string(),
        };

        if s.contains(':') && s.contains('-') {
            return Err(invalid());
        }
        let separator = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != OCTETS {
            return Err(invalid());
        }

        let mut octets = [0u8; OCTETS];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(Some(octets)))
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_from_text() {
        // (input, expected display, expected error)
        let cases = [
            ("aa:bb:cc:dd:ee:ff", "aa:bb:cc:dd:ee:ff", None),
            ("AA-BB-CC-DD-EE-FF", "aa:bb:cc:dd:ee:ff", None),
            ("", "", None),
            (
                "foo-bar-baz",
                "",
                Some("address foo-bar-baz: invalid MAC address"),
            ),
            (
                "aa:bb:cc:dd:ee",
                "",
                Some("address aa:bb:cc:dd:ee: invalid MAC address"),
            ),
            (
                "+a:bb:cc:dd:ee:ff",
                "",
                Some("address +a:bb:cc:dd:ee:ff: invalid MAC address"),
            ),
            (
                "aa:bb:cc:dd:ee:f+",
                "",
                Some("address aa:bb:cc:dd:ee:f+: invalid MAC address"),
            ),
            (
                "aa:bb-cc:dd:ee:ff",
                "",
                Some("address aa:bb-cc:dd:ee:ff: invalid MAC address"),
            ),
        ];

        for (input, want, want_err) in cases {
            let mut addr = HardwareAddr::from_octets([1, 2, 3, 4, 5, 6]);
            let result = addr.set_from_text(input);
            match want_err {
                Some(msg) => assert_eq!(result.unwrap_err().to_string(), msg, "{}", input),
                None => assert!(result.is_ok(), "{}", input),
            }
            assert_eq!(addr.to_string(), want, "{}", input);
        }
    }

    #[test]
    fn test_text_round_trip() {
        for input in ["aa:bb:cc:dd:ee:ff", ""] {
            let addr: HardwareAddr = input.parse().unwrap();
            let json = serde_json::to_string(&addr).unwrap();
            assert_eq!(json, format!("\"{}\"", input));
            let back: HardwareAddr = serde_json::from_str(&json).unwrap();
            assert_eq!(back.to_string(), input);
        }
    }

    #[test]
    fn test_deserialize_invalid() {
        let result: Result<HardwareAddr, _> = serde_json::from_str("\"zz:zz\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_has_no_octets() {
        let addr = HardwareAddr::default();
        assert!(addr.is_empty());
        assert_eq!(addr.octets(), None);
    }

    #[test]
    fn test_random_locally_administered() {
        for _ in 0..32 {
            let addr = HardwareAddr::random_locally_administered();
            let octets = addr.octets().unwrap();
            assert!(addr.is_locally_administered());
            assert_eq!(octets[0] & MULTICAST, 0, "must be unicast");
            let reparsed: HardwareAddr = addr.to_string().parse().unwrap();
            assert_eq!(reparsed, addr);
        }
    }
}
