//! Peripheral hardware addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Hardware address of a BLE peripheral, e.g. `64:AB:DF:6A:07:14`.
///
/// Stored upper-cased so that comparisons ignore case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Create an address from its string form.
    pub fn new(address: &str) -> Result<Self, Error> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidParameter {
                name: "address".to_string(),
                value: address.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Check whether another textual address refers to this peripheral.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let addr = PeripheralAddress::new("64:ab:df:6a:07:14").unwrap();
        assert_eq!(addr.as_str(), "64:AB:DF:6A:07:14");
        assert!(addr.matches("64:AB:DF:6A:07:14"));
        assert!(addr.matches(" 64:ab:DF:6a:07:14 "));
        assert!(!addr.matches("64:AB:DF:6A:07:15"));
        assert_eq!(addr, "64:AB:df:6a:07:14".parse().unwrap());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(PeripheralAddress::new("   ").is_err());
    }
}
