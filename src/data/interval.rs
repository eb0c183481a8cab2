//! The sampling interval shared by the peripheral and the local sensor.

use std::fmt;
use std::time::Duration;

use crate::data::Value;
use crate::error::{Error, Result};

/// Sampling interval in whole seconds, always within 1..=10.
///
/// On the UART link the interval travels as decimal ASCII digits with no
/// terminator, e.g. `b"7"` or `b"10"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "i64", into = "i64"))]
pub struct SamplingInterval(u8);

impl SamplingInterval {
    /// Shortest accepted interval.
    pub const MIN_SECONDS: i64 = 1;
    /// Longest accepted interval.
    pub const MAX_SECONDS: i64 = 10;

    /// Create an interval from whole seconds.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInterval`] outside 1..=10.
    ///
    /// # Example
    ///
    /// ```
    /// use ble_env_relay::data::SamplingInterval;
    ///
    /// assert_eq!(SamplingInterval::new(7).unwrap().encode(), b"7".to_vec());
    /// assert!(SamplingInterval::new(0).is_err());
    /// assert!(SamplingInterval::new(11).is_err());
    /// ```
    pub fn new(seconds: i64) -> Result<Self> {
        if (Self::MIN_SECONDS..=Self::MAX_SECONDS).contains(&seconds) {
            Ok(Self(seconds as u8))
        } else {
            Err(Error::InvalidInterval {
                value: seconds.to_string(),
            })
        }
    }

    /// Validate a value read from the store.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.as_i64() {
            Some(seconds) => Self::new(seconds),
            None => Err(Error::InvalidInterval {
                value: value.to_string(),
            }),
        }
    }

    /// Whole seconds.
    pub fn seconds(&self) -> u8 {
        self.0
    }

    /// The interval as a duration.
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0 as u64)
    }

    /// Bytes written to the UART TX characteristic.
    pub fn encode(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}

impl Default for SamplingInterval {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<i64> for SamplingInterval {
    type Error = Error;

    fn try_from(seconds: i64) -> Result<Self> {
        Self::new(seconds)
    }
}

impl From<SamplingInterval> for i64 {
    fn from(interval: SamplingInterval) -> Self {
        interval.0 as i64
    }
}

impl From<SamplingInterval> for Value {
    fn from(interval: SamplingInterval) -> Self {
        Value::Int(interval.0 as i64)
    }
}

impl fmt::Display for SamplingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
