//! Relative humidity samples from the local sensor.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// One humidity sample, in percent relative humidity.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HumidityReading {
    /// Relative humidity in percent.
    pub percent: f64,
    /// When the sample was taken.
    pub sampled_at: DateTime<Utc>,
}

impl HumidityReading {
    /// Create a reading, rejecting NaN and infinities.
    pub fn new(percent: f64) -> Result<Self> {
        if !percent.is_finite() {
            return Err(Error::InvalidParameter {
                name: "humidity".to_string(),
                value: percent.to_string(),
            });
        }
        Ok(Self {
            percent,
            sampled_at: Utc::now(),
        })
    }
}

impl std::fmt::Display for HumidityReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}%", self.percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humidity_reading() {
        let reading = HumidityReading::new(41.256).unwrap();
        assert_eq!(reading.to_string(), "41.26%");
        assert!(HumidityReading::new(f64::NAN).is_err());
        assert!(HumidityReading::new(f64::INFINITY).is_err());
    }
}
