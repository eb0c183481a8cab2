//! Temperature readings from the Environmental Sensing service.
//!
//! The Temperature characteristic (0x2A6E) carries a signed 16-bit
//! little-endian value in hundredths of a degree Celsius.

use chrono::{DateTime, Utc};

use crate::ble::uuids::TEMPERATURE_UUID;
use crate::error::{Error, Result};
use crate::utils::celsius_to_fahrenheit;

/// One temperature notification from the peripheral.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TemperatureReading {
    /// Raw value in 0.01 °C.
    pub raw: i16,
    /// When the notification was decoded.
    pub received_at: DateTime<Utc>,
}

impl TemperatureReading {
    /// Length of the encoded value in bytes.
    pub const ENCODED_LEN: usize = 2;

    /// Create a reading from a raw value.
    pub fn from_raw(raw: i16) -> Self {
        Self {
            raw,
            received_at: Utc::now(),
        }
    }

    /// Decode a notification payload.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] if the payload is not exactly two bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use ble_env_relay::data::TemperatureReading;
    ///
    /// let reading = TemperatureReading::decode(&[0x88, 0x13]).unwrap();
    /// assert!((reading.celsius() - 50.0).abs() < 1e-9);
    ///
    /// assert!(TemperatureReading::decode(&[0x88]).is_err());
    /// ```
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::ENCODED_LEN] =
            payload.try_into().map_err(|_| Error::Decode {
                source_name: TEMPERATURE_UUID.to_string(),
                context: format!(
                    "expected {} bytes, got {}: {:02X?}",
                    Self::ENCODED_LEN,
                    payload.len(),
                    payload
                ),
            })?;

        Ok(Self::from_raw(i16::from_le_bytes(bytes)))
    }

    /// Encode the raw value the way the peripheral sends it.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        self.raw.to_le_bytes()
    }

    /// Temperature in degrees Celsius.
    pub fn celsius(&self) -> f64 {
        self.raw as f64 / 100.0
    }

    /// Temperature in degrees Fahrenheit.
    pub fn fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.celsius())
    }
}

impl std::fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}°C ({:.2}°F)", self.celsius(), self.fahrenheit())
    }
}
