//! Local Sense HAT peripherals.
//!
//! The gateway polls humidity and drives the LED matrix through these
//! traits; the Linux adapters read IIO sysfs and write the framebuffer.

pub mod framebuffer;
pub mod iio;

use async_trait::async_trait;

use crate::data::HumidityReading;
use crate::error::Result;

pub use framebuffer::FramebufferMatrix;
pub use iio::IioHumiditySensor;

/// Side length of the LED matrix.
pub const MATRIX_SIZE: u8 = 8;

/// A 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Create a colour.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack into the RGB565 layout of the Sense HAT framebuffer.
    pub fn to_rgb565(self) -> u16 {
        ((self.r as u16 >> 3) << 11) | ((self.g as u16 >> 2) << 5) | (self.b as u16 >> 3)
    }

    /// Unpack from RGB565. The low bits lost by packing come back as zero.
    pub fn from_rgb565(value: u16) -> Self {
        Self {
            r: (((value >> 11) & 0x1F) << 3) as u8,
            g: (((value >> 5) & 0x3F) << 2) as u8,
            b: ((value & 0x1F) << 3) as u8,
        }
    }
}

/// Source of relative humidity samples.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HumiditySensor: Send + Sync {
    /// Take one sample.
    async fn read_humidity(&self) -> Result<HumidityReading>;
}

/// An 8×8 RGB LED matrix.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedMatrix: Send + Sync {
    /// Set one pixel.
    async fn set_pixel(&self, row: u8, col: u8, color: Rgb) -> Result<()>;

    /// Read one pixel back.
    async fn get_pixel(&self, row: u8, col: u8) -> Result<Rgb>;
}
