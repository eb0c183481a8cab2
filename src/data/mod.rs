//! Data structures for relayed values.
//!
//! This module contains the readings that flow from the peripheral and the
//! local sensor to the value store, and the interval that flows back.

pub mod humidity;
pub mod interval;
pub mod temperature;
pub mod value;

pub use humidity::HumidityReading;
pub use interval::SamplingInterval;
pub use temperature::TemperatureReading;
pub use value::Value;
