// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-env-relay
//!
//! A Raspberry Pi gateway between one BLE peripheral and a realtime value
//! store.
//!
//! The peripheral exposes the Nordic UART service and the Environmental
//! Sensing Temperature characteristic. The gateway:
//!
//! - relays temperature notifications to the store
//! - polls the Sense HAT humidity sensor and stores the readings
//! - keeps the peripheral's sampling interval in step with the store
//! - forwards console lines to the peripheral over UART
//! - applies LED matrix commands from the store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_env_relay::{
//!     BtleTransport, Gateway, IioHumiditySensor, MemoryStore, PeripheralAddress, RelayConfig,
//!     Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RelayConfig::new(PeripheralAddress::new("64:AB:DF:6A:07:14")?);
//!     let sensor = IioHumiditySensor::discover("/sys/bus/iio/devices").await?;
//!     let gateway = Gateway::new(config, Arc::new(MemoryStore::new()), Arc::new(sensor));
//!
//!     let transport = BtleTransport::new().await?;
//!     let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//!     gateway
//!         .run(&transport, stdin, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group. The Sense
//! HAT drivers expose humidity through IIO and the LED matrix as a
//! framebuffer (usually `/dev/fb1`).
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and config types
//! - `cli` (default): Build the `ble-env-relay` binary

// Public modules
pub mod ble;
pub mod config;
pub mod console;
pub mod data;
pub mod error;
pub mod gateway;
pub mod hat;
pub mod light;
pub mod relay;
pub mod session;
pub mod store;
pub mod synchronizer;
pub mod utils;

// Re-exports for convenience
pub use ble::{
    BtleTransport, CharacteristicBinding, NotificationChannel, NotificationHandler,
    PeripheralAddress, Transport,
};
pub use config::{RelayConfig, SessionConfig};
pub use console::{ConsoleCommand, ConsoleExit};
pub use data::{HumidityReading, SamplingInterval, TemperatureReading, Value};
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use hat::{FramebufferMatrix, HumiditySensor, IioHumiditySensor, LedMatrix, Rgb};
pub use light::{LightCommand, LightController};
pub use relay::TelemetryRelay;
pub use session::{PeripheralSession, ServiceSpec, SessionEvent, SessionState};
pub use store::{MemoryStore, ValueStore};
pub use synchronizer::{AcceptedInterval, IntervalSynchronizer};
pub use utils::celsius_to_fahrenheit;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<Gateway>();
        let _ = std::any::TypeId::of::<PeripheralSession>();
        let _ = std::any::TypeId::of::<IntervalSynchronizer>();
        let _ = std::any::TypeId::of::<TelemetryRelay>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SamplingInterval>();
    }

    #[test]
    fn test_uart_uuids_share_base() {
        let service = ble::UART_SERVICE_UUID.as_bytes();
        let tx = ble::UART_TX_UUID.as_bytes();
        let rx = ble::UART_RX_UUID.as_bytes();
        assert_eq!(service[4..], tx[4..]);
        assert_eq!(service[4..], rx[4..]);
    }
}
