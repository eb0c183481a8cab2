//! Realtime value store seam.
//!
//! The gateway only needs `set`, `get` and a per-key watch. Watches fire on
//! each change of that one key, never on changes elsewhere in the store.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::data::Value;
use crate::error::Result;

pub use memory::MemoryStore;

/// Stream of successive values of one key.
pub type ValueStream = BoxStream<'static, Value>;

/// Keys the gateway reads and writes.
pub mod keys {
    /// Latest peripheral temperature in °C.
    pub const TEMPERATURE: &str = "temperature";
    /// Latest local humidity in percent.
    pub const HUMIDITY: &str = "humidity";
    /// Sampling interval in seconds (1–10).
    pub const INTERVAL: &str = "Interval";
    /// LED row to update (0–7).
    pub const LIGHT_ROW: &str = "light_row";
    /// LED column to update (0–7).
    pub const LIGHT_COL: &str = "light_col";
    /// Red channel (0–255).
    pub const LIGHT_R: &str = "light_r";
    /// Green channel (0–255).
    pub const LIGHT_G: &str = "light_g";
    /// Blue channel (0–255).
    pub const LIGHT_B: &str = "light_b";
    /// Set to true to apply the light keys.
    pub const UPDATE_LIGHT: &str = "update_light";
}

/// A key-value store with change notification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Current value of `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Every subsequent change of `key`.
    async fn watch(&self, key: &str) -> Result<ValueStream>;
}
