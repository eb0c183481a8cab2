//! LED light control from the value store.
//!
//! Setting `update_light` to true applies the pixel described by
//! `light_row`, `light_col` and `light_r/g/b`, then the flag is cleared.

use futures::stream::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::Value;
use crate::error::{Error, Result};
use crate::hat::{LedMatrix, Rgb, MATRIX_SIZE};
use crate::store::{keys, ValueStore};

/// One pixel update requested through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LightCommand {
    /// Row, 0–7.
    pub row: u8,
    /// Column, 0–7.
    pub col: u8,
    /// Colour to set.
    pub color: Rgb,
}

impl LightCommand {
    /// Read and validate the light keys.
    pub async fn fetch(store: &dyn ValueStore) -> Result<Self> {
        Ok(Self {
            row: fetch_u8(store, keys::LIGHT_ROW, MATRIX_SIZE - 1).await?,
            col: fetch_u8(store, keys::LIGHT_COL, MATRIX_SIZE - 1).await?,
            color: Rgb::new(
                fetch_u8(store, keys::LIGHT_R, u8::MAX).await?,
                fetch_u8(store, keys::LIGHT_G, u8::MAX).await?,
                fetch_u8(store, keys::LIGHT_B, u8::MAX).await?,
            ),
        })
    }
}

async fn fetch_u8(store: &dyn ValueStore, key: &str, max: u8) -> Result<u8> {
    let value = store.get(key).await?;
    let parsed = value
        .as_ref()
        .and_then(Value::as_i64)
        .filter(|n| (0..=max as i64).contains(n))
        .map(|n| n as u8);

    parsed.ok_or_else(|| Error::InvalidParameter {
        name: key.to_string(),
        value: value.map_or_else(|| "<missing>".to_string(), |v| v.to_string()),
    })
}

/// Applies light commands to an LED matrix.
pub struct LightController {
    store: Arc<dyn ValueStore>,
    matrix: Arc<dyn LedMatrix>,
}

impl LightController {
    /// Create a controller.
    pub fn new(store: Arc<dyn ValueStore>, matrix: Arc<dyn LedMatrix>) -> Self {
        Self { store, matrix }
    }

    /// React to a new `update_light` value.
    ///
    /// Returns the applied command, or `None` when the flag is not set. The
    /// flag is cleared after every attempt, including failed ones.
    pub async fn on_update_flag(&self, flag: &Value) -> Result<Option<LightCommand>> {
        if flag.as_bool() != Some(true) {
            return Ok(None);
        }

        let applied = self.apply().await;
        self.store.set(keys::UPDATE_LIGHT, Value::Bool(false)).await?;

        applied.map(Some)
    }

    async fn apply(&self) -> Result<LightCommand> {
        let command = LightCommand::fetch(self.store.as_ref()).await?;
        self.matrix
            .set_pixel(command.row, command.col, command.color)
            .await?;
        info!(
            "Light ({}, {}) set to rgb({}, {}, {})",
            command.row, command.col, command.color.r, command.color.g, command.color.b
        );
        Ok(command)
    }

    /// Watch `update_light` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut changes = self.store.watch(keys::UPDATE_LIGHT).await?;
        debug!("Light controller started");

        loop {
            let flag = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = changes.next() => match next {
                    Some(flag) => flag,
                    None => break,
                },
            };

            if let Err(e) = self.on_update_flag(&flag).await {
                warn!("Light update failed: {}", e);
            }
        }

        debug!("Light controller stopped");
        Ok(())
    }
}
