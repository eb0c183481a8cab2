//! Humidity from the Linux IIO subsystem.
//!
//! The HTS221 on the Sense HAT shows up under `/sys/bus/iio/devices` with
//! `in_humidityrelative_raw`, `_offset` and `_scale`. The processed value
//! `(raw + offset) * scale` is in milli-percent.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::data::HumidityReading;
use crate::error::{Error, Result};
use crate::hat::HumiditySensor;

/// Default root of IIO devices.
pub const IIO_DEVICES: &str = "/sys/bus/iio/devices";

const RAW: &str = "in_humidityrelative_raw";
const OFFSET: &str = "in_humidityrelative_offset";
const SCALE: &str = "in_humidityrelative_scale";

/// Humidity sensor exposed through IIO sysfs.
#[derive(Debug, Clone)]
pub struct IioHumiditySensor {
    device_dir: PathBuf,
}

impl IioHumiditySensor {
    /// Use a specific IIO device directory.
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    /// Find the first device under `root` that reports relative humidity.
    pub async fn discover(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut entries = tokio::fs::read_dir(root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let dir = entry.path();
            if tokio::fs::metadata(dir.join(RAW)).await.is_ok() {
                debug!("Using humidity sensor at {}", dir.display());
                return Ok(Self::new(dir));
            }
        }

        Err(Error::Sensor {
            device: root.display().to_string(),
            reason: "no IIO device reports relative humidity".to_string(),
        })
    }

    /// The device directory in use.
    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    async fn read_attribute(&self, name: &str) -> Result<Option<f64>> {
        let path = self.device_dir.join(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        text.trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| Error::Sensor {
                device: path.display().to_string(),
                reason: format!("unparseable value {:?}: {}", text.trim(), e),
            })
    }
}

#[async_trait]
impl HumiditySensor for IioHumiditySensor {
    async fn read_humidity(&self) -> Result<HumidityReading> {
        let raw = self.read_attribute(RAW).await?.ok_or_else(|| Error::Sensor {
            device: self.device_dir.display().to_string(),
            reason: format!("{} missing", RAW),
        })?;
        let offset = self.read_attribute(OFFSET).await?.unwrap_or(0.0);
        let scale = self.read_attribute(SCALE).await?.unwrap_or(1.0);

        let percent = (raw + offset) * scale / 1000.0;
        trace!(raw, offset, scale, percent, "humidity sample");

        HumidityReading::new(percent)
    }
}
