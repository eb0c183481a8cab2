//! LED matrix through the Sense HAT framebuffer (`/dev/fb1`).
//!
//! The framebuffer is 8×8 pixels, row-major, two bytes per pixel in
//! little-endian RGB565.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hat::{LedMatrix, Rgb, MATRIX_SIZE};

/// Default framebuffer device of the Sense HAT.
pub const DEFAULT_FRAMEBUFFER: &str = "/dev/fb1";

/// LED matrix backed by a framebuffer device or file.
pub struct FramebufferMatrix {
    path: PathBuf,
    file: Mutex<File>,
}

impl FramebufferMatrix {
    /// Open the framebuffer for reading and writing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| Error::Sensor {
                device: path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened LED framebuffer {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn offset(&self, row: u8, col: u8) -> Result<u64> {
        if row >= MATRIX_SIZE || col >= MATRIX_SIZE {
            return Err(Error::InvalidParameter {
                name: "pixel".to_string(),
                value: format!("({}, {})", row, col),
            });
        }
        Ok((row as u64 * MATRIX_SIZE as u64 + col as u64) * 2)
    }
}

#[async_trait]
impl LedMatrix for FramebufferMatrix {
    async fn set_pixel(&self, row: u8, col: u8, color: Rgb) -> Result<()> {
        let offset = self.offset(row, col)?;
        let mut file = self.file.lock().await;

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&color.to_rgb565().to_le_bytes()).await?;
        file.flush().await?;

        debug!(
            "Set pixel ({}, {}) of {} to {:?}",
            row,
            col,
            self.path.display(),
            color
        );
        Ok(())
    }

    async fn get_pixel(&self, row: u8, col: u8) -> Result<Rgb> {
        let offset = self.offset(row, col)?;
        let mut file = self.file.lock().await;

        let mut bytes = [0u8; 2];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut bytes).await?;

        Ok(Rgb::from_rgb565(u16::from_le_bytes(bytes)))
    }
}
