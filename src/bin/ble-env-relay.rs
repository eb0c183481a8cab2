//! Gateway binary: relays a BLE environmental peripheral to a value store.
//!
//! Run with: cargo run -- --address 64:AB:DF:6A:07:14

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ble_env_relay::hat::framebuffer::DEFAULT_FRAMEBUFFER;
use ble_env_relay::hat::iio::IIO_DEVICES;
use ble_env_relay::{
    BtleTransport, FramebufferMatrix, Gateway, IioHumiditySensor, MemoryStore, PeripheralAddress,
    RelayConfig, Result, SamplingInterval, SessionConfig,
};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Relays temperature, humidity and interval between a BLE peripheral and a value store", long_about = None)]
struct Args {
    /// Hardware address of the peripheral
    #[arg(long)]
    address: PeripheralAddress,

    /// Sampling interval in seconds used when the store holds none
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(i64).range(1..=10))]
    interval: i64,

    /// How long to scan for the peripheral
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    scan_timeout: Duration,

    /// Bound on connecting and service discovery
    #[arg(long, default_value = "15s", value_parser = humantime::parse_duration)]
    connect_timeout: Duration,

    /// Bound on each characteristic write
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    write_timeout: Duration,

    /// IIO device directory of the humidity sensor (detected when omitted)
    #[arg(long)]
    humidity_device: Option<PathBuf>,

    /// LED matrix framebuffer; pass the flag alone for the Sense HAT default
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_FRAMEBUFFER)]
    framebuffer: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `ble_env_relay=trace` (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn relay_config(&self) -> Result<RelayConfig> {
        let session = SessionConfig::default()
            .with_scan_timeout(self.scan_timeout)
            .with_connect_timeout(self.connect_timeout)
            .with_operation_timeout(self.write_timeout);

        let mut config = RelayConfig::new(self.address.clone())
            .with_session(session)
            .with_default_interval(SamplingInterval::new(self.interval)?);
        config.humidity_device = self.humidity_device.clone();
        config.framebuffer = self.framebuffer.clone();

        Ok(config)
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config = args.relay_config()?;

    let sensor = match &config.humidity_device {
        Some(dir) => IioHumiditySensor::new(dir),
        None => IioHumiditySensor::discover(IIO_DEVICES).await?,
    };
    info!("Humidity from {}", sensor.device_dir().display());

    let store = Arc::new(MemoryStore::new());
    let mut gateway = Gateway::new(config.clone(), store, Arc::new(sensor));

    if let Some(path) = &config.framebuffer {
        match FramebufferMatrix::open(path).await {
            Ok(matrix) => gateway = gateway.with_matrix(Arc::new(matrix)),
            Err(e) => warn!("Light control disabled: {}", e),
        }
    }

    let transport = BtleTransport::new().await?;
    let console = BufReader::new(tokio::io::stdin());

    let exit = gateway
        .run(&transport, console, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Exiting ({:?})", exit);
    Ok(())
}
