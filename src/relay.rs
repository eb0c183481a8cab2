//! Telemetry relay.
//!
//! Forwards peripheral temperature notifications and locally polled humidity
//! to the value store.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::notification::NotificationHandler;
use crate::data::{HumidityReading, TemperatureReading, Value};
use crate::error::Result;
use crate::hat::HumiditySensor;
use crate::store::{keys, ValueStore};

/// Relays readings into the value store.
pub struct TelemetryRelay {
    store: Arc<dyn ValueStore>,
    sensor: Arc<dyn HumiditySensor>,
    period_tx: watch::Sender<Duration>,
    relayed: AtomicU64,
    dropped: AtomicU64,
}

impl TelemetryRelay {
    /// Create a relay polling humidity every `period`.
    pub fn new(
        store: Arc<dyn ValueStore>,
        sensor: Arc<dyn HumiditySensor>,
        period: Duration,
    ) -> Self {
        let (period_tx, _) = watch::channel(period);
        Self {
            store,
            sensor,
            period_tx,
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Decode a temperature notification and store it.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`](crate::Error::Decode) for payloads that are not two
    /// bytes. Nothing is written in that case.
    pub async fn on_temperature_notification(&self, payload: &[u8]) -> Result<TemperatureReading> {
        let reading = match TemperatureReading::decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping temperature payload: {}", e);
                return Err(e);
            }
        };

        info!("Temperature: {}", reading);
        self.store
            .set(keys::TEMPERATURE, Value::Float(reading.celsius()))
            .await?;
        self.relayed.fetch_add(1, Ordering::Relaxed);

        Ok(reading)
    }

    /// Change the humidity period. Takes effect from the next tick.
    pub fn set_humidity_period(&self, period: Duration) {
        let previous = self.period_tx.send_replace(period);
        if previous != period {
            debug!("Humidity period {:?} -> {:?}", previous, period);
        }
    }

    /// Current humidity period.
    pub fn humidity_period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Sample the sensor once and store the reading.
    pub async fn poll_humidity_once(&self) -> Result<HumidityReading> {
        let reading = self.sensor.read_humidity().await?;
        info!("Humidity: {}", reading);
        self.store
            .set(keys::HUMIDITY, Value::Float(reading.percent))
            .await?;
        Ok(reading)
    }

    /// Poll humidity until `cancel` fires.
    ///
    /// `period` replaces the current period. Failed samples are logged and
    /// the loop carries on.
    pub async fn run_humidity_loop(&self, period: Duration, cancel: CancellationToken) {
        self.set_humidity_period(period);
        let mut period_rx = self.period_tx.subscribe();

        debug!("Humidity loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.poll_humidity_once() => {
                    if let Err(e) = result {
                        warn!("Humidity sample failed: {}", e);
                    }
                }
            }

            let wait = *period_rx.borrow_and_update();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        debug!("Humidity loop stopped");
    }

    /// Temperature readings stored so far.
    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Temperature payloads dropped as undecodable.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationHandler for TelemetryRelay {
    async fn on_notification(&self, payload: &[u8]) -> Result<()> {
        self.on_temperature_notification(payload).await.map(|_| ())
    }
}

impl std::fmt::Debug for TelemetryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRelay")
            .field("humidity_period", &self.humidity_period())
            .field("relayed", &self.relayed())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hat::MockHumiditySensor;
    use crate::store::{MemoryStore, MockValueStore};

    fn quiet_sensor() -> Arc<dyn HumiditySensor> {
        Arc::new(MockHumiditySensor::new())
    }

    #[tokio::test]
    async fn test_temperature_values() {
        let store = Arc::new(MemoryStore::new());
        let relay = TelemetryRelay::new(store.clone(), quiet_sensor(), Duration::from_secs(5));

        relay.on_temperature_notification(&[0x88, 0x13]).await.unwrap();
        relay.on_temperature_notification(&[0x00, 0x00]).await.unwrap();
        relay.on_temperature_notification(&[0xF0, 0xFF]).await.unwrap();

        let celsius = store
            .writes_to(keys::TEMPERATURE)
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(celsius.len(), 3);
        assert!((celsius[0] - 50.0).abs() < 1e-9);
        assert!(celsius[1].abs() < 1e-9);
        assert!((celsius[2] + 0.16).abs() < 1e-9);
        assert_eq!(relay.relayed(), 3);
    }

    #[tokio::test]
    async fn test_bad_payloads_are_dropped() {
        let mut store = MockValueStore::new();
        store.expect_set().times(1).returning(|_, _| Ok(()));
        let relay = TelemetryRelay::new(Arc::new(store), quiet_sensor(), Duration::from_secs(5));

        assert!(matches!(
            relay.on_temperature_notification(&[0x88]).await,
            Err(Error::Decode { .. })
        ));
        assert!(matches!(
            relay.on_temperature_notification(&[0x88, 0x13, 0x00]).await,
            Err(Error::Decode { .. })
        ));
        assert_eq!(relay.dropped(), 2);

        // Later notifications still go through.
        let reading = relay.on_temperature_notification(&[0x88, 0x13]).await.unwrap();
        assert_eq!(reading.raw, 5000);
    }

    #[tokio::test]
    async fn test_handler_reports_decode_errors() {
        let mut store = MockValueStore::new();
        store.expect_set().times(0);
        let relay = TelemetryRelay::new(Arc::new(store), quiet_sensor(), Duration::from_secs(5));

        assert!(relay.on_notification(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_poll_humidity_once() {
        let store = Arc::new(MemoryStore::new());
        let mut sensor = MockHumiditySensor::new();
        sensor
            .expect_read_humidity()
            .times(1)
            .returning(|| HumidityReading::new(38.25));
        let relay = TelemetryRelay::new(store.clone(), Arc::new(sensor), Duration::from_secs(5));

        relay.poll_humidity_once().await.unwrap();
        assert_eq!(store.writes_to(keys::HUMIDITY), vec![Value::Float(38.25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_humidity_loop_period_and_cancel() {
        let store = Arc::new(MemoryStore::new());
        let mut sensor = MockHumiditySensor::new();
        sensor
            .expect_read_humidity()
            .returning(|| HumidityReading::new(42.5));
        let relay = Arc::new(TelemetryRelay::new(
            store.clone(),
            Arc::new(sensor),
            Duration::from_secs(5),
        ));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let relay = relay.clone();
            let cancel = cancel.clone();
            async move { relay.run_humidity_loop(Duration::from_secs(5), cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.writes_to(keys::HUMIDITY).len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.writes_to(keys::HUMIDITY).len(), 2);

        // The sleep already in progress keeps the old period.
        relay.set_humidity_period(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(6400)).await;
        assert_eq!(store.writes_to(keys::HUMIDITY).len(), 4);

        cancel.cancel();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.writes_to(keys::HUMIDITY).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_humidity_loop_survives_sensor_errors() {
        let store = Arc::new(MemoryStore::new());
        let mut sensor = MockHumiditySensor::new();
        let mut calls = 0;
        sensor.expect_read_humidity().returning(move || {
            calls += 1;
            if calls == 1 {
                Err(Error::Sensor {
                    device: "hts221".to_string(),
                    reason: "busy".to_string(),
                })
            } else {
                HumidityReading::new(50.0)
            }
        });
        let relay = Arc::new(TelemetryRelay::new(
            store.clone(),
            Arc::new(sensor),
            Duration::from_secs(1),
        ));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let relay = relay.clone();
            let cancel = cancel.clone();
            async move { relay.run_humidity_loop(Duration::from_secs(1), cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.writes_to(keys::HUMIDITY), vec![Value::Float(50.0)]);

        cancel.cancel();
        task.await.unwrap();
    }
}
