//! The gateway process.
//!
//! Opens one session to the peripheral and runs, until the operator exits,
//! shutdown is signalled or a fatal error occurs:
//!
//! - RX notifications echoed to the log
//! - temperature notifications relayed to the store
//! - the humidity loop
//! - interval changes synchronized to the peripheral
//! - LED light commands, when a matrix is attached
//! - the console
//!
//! The session is closed on every exit path.

use futures::stream::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ble::binding::CharacteristicBinding;
use crate::ble::notification::handler_fn;
use crate::ble::transport::Transport;
use crate::ble::uuids::*;
use crate::config::RelayConfig;
use crate::console::{run_console, ConsoleExit};
use crate::data::{SamplingInterval, Value};
use crate::error::Result;
use crate::hat::{HumiditySensor, LedMatrix};
use crate::light::LightController;
use crate::relay::TelemetryRelay;
use crate::session::{PeripheralSession, ServiceSpec};
use crate::store::{keys, ValueStore, ValueStream};
use crate::synchronizer::IntervalSynchronizer;
use crate::utils::payload_text;

/// Relays between one BLE peripheral and the value store.
pub struct Gateway {
    config: RelayConfig,
    store: Arc<dyn ValueStore>,
    sensor: Arc<dyn HumiditySensor>,
    matrix: Option<Arc<dyn LedMatrix>>,
}

impl Gateway {
    /// Create a gateway without light control.
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn ValueStore>,
        sensor: Arc<dyn HumiditySensor>,
    ) -> Self {
        Self {
            config,
            store,
            sensor,
            matrix: None,
        }
    }

    /// Enable light control on `matrix`.
    pub fn with_matrix(mut self, matrix: Arc<dyn LedMatrix>) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// The gateway configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run until `exit` on the console, end of console input, or `shutdown`.
    ///
    /// # Errors
    ///
    /// Session open failures, and fatal errors raised while running. The
    /// session is closed before any error is returned.
    pub async fn run<R, F>(
        &self,
        transport: &dyn Transport,
        console: R,
        shutdown: F,
    ) -> Result<ConsoleExit>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let session = PeripheralSession::open(
            transport,
            self.config.address.clone(),
            &[ServiceSpec::nordic_uart(), ServiceSpec::environmental_sensing()],
            self.config.session,
        )
        .await?;

        let outcome = self.serve(&session, console, shutdown).await;
        if let Err(ref e) = outcome {
            error!("Gateway stopping: {}", e);
        }

        let closed = session.close().await;
        let exit = outcome?;
        closed?;

        info!("Gateway stopped ({:?})", exit);
        Ok(exit)
    }

    async fn serve<R, F>(
        &self,
        session: &PeripheralSession,
        console: R,
        shutdown: F,
    ) -> Result<ConsoleExit>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let tx = session.binding(UART_SERVICE_UUID, UART_TX_UUID)?;
        let rx = session.binding(UART_SERVICE_UUID, UART_RX_UUID)?;
        let temperature = session.binding(ENVIRONMENTAL_SENSING_SERVICE_UUID, TEMPERATURE_UUID)?;

        let relay = Arc::new(TelemetryRelay::new(
            self.store.clone(),
            self.sensor.clone(),
            self.config.default_interval.as_duration(),
        ));

        let channels = vec![
            rx.subscribe(handler_fn(|payload: &[u8]| {
                info!("Received: {}", payload_text(payload));
                Ok(())
            }))
            .await?,
            temperature.subscribe(relay.clone()).await?,
        ];

        let synchronizer = Arc::new(IntervalSynchronizer::new(tx.clone(), relay.clone()));
        let intervals = self.sync_initial_interval(&synchronizer).await;

        let cancel = session.cancellation_token();
        let mut tasks = JoinSet::new();

        let outcome = match intervals {
            Ok(intervals) => {
                self.spawn_tasks(&mut tasks, &relay, &synchronizer, intervals, &cancel);
                Self::supervise(&mut tasks, &tx, console, shutdown, &cancel).await
            }
            Err(e) => Err(e),
        };

        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Gateway task ended abnormally: {}", e);
            }
        }

        for channel in &channels {
            if let Err(e) = channel.unsubscribe().await {
                warn!("Failed to unsubscribe {}: {}", channel.id(), e);
            }
        }

        outcome
    }

    /// Apply the stored interval, seeding the default when there is none.
    ///
    /// Returns the watch on later changes. The watch is opened first so no
    /// change is missed, and a seeded default arrives through it.
    async fn sync_initial_interval(
        &self,
        synchronizer: &IntervalSynchronizer,
    ) -> Result<ValueStream> {
        let intervals = self.store.watch(keys::INTERVAL).await?;

        match self.store.get(keys::INTERVAL).await? {
            Some(value) => match synchronizer.on_remote_interval_changed(&value).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Stored interval not applied: {}", e),
            },
            None => {
                info!(
                    "No interval stored, seeding {}",
                    self.config.default_interval
                );
                self.store
                    .set(keys::INTERVAL, Value::from(self.config.default_interval))
                    .await?;
            }
        }

        Ok(intervals)
    }

    fn spawn_tasks(
        &self,
        tasks: &mut JoinSet<Result<()>>,
        relay: &Arc<TelemetryRelay>,
        synchronizer: &Arc<IntervalSynchronizer>,
        intervals: ValueStream,
        cancel: &CancellationToken,
    ) {
        tasks.spawn({
            let relay = relay.clone();
            let cancel = cancel.clone();
            async move {
                let period = relay.humidity_period();
                relay.run_humidity_loop(period, cancel).await;
                Ok(())
            }
        });

        tasks.spawn(watch_intervals(
            intervals,
            synchronizer.clone(),
            cancel.clone(),
        ));

        if let Some(matrix) = &self.matrix {
            let controller = LightController::new(self.store.clone(), matrix.clone());
            let cancel = cancel.clone();
            tasks.spawn(async move { controller.run(cancel).await });
        } else {
            debug!("No LED matrix, light control disabled");
        }
    }

    async fn supervise<R, F>(
        tasks: &mut JoinSet<Result<()>>,
        tx: &CharacteristicBinding,
        console: R,
        shutdown: F,
        cancel: &CancellationToken,
    ) -> Result<ConsoleExit>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let failed = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Err(e)) if e.is_fatal() => return e,
                    Ok(Err(e)) => warn!("Gateway task failed: {}", e),
                    Err(e) => warn!("Gateway task ended abnormally: {}", e),
                    Ok(Ok(())) => {}
                }
            }
            std::future::pending().await
        };

        tokio::select! {
            exit = run_console(console, tx, cancel.clone()) => exit,
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(ConsoleExit::Cancelled)
            }
            e = failed => Err(e),
        }
    }
}

/// Apply each interval change.
///
/// Changes are accepted in arrival order; only the writes run concurrently,
/// so a slow write does not hold back newer values and an older value can
/// never be the last one written.
async fn watch_intervals(
    mut intervals: ValueStream,
    synchronizer: Arc<IntervalSynchronizer>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut pending: JoinSet<Result<SamplingInterval>> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = pending.join_next(), if !pending.is_empty() => {
                match joined {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if e.is_fatal() => return Err(e),
                    Ok(Err(e)) => warn!("Interval update failed: {}", e),
                    Err(e) => warn!("Interval update ended abnormally: {}", e),
                }
            }
            next = intervals.next() => match next {
                Some(value) => {
                    let Ok(accepted) = synchronizer.accept(&value) else {
                        continue;
                    };
                    let synchronizer = synchronizer.clone();
                    pending.spawn(async move { synchronizer.send(accepted).await });
                }
                None => {
                    warn!("Interval watch ended");
                    break;
                }
            },
        }
    }

    Ok(())
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("light_control", &self.matrix.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::*;
    use crate::ble::transport::{DiscoveredCharacteristic, DiscoveredService};
    use crate::data::HumidityReading;
    use crate::error::Error;
    use crate::hat::{MockHumiditySensor, MockLedMatrix, Rgb};
    use crate::store::MemoryStore;
    use btleplug::api::CharPropFlags;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};

    fn sensor() -> Arc<dyn HumiditySensor> {
        let mut sensor = MockHumiditySensor::new();
        sensor
            .expect_read_humidity()
            .returning(|| HumidityReading::new(40.0));
        Arc::new(sensor)
    }

    fn config() -> RelayConfig {
        RelayConfig::new(fake_address())
    }

    #[tokio::test]
    async fn test_gateway_end_to_end() {
        let link = FakeLink::gateway();
        let store = Arc::new(MemoryStore::new());
        let gateway = Gateway::new(config(), store.clone(), sensor());
        let transport = FakeTransport::new(link.clone());
        let (mut client, server) = tokio::io::duplex(256);

        let run = tokio::spawn(async move {
            gateway
                .run(&transport, BufReader::new(server), std::future::pending())
                .await
        });

        eventually(|| link.writes_to(UART_TX_UUID) == vec![b"5".to_vec()]).await;
        assert_eq!(store.writes_to(keys::INTERVAL), vec![Value::Int(5)]);
        assert_eq!(link.subscribed().len(), 2);

        link.notify(TEMPERATURE_UUID, &[0x88, 0x13]);
        link.notify(TEMPERATURE_UUID, &[0x88]);
        link.notify(UART_RX_UUID, b"hi from nrf");
        eventually(|| store.writes_to(keys::TEMPERATURE) == vec![Value::Float(50.0)]).await;

        store.set(keys::INTERVAL, Value::Int(42)).await.unwrap();
        store.set(keys::INTERVAL, Value::Int(7)).await.unwrap();
        eventually(|| link.writes_to(UART_TX_UUID).last() == Some(&b"7".to_vec())).await;

        assert!(!store.writes_to(keys::HUMIDITY).is_empty());

        client.write_all(b"hello\nexit\n").await.unwrap();
        let exit = run.await.unwrap().unwrap();

        assert_eq!(exit, ConsoleExit::ExitRequested);
        assert_eq!(
            link.writes_to(UART_TX_UUID),
            vec![b"5".to_vec(), b"7".to_vec(), b"hello".to_vec()]
        );
        let mut unsubscribed = link.unsubscribed();
        unsubscribed.sort();
        let mut expected = vec![UART_RX_UUID, TEMPERATURE_UUID];
        expected.sort();
        assert_eq!(unsubscribed, expected);
        assert_eq!(link.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_gateway_uses_stored_interval_and_lights() {
        let link = FakeLink::gateway();
        let store = Arc::new(MemoryStore::with_values([
            (keys::INTERVAL, Value::Int(3)),
            (keys::LIGHT_ROW, Value::Int(0)),
            (keys::LIGHT_COL, Value::Int(7)),
            (keys::LIGHT_R, Value::Int(10)),
            (keys::LIGHT_G, Value::Int(20)),
            (keys::LIGHT_B, Value::Int(30)),
        ]));
        let mut matrix = MockLedMatrix::new();
        matrix
            .expect_set_pixel()
            .with(eq(0), eq(7), eq(Rgb::new(10, 20, 30)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let gateway =
            Gateway::new(config(), store.clone(), sensor()).with_matrix(Arc::new(matrix));
        let transport = FakeTransport::new(link.clone());
        let (_client, server) = tokio::io::duplex(64);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let run = tokio::spawn(async move {
            gateway
                .run(&transport, BufReader::new(server), async {
                    let _ = stop_rx.await;
                })
                .await
        });

        eventually(|| link.writes_to(UART_TX_UUID) == vec![b"3".to_vec()]).await;
        assert!(store.writes_to(keys::INTERVAL).is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set(keys::UPDATE_LIGHT, Value::Bool(true)).await.unwrap();
        eventually(|| store.writes_to(keys::UPDATE_LIGHT).len() == 2).await;

        stop_tx.send(()).unwrap();
        assert_eq!(run.await.unwrap().unwrap(), ConsoleExit::Cancelled);
        assert_eq!(link.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_gateway_protocol_mismatch() {
        let link = FakeLink::new(vec![DiscoveredService {
            uuid: UART_SERVICE_UUID,
            characteristics: vec![
                DiscoveredCharacteristic {
                    uuid: UART_TX_UUID,
                    properties: CharPropFlags::WRITE,
                },
                DiscoveredCharacteristic {
                    uuid: UART_RX_UUID,
                    properties: CharPropFlags::NOTIFY,
                },
            ],
        }]);
        let gateway = Gateway::new(config(), Arc::new(MemoryStore::new()), sensor());
        let transport = FakeTransport::new(link.clone());

        let result = gateway
            .run(&transport, &b"exit\n"[..], std::future::pending())
            .await;

        match result {
            Err(Error::ProtocolMismatch { characteristic, .. }) => assert_eq!(characteristic, "*"),
            other => panic!("expected protocol mismatch, got {:?}", other),
        }
        assert_eq!(link.disconnects(), 1);
        assert!(link.writes().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interval_changes_applied_in_arrival_order() {
        for _ in 0..50 {
            let link = FakeLink::gateway();
            let session = open_gateway_session(&link).await;
            let store = MemoryStore::new();
            let relay = Arc::new(TelemetryRelay::new(
                Arc::new(MemoryStore::new()),
                Arc::new(MockHumiditySensor::new()),
                Duration::from_secs(5),
            ));
            let tx = session.binding(UART_SERVICE_UUID, UART_TX_UUID).unwrap();
            let synchronizer = Arc::new(IntervalSynchronizer::new(tx, relay.clone()));

            let intervals = store.watch(keys::INTERVAL).await.unwrap();
            store.set(keys::INTERVAL, Value::Int(3)).await.unwrap();
            store.set(keys::INTERVAL, Value::Int(7)).await.unwrap();

            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(watch_intervals(
                intervals,
                synchronizer.clone(),
                cancel.clone(),
            ));

            eventually(|| link.writes_to(UART_TX_UUID).last() == Some(&b"7".to_vec())).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
            watcher.await.unwrap().unwrap();

            assert_eq!(synchronizer.cached(), SamplingInterval::new(7).ok());
            assert_eq!(relay.humidity_period(), Duration::from_secs(7));
            let writes = link.writes_to(UART_TX_UUID);
            assert_eq!(writes.last(), Some(&b"7".to_vec()));
            assert!(writes.len() <= 2);

            session.close().await.unwrap();
        }
    }
}
