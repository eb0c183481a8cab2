//! In-memory transport for tests.

use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::ble::transport::{
    CharacteristicId, DiscoveredCharacteristic, DiscoveredService, Link, NotificationEvent,
    NotificationStream, Transport,
};
use crate::ble::uuids::*;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session::{PeripheralSession, ServiceSpec};

pub(crate) const FAKE_ADDRESS: &str = "64:AB:DF:6A:07:14";

#[derive(Default)]
struct Recorded {
    writes: Vec<(Uuid, Vec<u8>)>,
    subscribed: Vec<Uuid>,
    unsubscribed: Vec<Uuid>,
    connects: usize,
    disconnects: usize,
}

/// A peripheral that records what the session does to it.
pub(crate) struct FakeLink {
    services: Vec<DiscoveredService>,
    recorded: Mutex<Recorded>,
    write_delay: Mutex<Option<Duration>>,
    writes_started: AtomicUsize,
    fail_connect: AtomicBool,
    read_value: Mutex<Vec<u8>>,
    notify_tx: mpsc::UnboundedSender<NotificationEvent>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<NotificationEvent>>>,
}

impl FakeLink {
    pub(crate) fn new(services: Vec<DiscoveredService>) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::unbounded();
        Arc::new(Self {
            services,
            recorded: Mutex::new(Recorded::default()),
            write_delay: Mutex::new(None),
            writes_started: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            read_value: Mutex::new(vec![0x88, 0x13]),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
        })
    }

    /// UART plus Environmental Sensing, as the gateway peripheral exposes them.
    pub(crate) fn gateway() -> Arc<Self> {
        Self::new(gateway_services())
    }

    pub(crate) fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    pub(crate) fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Push a notification as if the peripheral sent it.
    pub(crate) fn notify(&self, characteristic: Uuid, data: &[u8]) {
        let _ = self.notify_tx.unbounded_send(NotificationEvent {
            characteristic_uuid: characteristic,
            data: Bytes::copy_from_slice(data),
        });
    }

    pub(crate) fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.recorded.lock().writes.clone()
    }

    pub(crate) fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.recorded
            .lock()
            .writes
            .iter()
            .filter(|(uuid, _)| *uuid == characteristic)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub(crate) fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribed(&self) -> Vec<Uuid> {
        self.recorded.lock().subscribed.clone()
    }

    pub(crate) fn unsubscribed(&self) -> Vec<Uuid> {
        self.recorded.lock().unsubscribed.clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.recorded.lock().connects
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.recorded.lock().disconnects
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed {
                address: FAKE_ADDRESS.to_string(),
                reason: "refused".to_string(),
            });
        }
        self.recorded.lock().connects += 1;
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<DiscoveredService>> {
        Ok(self.services.clone())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let rx = self.notify_rx.lock().take();
        match rx {
            Some(rx) => Ok(rx.boxed()),
            None => Err(Error::NotSupported {
                operation: "notifications",
                uuid: "*".to_string(),
            }),
        }
    }

    async fn read(&self, _id: CharacteristicId) -> Result<Vec<u8>> {
        Ok(self.read_value.lock().clone())
    }

    async fn write(&self, id: CharacteristicId, data: &[u8]) -> Result<()> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.recorded
            .lock()
            .writes
            .push((id.characteristic, data.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, id: CharacteristicId) -> Result<()> {
        self.recorded.lock().subscribed.push(id.characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, id: CharacteristicId) -> Result<()> {
        self.recorded.lock().unsubscribed.push(id.characteristic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.recorded.lock().disconnects += 1;
        Ok(())
    }
}

/// Transport that finds one [`FakeLink`] at [`FAKE_ADDRESS`].
pub(crate) struct FakeTransport {
    link: Arc<FakeLink>,
}

impl FakeTransport {
    pub(crate) fn new(link: Arc<FakeLink>) -> Self {
        Self { link }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn discover(
        &self,
        address: &PeripheralAddress,
        timeout: Duration,
    ) -> Result<Arc<dyn Link>> {
        if !address.matches(FAKE_ADDRESS) {
            return Err(Error::DeviceNotFound {
                address: address.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(self.link.clone())
    }
}

pub(crate) fn gateway_services() -> Vec<DiscoveredService> {
    vec![
        DiscoveredService {
            uuid: UART_SERVICE_UUID,
            characteristics: vec![
                DiscoveredCharacteristic {
                    uuid: UART_TX_UUID,
                    properties: CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
                },
                DiscoveredCharacteristic {
                    uuid: UART_RX_UUID,
                    properties: CharPropFlags::NOTIFY,
                },
            ],
        },
        DiscoveredService {
            uuid: ENVIRONMENTAL_SENSING_SERVICE_UUID,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: TEMPERATURE_UUID,
                properties: CharPropFlags::READ | CharPropFlags::NOTIFY,
            }],
        },
    ]
}

pub(crate) fn fake_address() -> PeripheralAddress {
    PeripheralAddress::new(FAKE_ADDRESS).unwrap()
}

/// Open a session binding both gateway services on `link`.
pub(crate) async fn open_gateway_session(link: &Arc<FakeLink>) -> PeripheralSession {
    PeripheralSession::open(
        &FakeTransport::new(link.clone()),
        fake_address(),
        &[ServiceSpec::nordic_uart(), ServiceSpec::environmental_sensing()],
        SessionConfig::default(),
    )
    .await
    .unwrap()
}

/// Poll `check` until it holds, failing the test after a while.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
