//! btleplug implementation of the transport seam.
//!
//! Discovery scans the first adapter until the requested address shows up;
//! a [`BtleLink`] then caches the resolved characteristics so reads, writes
//! and subscriptions can be addressed by [`CharacteristicId`].

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::ble::address::PeripheralAddress;
use crate::ble::transport::{
    CharacteristicId, DiscoveredCharacteristic, DiscoveredService, Link, NotificationEvent,
    NotificationStream, Transport,
};
use crate::error::{Error, Result};

/// Transport backed by the system Bluetooth adapter.
pub struct BtleTransport {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BtleTransport {
    /// Create a transport on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a transport with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Look for the address among peripherals the adapter already knows.
    async fn find_known(&self, address: &PeripheralAddress) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if Self::is_match(address, &peripheral) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    /// Wait on adapter events until the address is seen.
    async fn wait_for(&self, address: &PeripheralAddress) -> Result<Peripheral> {
        let mut events = self.adapter.events().await?;

        if let Some(peripheral) = self.find_known(address).await? {
            return Ok(peripheral);
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            if let Some(peripheral) = self.peripheral_for(&id).await {
                if Self::is_match(address, &peripheral) {
                    return Ok(peripheral);
                }
            }
        }

        Err(Error::BluetoothUnavailable)
    }

    async fn peripheral_for(&self, id: &PeripheralId) -> Option<Peripheral> {
        match self.adapter.peripheral(id).await {
            Ok(p) => Some(p),
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                None
            }
        }
    }

    /// Address match, falling back to the platform id where the address is hidden (macOS).
    fn is_match(address: &PeripheralAddress, peripheral: &Peripheral) -> bool {
        address.matches(&peripheral.address().to_string())
            || address.matches(&peripheral.id().to_string())
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn discover(
        &self,
        address: &PeripheralAddress,
        timeout: Duration,
    ) -> Result<Arc<dyn Link>> {
        info!("Discovering {} (timeout {:?})", address, timeout);

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let found = tokio::time::timeout(timeout, self.wait_for(address)).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Ok(Ok(peripheral)) => {
                info!("Found device {}", address);
                Ok(Arc::new(BtleLink::new(peripheral, address.clone())))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::DeviceNotFound {
                address: address.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// A btleplug peripheral with its resolved characteristics.
pub struct BtleLink {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Address the peripheral was discovered under.
    address: PeripheralAddress,
    /// Cached characteristics by service and characteristic UUID.
    characteristics: RwLock<HashMap<CharacteristicId, Characteristic>>,
}

impl BtleLink {
    /// Wrap a discovered peripheral.
    pub fn new(peripheral: Peripheral, address: PeripheralAddress) -> Self {
        Self {
            peripheral,
            address,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, id: CharacteristicId) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ProtocolMismatch {
                service: id.service.to_string(),
                characteristic: id.characteristic.to_string(),
            })
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
            return Ok(());
        }

        self.peripheral
            .connect()
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: self.address.to_string(),
                reason: e.to_string(),
            })?;

        info!("Connected to {}", self.address);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<DiscoveredService>> {
        self.peripheral.discover_services().await?;

        let mut cache = self.characteristics.write();
        cache.clear();

        let services = self
            .peripheral
            .services()
            .into_iter()
            .map(|service| {
                let characteristics = service
                    .characteristics
                    .into_iter()
                    .map(|characteristic| {
                        debug!(
                            "Found characteristic: {} in service {}",
                            characteristic.uuid, service.uuid
                        );
                        let discovered = DiscoveredCharacteristic {
                            uuid: characteristic.uuid,
                            properties: characteristic.properties,
                        };
                        cache.insert(
                            CharacteristicId::new(service.uuid, characteristic.uuid),
                            characteristic,
                        );
                        discovered
                    })
                    .collect();

                DiscoveredService {
                    uuid: service.uuid,
                    characteristics,
                }
            })
            .collect::<Vec<_>>();

        debug!("Discovered {} characteristics", cache.len());

        Ok(services)
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;

        Ok(stream
            .map(|notification| NotificationEvent {
                characteristic_uuid: notification.uuid,
                data: Bytes::from(notification.value),
            })
            .boxed())
    }

    async fn read(&self, id: CharacteristicId) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(id)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(|e| Error::Read {
                uuid: id.characteristic.to_string(),
                reason: e.to_string(),
            })?;

        trace!("Read {} bytes from characteristic {}", data.len(), id);

        Ok(data)
    }

    async fn write(&self, id: CharacteristicId, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(id)?;

        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(|e| Error::Write {
                uuid: id.characteristic.to_string(),
                reason: e.to_string(),
            })?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), id);

        Ok(())
    }

    async fn subscribe(&self, id: CharacteristicId) -> Result<()> {
        let characteristic = self.characteristic(id)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            id, characteristic.properties
        );

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| Error::Subscribe {
                uuid: id.characteristic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, id: CharacteristicId) -> Result<()> {
        let characteristic = self.characteristic(id)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(|e| Error::Subscribe {
                uuid: id.characteristic.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Unsubscribed from notifications from {}", id);

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        info!("Disconnected from {}", self.address);
        Ok(())
    }
}
