//! Transport seam between the session state machine and a BLE stack.
//!
//! The session only talks to [`Transport`] and [`Link`]; the btleplug
//! implementation lives in [`crate::ble::platform`].

use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::error::Result;

/// Identifies one characteristic within one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    /// UUID of the owning service.
    pub service: Uuid,
    /// UUID of the characteristic.
    pub characteristic: Uuid,
}

impl CharacteristicId {
    /// Create a new characteristic identifier.
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Supported operations.
    pub properties: CharPropFlags,
}

/// A service found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    /// Look up a characteristic of this service.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Notification event from a characteristic.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Bytes,
}

/// Stream of every notification arriving on a link, in transport order.
pub type NotificationStream = BoxStream<'static, NotificationEvent>;

/// Something that can find peripherals.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan until a peripheral with `address` is seen or `timeout` elapses.
    async fn discover(
        &self,
        address: &PeripheralAddress,
        timeout: Duration,
    ) -> Result<Arc<dyn Link>>;
}

/// One (not yet connected) peripheral.
#[async_trait]
pub trait Link: Send + Sync {
    /// Open the underlying connection.
    async fn connect(&self) -> Result<()>;

    /// Discover the GATT services of a connected peripheral.
    async fn discover_services(&self) -> Result<Vec<DiscoveredService>>;

    /// Stream of notifications for every subscribed characteristic.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Read a characteristic value.
    async fn read(&self, id: CharacteristicId) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write(&self, id: CharacteristicId, data: &[u8]) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, id: CharacteristicId) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, id: CharacteristicId) -> Result<()>;

    /// Close the underlying connection.
    async fn disconnect(&self) -> Result<()>;
}
