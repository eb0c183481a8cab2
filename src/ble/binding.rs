//! GATT characteristic bindings.
//!
//! A [`CharacteristicBinding`] is a resolved characteristic on a bound
//! [`PeripheralSession`](crate::session::PeripheralSession). It stays valid
//! until the session closes; any use afterwards fails with
//! [`Error::SessionClosed`].

use btleplug::api::CharPropFlags;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::notification::{NotificationChannel, NotificationHandler};
use crate::ble::transport::CharacteristicId;
use crate::ble::uuids::{uuid_name, MAX_WRITE_LEN};
use crate::error::{Error, Result};
use crate::session::SessionShared;

/// One resolved characteristic of a bound session.
#[derive(Clone)]
pub struct CharacteristicBinding {
    id: CharacteristicId,
    properties: CharPropFlags,
    shared: Arc<SessionShared>,
}

impl CharacteristicBinding {
    pub(crate) fn new(
        id: CharacteristicId,
        properties: CharPropFlags,
        shared: Arc<SessionShared>,
    ) -> Self {
        Self {
            id,
            properties,
            shared,
        }
    }

    /// Service and characteristic UUID of this binding.
    pub fn id(&self) -> CharacteristicId {
        self.id
    }

    /// Characteristic UUID of this binding.
    pub fn uuid(&self) -> Uuid {
        self.id.characteristic
    }

    /// Operations the peripheral advertised for this characteristic.
    pub fn properties(&self) -> CharPropFlags {
        self.properties
    }

    /// Check if the characteristic accepts writes.
    pub fn can_write(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    }

    /// Check if the characteristic supports on-demand reads.
    pub fn can_read(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }

    /// Check if the characteristic sends notifications.
    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }

    /// Write a payload of at most [`MAX_WRITE_LEN`] bytes.
    ///
    /// Writes through every binding of a session are serialized, so payloads
    /// never interleave on the wire. Oversized payloads are rejected whole.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_WRITE_LEN {
            return Err(Error::PayloadTooLarge {
                uuid: self.uuid().to_string(),
                len: data.len(),
                max: MAX_WRITE_LEN,
            });
        }
        if !self.can_write() {
            return Err(Error::NotSupported {
                operation: "write",
                uuid: self.uuid().to_string(),
            });
        }
        self.shared.ensure_live("write", self.id)?;

        let cancel = self.shared.cancellation_token();
        let _writer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.shared.closed("write", self.id)),
            guard = self.shared.writer_slot() => guard,
        };

        // The session may have closed while this write waited for its turn.
        self.shared.ensure_live("write", self.id)?;

        let timeout = self.shared.operation_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.shared.closed("write", self.id)),
            result = tokio::time::timeout(timeout, self.shared.link().write(self.id, data)) => {
                match result {
                    Ok(Ok(())) => {
                        trace!("Wrote {} bytes to {}", data.len(), self.id);
                        Ok(())
                    }
                    Ok(Err(e)) => Err(self.write_error(e)),
                    Err(_) => Err(Error::Write {
                        uuid: self.uuid().to_string(),
                        reason: timed_out(timeout),
                    }),
                }
            }
        }
    }

    /// Read the current value.
    pub async fn read(&self) -> Result<Vec<u8>> {
        if !self.can_read() {
            return Err(Error::NotSupported {
                operation: "read",
                uuid: self.uuid().to_string(),
            });
        }
        self.shared.ensure_live("read", self.id)?;

        let cancel = self.shared.cancellation_token();
        let timeout = self.shared.operation_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.shared.closed("read", self.id)),
            result = tokio::time::timeout(timeout, self.shared.link().read(self.id)) => {
                match result {
                    Ok(Ok(data)) => Ok(data),
                    Ok(Err(e @ Error::Read { .. })) => Err(e),
                    Ok(Err(e)) => Err(Error::Read {
                        uuid: self.uuid().to_string(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(Error::Read {
                        uuid: self.uuid().to_string(),
                        reason: timed_out(timeout),
                    }),
                }
            }
        }
    }

    /// Register `handler` for every notification of this characteristic.
    ///
    /// A binding has at most one active subscription; a second call fails
    /// with [`Error::AlreadySubscribed`] until the first channel is
    /// unsubscribed.
    pub async fn subscribe<H: NotificationHandler>(&self, handler: H) -> Result<NotificationChannel> {
        if !self.can_notify() {
            return Err(Error::NotSupported {
                operation: "subscribe",
                uuid: self.uuid().to_string(),
            });
        }
        self.shared.ensure_live("subscribe", self.id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        if !self.shared.register_subscription(self.id, tx) {
            return Err(Error::AlreadySubscribed {
                uuid: self.uuid().to_string(),
            });
        }

        let timeout = self.shared.operation_timeout();
        let subscribed = match tokio::time::timeout(timeout, self.shared.link().subscribe(self.id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ Error::Subscribe { .. })) => Err(e),
            Ok(Err(e)) => Err(Error::Subscribe {
                uuid: self.uuid().to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::Subscribe {
                uuid: self.uuid().to_string(),
                reason: timed_out(timeout),
            }),
        };

        if let Err(e) = subscribed {
            self.shared.remove_subscription(&self.id.characteristic);
            return Err(e);
        }

        debug!(
            "Subscribed to {} notifications ({})",
            uuid_name(&self.id.characteristic),
            self.id
        );

        Ok(NotificationChannel::spawn(
            self.id,
            rx,
            Arc::new(handler),
            self.shared.clone(),
        ))
    }

    fn write_error(&self, error: Error) -> Error {
        match error {
            e @ Error::Write { .. } => e,
            other => Error::Write {
                uuid: self.uuid().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for CharacteristicBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacteristicBinding")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .finish()
    }
}

fn timed_out(timeout: Duration) -> String {
    format!("timed out after {} ms", timeout.as_millis())
}
