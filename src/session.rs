//! Peripheral session lifecycle.
//!
//! A [`PeripheralSession`] owns exactly one connection to one peripheral:
//!
//! ```text
//! Disconnected -> Discovering -> Connecting -> Bound -> Closing -> Disconnected
//! ```
//!
//! Opening resolves every declared characteristic before the session becomes
//! observable, and releases the link on every failure path. The session
//! never reconnects on its own; callers open a new session instead.

use btleplug::api::CharPropFlags;
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::address::PeripheralAddress;
use crate::ble::binding::CharacteristicBinding;
use crate::ble::notification::{log_error_observer, ErrorObserver};
use crate::ble::transport::{
    CharacteristicId, DiscoveredService, Link, NotificationEvent, NotificationStream, Transport,
};
use crate::ble::uuids::*;
use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Scanning for the peripheral.
    Discovering,
    /// Connecting and resolving characteristics.
    Connecting,
    /// Connected with every declared characteristic bound.
    Bound,
    /// Tearing down.
    Closing,
}

impl SessionState {
    /// Check if the session is usable.
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Discovering | Self::Connecting | Self::Closing)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Discovering)
                | (Discovering, Connecting)
                | (Connecting, Bound)
                | (Discovering | Connecting | Bound, Closing)
                | (Closing, Disconnected)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Bound => write!(f, "Bound"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

/// Event for session state changes.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// Address of the peripheral.
    pub address: String,
    /// The new state.
    pub state: SessionState,
}

/// A service and the characteristics of it a session must bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service UUID.
    pub service: Uuid,
    /// Required characteristic UUIDs.
    pub characteristics: Vec<Uuid>,
}

impl ServiceSpec {
    /// Declare a service with its required characteristics.
    pub fn new(service: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            service,
            characteristics: characteristics.into_iter().collect(),
        }
    }

    /// Nordic UART with TX and RX.
    pub fn nordic_uart() -> Self {
        Self::new(UART_SERVICE_UUID, [UART_TX_UUID, UART_RX_UUID])
    }

    /// Environmental Sensing with Temperature.
    pub fn environmental_sensing() -> Self {
        Self::new(ENVIRONMENTAL_SENSING_SERVICE_UUID, [TEMPERATURE_UUID])
    }
}

/// State cell that enforces the lifecycle and emits events.
struct StateCell {
    address: String,
    state: RwLock<SessionState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl StateCell {
    fn new(address: &PeripheralAddress) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            address: address.to_string(),
            state: RwLock::new(SessionState::Disconnected),
            event_tx,
        }
    }

    fn get(&self) -> SessionState {
        *self.state.read()
    }

    /// Update the state and emit an event.
    fn advance(&self, next: SessionState) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if !previous.can_transition_to(next) {
                return Err(Error::InvalidState {
                    from: previous.to_string(),
                    to: next.to_string(),
                });
            }
            *state = next;
            previous
        };

        debug!("Session {} state: {} -> {}", self.address, previous, next);

        let _ = self.event_tx.send(SessionEvent {
            address: self.address.clone(),
            state: next,
        });

        Ok(())
    }
}

/// Subscription registered with the dispatcher.
struct Subscription {
    id: CharacteristicId,
    tx: mpsc::UnboundedSender<Bytes>,
}

/// Session internals shared with bindings and notification channels.
pub(crate) struct SessionShared {
    link: Arc<dyn Link>,
    state: Arc<StateCell>,
    config: SessionConfig,
    cancel: CancellationToken,
    write_lock: tokio::sync::Mutex<()>,
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
    workers: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_worker: AtomicU64,
    error_observer: ErrorObserver,
}

impl SessionShared {
    pub(crate) fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    pub(crate) fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    pub(crate) fn error_observer(&self) -> ErrorObserver {
        self.error_observer.clone()
    }

    /// Token cancelled when the session starts closing.
    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state.get().is_bound() && !self.cancel.is_cancelled()
    }

    pub(crate) fn closed(&self, operation: &'static str, id: CharacteristicId) -> Error {
        error!(
            "{} on {} attempted after session {} closed",
            operation, id, self.state.address
        );
        Error::SessionClosed {
            operation,
            uuid: id.characteristic.to_string(),
        }
    }

    pub(crate) fn ensure_live(&self, operation: &'static str, id: CharacteristicId) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(self.closed(operation, id))
        }
    }

    /// Wait for exclusive use of the write path.
    pub(crate) async fn writer_slot(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Returns false if the characteristic already has a subscriber.
    pub(crate) fn register_subscription(
        &self,
        id: CharacteristicId,
        tx: mpsc::UnboundedSender<Bytes>,
    ) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&id.characteristic) {
            return false;
        }
        subscriptions.insert(id.characteristic, Subscription { id, tx });
        true
    }

    pub(crate) fn remove_subscription(&self, uuid: &Uuid) {
        self.subscriptions.lock().remove(uuid);
    }

    /// Keep a channel worker so close can wait for it. Returns its key.
    pub(crate) fn track_worker(&self, worker: JoinHandle<()>) -> u64 {
        let key = self.next_worker.fetch_add(1, Ordering::Relaxed);
        self.workers.lock().insert(key, worker);
        key
    }

    pub(crate) fn take_worker(&self, key: u64) -> Option<JoinHandle<()>> {
        self.workers.lock().remove(&key)
    }

    /// Wait for every channel worker, including a handler still running.
    async fn join_workers(&self) {
        let workers = self
            .workers
            .lock()
            .drain()
            .map(|(_, worker)| worker)
            .collect::<Vec<_>>();

        for worker in workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout(self.config.operation_timeout, worker)
                .await
                .is_err()
            {
                warn!(
                    "Notification handler still running after {} ms, aborting",
                    self.config.operation_timeout.as_millis()
                );
                abort.abort();
            }
        }
    }

    pub(crate) async fn unsubscribe_link(&self, id: CharacteristicId) -> Result<()> {
        match tokio::time::timeout(self.config.operation_timeout, self.link.unsubscribe(id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Subscribe {
                uuid: id.characteristic.to_string(),
                reason: "unsubscribe timed out".to_string(),
            }),
        }
    }

    /// Hand a notification to its channel without waiting on the handler.
    fn route(&self, event: NotificationEvent) {
        let subscriptions = self.subscriptions.lock();
        match subscriptions.get(&event.characteristic_uuid) {
            Some(subscription) => {
                if subscription.tx.send(event.data).is_err() {
                    trace!("Channel for {} already stopped", subscription.id);
                }
            }
            None => trace!(
                "Dropping notification from unsubscribed {}",
                event.characteristic_uuid
            ),
        }
    }
}

/// A connected, bound peripheral.
pub struct PeripheralSession {
    address: PeripheralAddress,
    state: Arc<StateCell>,
    shared: Arc<SessionShared>,
    bindings: HashMap<CharacteristicId, CharacteristicBinding>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    close_lock: tokio::sync::Mutex<()>,
}

impl PeripheralSession {
    /// Discover, connect and bind every characteristic in `specs`.
    ///
    /// Handler faults are logged; use [`open_with_observer`](Self::open_with_observer)
    /// to receive them instead.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] or [`Error::ConnectionFailed`] when the
    /// peripheral cannot be reached, [`Error::ProtocolMismatch`] when a
    /// declared service or characteristic is absent.
    pub async fn open(
        transport: &dyn Transport,
        address: PeripheralAddress,
        specs: &[ServiceSpec],
        config: SessionConfig,
    ) -> Result<Self> {
        Self::open_with_observer(transport, address, specs, config, log_error_observer()).await
    }

    /// Like [`open`](Self::open), reporting notification handler faults to `observer`.
    pub async fn open_with_observer(
        transport: &dyn Transport,
        address: PeripheralAddress,
        specs: &[ServiceSpec],
        config: SessionConfig,
        observer: ErrorObserver,
    ) -> Result<Self> {
        let state = Arc::new(StateCell::new(&address));

        state.advance(SessionState::Discovering)?;
        info!("Opening session to {}", address);

        let discovered = tokio::time::timeout(
            config.scan_timeout,
            transport.discover(&address, config.scan_timeout),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::DeviceNotFound {
                address: address.to_string(),
                timeout_ms: config.scan_timeout.as_millis() as u64,
            })
        });

        let link = match discovered {
            Ok(link) => link,
            Err(e) => {
                warn!("Discovery of {} failed: {}", address, e);
                Self::abort(&state)?;
                return Err(e);
            }
        };

        state.advance(SessionState::Connecting)?;

        let (resolved, notifications) = match Self::connect_and_resolve(&*link, &address, specs, &config).await {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Session to {} failed while connecting: {}", address, e);
                state.advance(SessionState::Closing)?;
                if let Err(release) = Self::release(&*link, &config).await {
                    warn!("Failed to release link to {}: {}", address, release);
                }
                state.advance(SessionState::Disconnected)?;
                return Err(e);
            }
        };

        let shared = Arc::new(SessionShared {
            link,
            state: state.clone(),
            config,
            cancel: CancellationToken::new(),
            write_lock: tokio::sync::Mutex::new(()),
            subscriptions: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(0),
            error_observer: observer,
        });

        let bindings = resolved
            .into_iter()
            .map(|(id, properties)| (id, CharacteristicBinding::new(id, properties, shared.clone())))
            .collect::<HashMap<_, _>>();

        let dispatcher = tokio::spawn(Self::dispatch(shared.clone(), notifications));

        state.advance(SessionState::Bound)?;
        info!(
            "Session to {} bound with {} characteristics",
            address,
            bindings.len()
        );

        Ok(Self {
            address,
            state,
            shared,
            bindings,
            dispatcher: Mutex::new(Some(dispatcher)),
            close_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn connect_and_resolve(
        link: &dyn Link,
        address: &PeripheralAddress,
        specs: &[ServiceSpec],
        config: &SessionConfig,
    ) -> Result<(Vec<(CharacteristicId, CharPropFlags)>, NotificationStream)> {
        let services = tokio::time::timeout(config.connect_timeout, async {
            link.connect().await?;
            link.discover_services().await
        })
        .await
        .map_err(|_| Error::ConnectionFailed {
            address: address.to_string(),
            reason: format!(
                "connect and service discovery timed out after {} ms",
                config.connect_timeout.as_millis()
            ),
        })?
        .map_err(|e| match e {
            e @ Error::ConnectionFailed { .. } => e,
            other => Error::ConnectionFailed {
                address: address.to_string(),
                reason: other.to_string(),
            },
        })?;

        let resolved = resolve(&services, specs)?;
        let notifications = tokio::time::timeout(config.operation_timeout, link.notifications())
            .await
            .map_err(|_| Error::ConnectionFailed {
                address: address.to_string(),
                reason: format!(
                    "notification stream not ready after {} ms",
                    config.operation_timeout.as_millis()
                ),
            })??;

        Ok((resolved, notifications))
    }

    /// Move a session that never bound back to Disconnected.
    fn abort(state: &StateCell) -> Result<()> {
        state.advance(SessionState::Closing)?;
        state.advance(SessionState::Disconnected)
    }

    async fn release(link: &dyn Link, config: &SessionConfig) -> Result<()> {
        match tokio::time::timeout(config.operation_timeout, link.disconnect()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "disconnect".to_string(),
                timeout_ms: config.operation_timeout.as_millis() as u64,
            }),
        }
    }

    async fn dispatch(shared: Arc<SessionShared>, mut notifications: NotificationStream) {
        debug!("Notification dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                next = notifications.next() => match next {
                    Some(event) => shared.route(event),
                    None => {
                        warn!("Notification stream from {} ended", shared.state.address);
                        break;
                    }
                },
            }
        }

        debug!("Notification dispatcher stopped");
    }

    /// Tear the session down. Safe to call repeatedly.
    ///
    /// Cancels pending writes and session-scoped tasks, unsubscribes every
    /// channel and waits for handlers still running, then releases the link.
    pub async fn close(&self) -> Result<()> {
        let _closing = self.close_lock.lock().await;

        if self.state.get() == SessionState::Disconnected {
            return Ok(());
        }

        info!("Closing session to {}", self.address);
        self.state.advance(SessionState::Closing)?;
        self.shared.cancel.cancel();

        let subscriptions = self
            .shared
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription.id)
            .collect::<Vec<_>>();

        for id in subscriptions {
            if let Err(e) = self.shared.unsubscribe_link(id).await {
                warn!("Failed to unsubscribe {} during close: {}", id, e);
            }
        }

        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
        self.shared.join_workers().await;

        let released = Self::release(self.shared.link(), &self.shared.config).await;
        if let Err(ref e) = released {
            error!("Failed to disconnect from {}: {}", self.address, e);
        }

        self.state.advance(SessionState::Disconnected)?;
        info!("Session to {} closed", self.address);

        released
    }

    /// Get the binding for a declared characteristic.
    pub fn binding(&self, service: Uuid, characteristic: Uuid) -> Result<CharacteristicBinding> {
        self.bindings
            .get(&CharacteristicId::new(service, characteristic))
            .cloned()
            .ok_or_else(|| Error::ProtocolMismatch {
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            })
    }

    /// All bindings of this session.
    pub fn bindings(&self) -> impl Iterator<Item = &CharacteristicBinding> {
        self.bindings.values()
    }

    /// The peripheral address.
    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Check if the session is bound.
    pub fn is_bound(&self) -> bool {
        self.state().is_bound()
    }

    /// Token cancelled when the session starts closing.
    ///
    /// Tasks that must not outlive the session select on this token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancellation_token()
    }

    /// Subscribe to state change events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.event_tx.subscribe()
    }
}

impl Drop for PeripheralSession {
    fn drop(&mut self) {
        if self.state.get() != SessionState::Disconnected {
            warn!("Session to {} dropped without close", self.address);
        }
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for PeripheralSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralSession")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Match every declared characteristic against the discovered services.
fn resolve(
    services: &[DiscoveredService],
    specs: &[ServiceSpec],
) -> Result<Vec<(CharacteristicId, CharPropFlags)>> {
    let mut resolved = Vec::new();

    for spec in specs {
        let service = services
            .iter()
            .find(|s| s.uuid == spec.service)
            .ok_or_else(|| Error::ProtocolMismatch {
                service: spec.service.to_string(),
                characteristic: "*".to_string(),
            })?;

        for uuid in &spec.characteristics {
            let characteristic =
                service
                    .characteristic(uuid)
                    .ok_or_else(|| Error::ProtocolMismatch {
                        service: spec.service.to_string(),
                        characteristic: uuid.to_string(),
                    })?;

            resolved.push((
                CharacteristicId::new(spec.service, *uuid),
                characteristic.properties,
            ));
        }
    }

    Ok(resolved)
}
