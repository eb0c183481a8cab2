//! Sampling interval synchronization.
//!
//! The value store holds the authoritative interval. Every change is
//! validated, cached, applied to the humidity loop and written to the
//! peripheral over UART TX as decimal ASCII.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ble::binding::CharacteristicBinding;
use crate::data::{SamplingInterval, Value};
use crate::error::Result;
use crate::relay::TelemetryRelay;

#[derive(Debug, Default)]
struct CachedInterval {
    interval: Option<SamplingInterval>,
    generation: u64,
}

/// An interval taken into the cache and waiting to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedInterval {
    /// The validated interval.
    pub interval: SamplingInterval,
    generation: u64,
}

/// Keeps the peripheral and the humidity loop on the store's interval.
pub struct IntervalSynchronizer {
    tx: CharacteristicBinding,
    relay: Arc<TelemetryRelay>,
    cache: RwLock<CachedInterval>,
    write_order: tokio::sync::Mutex<()>,
}

impl IntervalSynchronizer {
    /// Create a synchronizer writing through `tx`.
    pub fn new(tx: CharacteristicBinding, relay: Arc<TelemetryRelay>) -> Self {
        Self {
            tx,
            relay,
            cache: RwLock::new(CachedInterval::default()),
            write_order: tokio::sync::Mutex::new(()),
        }
    }

    /// The last accepted interval.
    pub fn cached(&self) -> Option<SamplingInterval> {
        self.cache.read().interval
    }

    /// Apply an interval value read from the store.
    ///
    /// Concurrent calls are safe: writes reach the peripheral one at a time,
    /// and a value superseded while waiting for its turn is not sent, so the
    /// value accepted last is always the last one written.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInterval`](crate::Error::InvalidInterval) if `value`
    /// is not a whole number in 1..=10; the cache is left unchanged. Write
    /// errors from the TX binding are passed through.
    pub async fn on_remote_interval_changed(&self, value: &Value) -> Result<SamplingInterval> {
        let accepted = self.accept(value)?;
        self.send(accepted).await
    }

    /// Validate `value` and make it the current interval without writing it.
    ///
    /// Callers that receive changes in order call this in that order and
    /// hand the result to [`send`](Self::send), possibly from another task.
    pub fn accept(&self, value: &Value) -> Result<AcceptedInterval> {
        let interval = match SamplingInterval::from_value(value) {
            Ok(interval) => interval,
            Err(e) => {
                warn!("Ignoring interval {}: {}", value, e);
                return Err(e);
            }
        };

        let generation = {
            let mut cache = self.cache.write();
            cache.generation += 1;
            cache.interval = Some(interval);
            self.relay.set_humidity_period(interval.as_duration());
            cache.generation
        };
        info!("Sampling interval is now {}", interval);

        Ok(AcceptedInterval {
            interval,
            generation,
        })
    }

    /// Write an accepted interval to the peripheral, unless a later one has
    /// been accepted since.
    pub async fn send(&self, accepted: AcceptedInterval) -> Result<SamplingInterval> {
        let AcceptedInterval {
            interval,
            generation,
        } = accepted;

        let _order = self.write_order.lock().await;
        if self.cache.read().generation != generation {
            debug!("Interval {} superseded before it was sent", interval);
            return Ok(interval);
        }

        self.tx.write(&interval.encode()).await?;
        debug!("Sent interval {} to peripheral", interval);

        Ok(interval)
    }
}

impl std::fmt::Debug for IntervalSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalSynchronizer")
            .field("tx", &self.tx)
            .field("cached", &self.cached())
            .finish()
    }
}
