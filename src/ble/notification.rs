//! Notification channels.
//!
//! A [`NotificationChannel`] owns one worker task that runs the registered
//! handler for every payload of a single characteristic, in the order the
//! transport delivered them. The session's dispatcher only enqueues
//! payloads, so a slow handler never holds up the transport or other
//! channels.

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::ble::transport::CharacteristicId;
use crate::error::{Error, Result};
use crate::session::SessionShared;

/// Receives payloads from one subscribed characteristic.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    /// Handle one payload. The payload is only borrowed for this call.
    async fn on_notification(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait]
impl<H: NotificationHandler> NotificationHandler for Arc<H> {
    async fn on_notification(&self, payload: &[u8]) -> Result<()> {
        (**self).on_notification(payload).await
    }
}

/// Adapts a plain closure into a [`NotificationHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> NotificationHandler for FnHandler<F>
where
    F: Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
{
    async fn on_notification(&self, payload: &[u8]) -> Result<()> {
        (self.0)(payload)
    }
}

/// Wrap a closure as a notification handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
{
    FnHandler(f)
}

/// Observer for faults raised by notification handlers.
pub type ErrorObserver = Arc<dyn Fn(&Error) + Send + Sync>;

/// Observer that logs handler faults.
pub fn log_error_observer() -> ErrorObserver {
    Arc::new(|error: &Error| warn!("Notification handler failed: {}", error))
}

/// An active subscription to one characteristic.
pub struct NotificationChannel {
    id: CharacteristicId,
    shared: Arc<SessionShared>,
    active: AtomicBool,
    cancel: CancellationToken,
    delivered: Arc<AtomicU64>,
    worker: u64,
}

impl NotificationChannel {
    /// Start the worker that feeds `handler` from `rx`.
    pub(crate) fn spawn(
        id: CharacteristicId,
        rx: mpsc::UnboundedReceiver<Bytes>,
        handler: Arc<dyn NotificationHandler>,
        shared: Arc<SessionShared>,
    ) -> Self {
        let cancel = shared.cancellation_token();
        let delivered = Arc::new(AtomicU64::new(0));

        let worker = shared.track_worker(tokio::spawn(Self::run(
            id,
            rx,
            handler,
            shared.error_observer(),
            cancel.clone(),
            delivered.clone(),
        )));

        Self {
            id,
            shared,
            active: AtomicBool::new(true),
            cancel,
            delivered,
            worker,
        }
    }

    async fn run(
        id: CharacteristicId,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
        handler: Arc<dyn NotificationHandler>,
        observer: ErrorObserver,
        cancel: CancellationToken,
        delivered: Arc<AtomicU64>,
    ) {
        debug!("Notification worker for {} started", id);

        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };

            trace!(
                "Delivering {} bytes from {}: {:02X?}",
                payload.len(),
                id.characteristic,
                &payload[..payload.len().min(20)]
            );

            let outcome = AssertUnwindSafe(handler.on_notification(&payload))
                .catch_unwind()
                .await;
            delivered.fetch_add(1, Ordering::SeqCst);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => observer(&error),
                Err(panic) => observer(&Error::HandlerPanic {
                    uuid: id.characteristic.to_string(),
                    message: panic_message(panic.as_ref()),
                }),
            }
        }

        debug!("Notification worker for {} stopped", id);
    }

    /// The characteristic this channel listens to.
    pub fn id(&self) -> CharacteristicId {
        self.id
    }

    /// Whether the channel still delivers notifications.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Number of payloads handed to the handler so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Stop delivering notifications. Calling this more than once is a no-op.
    ///
    /// Payloads already queued are still handed to the handler before the
    /// worker exits, unless the session is closing.
    pub async fn unsubscribe(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.remove_subscription(&self.id.characteristic);

        let result = if self.shared.is_live() {
            self.shared.unsubscribe_link(self.id).await
        } else {
            Ok(())
        };

        if let Some(worker) = self.shared.take_worker(self.worker) {
            let _ = worker.await;
        }

        debug!("Unsubscribed from {}", self.id);
        result
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        if self.active.load(Ordering::SeqCst) {
            self.shared.remove_subscription(&self.id.characteristic);
            self.cancel.cancel();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "???".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "???");
    }

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = handler_fn(move |payload: &[u8]| {
            sink.lock().push(payload.to_vec());
            Ok(())
        });

        handler.on_notification(&[1, 2]).await.unwrap();
        handler.on_notification(&[3]).await.unwrap();

        assert_eq!(*seen.lock(), vec![vec![1, 2], vec![3]]);
    }
}
