//! Publish/subscribe messaging between control-plane components.
//!
//! [`Messenger`] defines the interface the rest of the workspace programs
//! against.  The default implementation is [`ProcessBus`], an in-process
//! fan-out over bounded channels.  To move messaging onto an external broker
//! (NATS, …), implement [`Messenger`] for your transport and swap the
//! concrete type at wiring time; subjects and payloads are plain bytes so no
//! other code changes.
//!
//! Delivery is best-effort per subscriber: a subscriber whose buffer is full
//! loses that message while everyone else still receives it.  Consumers that
//! need the authoritative value re-read it from its source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each subscriber's buffer.
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// Errors surfaced by a [`Messenger`] implementation.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus (or the underlying transport connection) has shut down.
    #[error("message bus is closed")]
    Closed,
}

/// Byte-oriented publish/subscribe messaging.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Publish `payload` to every current subscriber of `subject`.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Open a new subscription on `subject`.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

type Registry = Mutex<HashMap<String, Vec<Slot>>>;

/// In-process [`Messenger`]: a shared subject registry with bounded
/// per-subscriber channels.
#[derive(Default)]
pub struct ProcessBus {
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl ProcessBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Messenger for ProcessBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError> {
        let payload = Bytes::copy_from_slice(payload);
        let mut registry = self.registry.lock().map_err(|_| BusError::Closed)?;
        let Some(slots) = registry.get_mut(subject) else {
            return Ok(());
        };
        // Non-blocking fan-out.  Full buffers drop the message for that
        // subscriber only; closed receivers are pruned in place.
        slots.retain(|slot| match slot.tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subject, subscriber = slot.id, "subscriber buffer full; dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.lock().map_err(|_| BusError::Closed)?;
        registry
            .entry(subject.to_owned())
            .or_default()
            .push(Slot { id, tx });
        Ok(Subscription {
            rx,
            subject: subject.to_owned(),
            id,
            registry: Arc::clone(&self.registry),
            detached: false,
        })
    }
}

/// A live subscription.
///
/// Owns the receiving half of the subscriber channel plus the handle needed
/// to deregister.  Dropping the subscription unsubscribes; handlers that must
/// detach on a specific exit path call [`Subscription::unsubscribe`]
/// explicitly.
pub struct Subscription {
    rx: mpsc::Receiver<Bytes>,
    subject: String,
    id: u64,
    registry: Arc<Registry>,
    detached: bool,
}

impl Subscription {
    /// Receive the next message, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Deregister from the bus.  Messages already buffered remain readable
    /// through [`Subscription::recv`] until the buffer drains.
    pub fn unsubscribe(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Ok(mut registry) = self.registry.lock() {
            if let Some(slots) = registry.get_mut(&self.subject) {
                slots.retain(|slot| slot.id != self.id);
                if slots.is_empty() {
                    registry.remove(&self.subject);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
