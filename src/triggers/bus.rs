//! Event bus trait and native implementation.
//!
//! Defines the `EventBus` and `EventReceiver` traits for delivering domain
//! events to the trigger dispatcher. The default `NativeEventBus` uses
//! `tokio::sync::broadcast` for in-process messaging with no external
//! dependencies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};

/// Default broadcast channel capacity for the native bus.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 4096;

/// A domain event as delivered to the trigger layer.
///
/// Events are tenant-scoped: a delivery only ever admits workflows belonging
/// to `tenant_id`. The payload is snapshotted into each admitted execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Tenant the event belongs to
    pub tenant_id: String,
    /// Event name, e.g. "lead_created"
    pub event: String,
    /// Event payload data
    #[serde(default)]
    pub payload: Value,
}

impl EventMessage {
    pub fn new(tenant_id: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Trait for event delivery backends.
///
/// Implementations carry `EventMessage` values from publishers to
/// subscribers. The default is an in-process broadcast channel; anything
/// with the same fan-out semantics (an external queue, a test fixture) can
/// stand in behind this trait.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Publish an event to all subscribers.
    async fn publish(&self, message: EventMessage) -> Result<()>;

    /// Create a new receiver that will get future published events.
    fn subscribe(&self) -> Box<dyn EventReceiver>;
}

/// Trait for receiving events from a bus.
#[async_trait]
pub trait EventReceiver: Send {
    /// Wait for the next event.
    ///
    /// Returns `Err` when the bus is shut down and no more events can
    /// arrive.
    async fn recv(&mut self) -> Result<EventMessage>;
}

/// In-process event bus over `tokio::sync::broadcast`.
pub struct NativeEventBus {
    tx: broadcast::Sender<EventMessage>,
}

impl NativeEventBus {
    /// Create a bus with the given channel capacity.
    ///
    /// A zero capacity is floored to one; the broadcast channel rejects
    /// zero outright.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        debug!("Native event bus created with capacity {}", capacity);
        Self { tx }
    }
}

impl Default for NativeEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

#[async_trait]
impl EventBus for NativeEventBus {
    async fn publish(&self, message: EventMessage) -> Result<()> {
        // send errors only mean nobody is subscribed yet, which is fine for
        // a broadcast bus.
        match self.tx.send(message) {
            Ok(count) => {
                debug!("Published event to {} receiver(s)", count);
                Ok(())
            }
            Err(_) => {
                debug!("Published event but no active receivers");
                Ok(())
            }
        }
    }

    fn subscribe(&self) -> Box<dyn EventReceiver> {
        Box::new(NativeEventReceiver {
            rx: self.tx.subscribe(),
        })
    }
}

struct NativeEventReceiver {
    rx: broadcast::Receiver<EventMessage>,
}

#[async_trait]
impl EventReceiver for NativeEventReceiver {
    async fn recv(&mut self) -> Result<EventMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Missed messages are dropped; keep receiving.
                    tracing::warn!("Event receiver lagged by {} message(s)", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Execution("Event bus channel closed".to_string()));
                }
            }
        }
    }
}
