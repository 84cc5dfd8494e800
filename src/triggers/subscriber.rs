//! Event subscriber.
//!
//! Bridges bus deliveries to the trigger dispatcher: a background task
//! receives `EventMessage` values and hands each to `on_event` for fan-out.
//! Dispatch failures are logged and never stop the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::triggers::bus::EventBus;
use crate::triggers::dispatcher::TriggerDispatcher;

/// Listens on an `EventBus` and dispatches received events.
pub struct EventSubscriber {
    dispatcher: TriggerDispatcher,
    bus: Arc<dyn EventBus>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EventSubscriber {
    pub fn new(dispatcher: TriggerDispatcher, bus: Arc<dyn EventBus>) -> Self {
        Self {
            dispatcher,
            bus,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Start the background receive loop.
    pub fn start(&mut self) {
        let mut receiver = self.bus.subscribe();
        let dispatcher = self.dispatcher.clone();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Event subscriber received shutdown signal");
                        break;
                    }
                    result = receiver.recv() => {
                        match result {
                            Ok(message) => {
                                debug!(
                                    "Received event '{}' for tenant {}",
                                    message.event, message.tenant_id
                                );
                                if let Err(e) = dispatcher.on_event(&message).await {
                                    error!(
                                        "Dispatch of event '{}' failed: {}",
                                        message.event, e
                                    );
                                }
                            }
                            Err(e) => {
                                warn!("Event receiver closed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        self.handle = Some(handle);
        info!("Event subscriber started");
    }

    /// Stop the receive loop and wait for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Event subscriber stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}
