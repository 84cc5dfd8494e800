//! Per-execution cancellation signals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registry that tracks per-execution cancellation signals.
///
/// Cancellation of a running execution is cooperative: the admin surface
/// flips the signal here, and the engine loop checks it at every action
/// boundary. An in-flight action is never interrupted; it finishes and is
/// logged before the cancellation takes effect.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    signals: Arc<tokio::sync::Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution and return its cancellation signal.
    pub async fn register(&self, execution_id: &str) -> Arc<AtomicBool> {
        let signal = Arc::new(AtomicBool::new(false));
        self.signals
            .lock()
            .await
            .insert(execution_id.to_string(), signal.clone());
        signal
    }

    /// Request cancellation. Returns false if the execution is not running
    /// under this registry (already finished, or claimed by another process).
    pub async fn request_cancel(&self, execution_id: &str) -> bool {
        if let Some(signal) = self.signals.lock().await.get(execution_id) {
            signal.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Unregister an execution (called when its run finishes).
    pub async fn unregister(&self, execution_id: &str) {
        self.signals.lock().await.remove(execution_id);
    }
}
