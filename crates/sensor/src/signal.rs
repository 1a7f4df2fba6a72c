//! Before-streaming-changes observers keyed by monotonic tokens

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Receives `true` just before streaming starts and `false` after it stops
pub type StreamingChangeCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
pub struct StreamingChangeSignal {
    next_token: AtomicU64,
    subscribers: Mutex<BTreeMap<u64, StreamingChangeCallback>>,
}

impl StreamingChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens are never reused
    pub fn subscribe(&self, callback: StreamingChangeCallback) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, callback);
        token
    }

    /// `false` for unknown tokens
    pub fn unsubscribe(&self, token: u64) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
            .is_some()
    }

    /// Notify subscribers in registration order, outside the lock
    pub fn raise(&self, streaming: bool) {
        let subscribers: Vec<StreamingChangeCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in subscribers {
            callback(streaming);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
