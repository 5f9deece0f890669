//! Local connector state
//!
//! An opaque JSON value shared between the caller and the heartbeat loop.
//! The control API holds the authoritative copy.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Shared, cloneable handle on the local connector state
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<Option<Value>>>,
}

impl StateStore {
    pub fn new(initial: Option<Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Current state
    pub fn get(&self) -> Option<Value> {
        self.inner.read().clone()
    }

    /// Replace the state
    pub fn set(&self, state: Option<Value>) {
        *self.inner.write() = state;
    }

    /// Adopt `remote` when it differs from `sent`, the state the heartbeat
    /// carried. An answer echoing `sent` leaves local updates made since
    /// then in place. Returns whether the state was replaced.
    pub fn reconcile_from(&self, sent: Option<&Value>, remote: Option<Value>) -> bool {
        if sent == remote.as_ref() {
            return false;
        }
        *self.inner.write() = remote;
        true
    }
}

/// Shared slot holding the work id currently being processed
#[derive(Debug, Clone, Default)]
pub struct CurrentWork {
    inner: Arc<RwLock<Option<String>>>,
}

impl CurrentWork {
    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }

    pub fn set(&self, work_id: Option<String>) {
        *self.inner.write() = work_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reconcile_remote_wins() {
        let store = StateStore::new(Some(json!({"a": 1})));
        let sent = store.get();
        assert!(store.reconcile_from(sent.as_ref(), Some(json!({"a": 2}))));
        assert_eq!(store.get(), Some(json!({"a": 2})));

        let sent = store.get();
        assert!(!store.reconcile_from(sent.as_ref(), Some(json!({"a": 2}))));
        assert!(store.reconcile_from(sent.as_ref(), None));
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_echo_of_sent_state_keeps_newer_local_update() {
        let store = StateStore::new(Some(json!({"cursor": 1})));
        let sent = store.get();
        store.set(Some(json!({"cursor": 2})));

        assert!(!store.reconcile_from(sent.as_ref(), Some(json!({"cursor": 1}))));
        assert_eq!(store.get(), Some(json!({"cursor": 2})));
    }

    #[test]
    fn test_clones_share_state() {
        let store = StateStore::default();
        let other = store.clone();
        other.set(Some(json!({"cursor": "2021-01-01"})));
        assert_eq!(store.get(), Some(json!({"cursor": "2021-01-01"})));
    }

    #[test]
    fn test_current_work() {
        let work = CurrentWork::default();
        assert_eq!(work.get(), None);
        work.clone().set(Some("w1".to_string()));
        assert_eq!(work.get().as_deref(), Some("w1"));
    }
}
