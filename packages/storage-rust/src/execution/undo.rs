//! Compensation log for side effects outside the transaction.
//!
//! Work inside a transactional unit sometimes changes state the database
//! rollback cannot touch: in-process caches warmed with rows that are
//! about to be rolled back, advisory state, files. Such work registers a
//! compensating action on the [`UndoLog`]; when the attempt fails, the
//! execution service drains the log before deciding whether to retry, so
//! the next attempt starts clean.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

type UndoAction = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct UndoLogInner {
    actions: Vec<UndoAction>,
    resolved_values: HashMap<String, Value>,
}

/// Ordered compensating actions plus a cache of values resolved during
/// the unit of work. Cloning yields a handle to the same log, so the
/// builder and the work closure can both hold one.
#[derive(Clone, Default)]
pub struct UndoLog {
    inner: Arc<Mutex<UndoLogInner>>,
}

impl UndoLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a compensating action. Actions run in insertion order
    /// when the attempt fails.
    pub fn record(&self, action: impl FnOnce() + Send + 'static) {
        self.inner.lock().actions.push(Box::new(action));
    }

    /// Caches a value resolved during this attempt. The cache is dropped
    /// together with the undo actions on failure: a value resolved from
    /// rows that were rolled back must not leak into the next attempt.
    pub fn cache_resolved(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().resolved_values.insert(key.into(), value);
    }

    /// A value cached by [`Self::cache_resolved`] during this attempt.
    #[must_use]
    pub fn resolved(&self, key: &str) -> Option<Value> {
        self.inner.lock().resolved_values.get(key).cloned()
    }

    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.inner.lock().actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.actions.is_empty() && inner.resolved_values.is_empty()
    }

    /// Runs every recorded action in insertion order, then clears both
    /// the actions and the resolved-value cache. Actions run outside the
    /// lock so they may record onto the log again.
    pub(crate) fn compensate(&self) {
        let actions = {
            let mut inner = self.inner.lock();
            inner.resolved_values.clear();
            std::mem::take(&mut inner.actions)
        };
        for action in actions {
            action();
        }
    }
}

impl fmt::Debug for UndoLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("UndoLog")
            .field("pending_actions", &inner.actions.len())
            .field("resolved_values", &inner.resolved_values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_run_in_insertion_order_and_clear() {
        let log = UndoLog::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order_handle = Arc::clone(&order);
            log.record(move || order_handle.lock().push(label));
        }
        assert_eq!(log.pending_actions(), 3);

        log.compensate();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        assert_eq!(log.pending_actions(), 0);
        assert!(log.is_empty());

        // A second drain has nothing left to do.
        log.compensate();
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn resolved_cache_is_dropped_on_compensation() {
        let log = UndoLog::new();
        log.cache_resolved("tag:core", serde_json::json!({ "id": 42 }));
        assert_eq!(
            log.resolved("tag:core"),
            Some(serde_json::json!({ "id": 42 }))
        );

        log.compensate();
        assert_eq!(log.resolved("tag:core"), None);
    }

    #[test]
    fn clones_share_the_same_log() {
        let log = UndoLog::new();
        let handle = log.clone();

        let ran = Arc::new(Mutex::new(false));
        let ran_handle = Arc::clone(&ran);
        handle.record(move || *ran_handle.lock() = true);

        assert_eq!(log.pending_actions(), 1);
        log.compensate();
        assert!(*ran.lock());
        assert!(handle.is_empty());
    }
}
