//! Correlation of client-initiated invocations with their completions.
//!
//! Each invocation that expects a reply gets a fresh id from a
//! [`SequenceCounter`] and a one-shot callback stored under that id.  The
//! callback is removed and called exactly once: when the matching completion
//! arrives, when the local send fails, or when the connection closes.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use hub_core::protocol::SequenceCounter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::application::error::HubError;

/// What a pending invocation eventually resolves to.
pub type InvocationOutcome = Result<Option<Value>, HubError>;

/// One-shot completion callback.
pub type CompletionCallback = Box<dyn FnOnce(InvocationOutcome) + Send + 'static>;

/// Table of invocations awaiting a completion.
///
/// Internally synchronised.  Callbacks always run *after* the table lock is
/// released, so a callback may safely register a new invocation.
pub struct InvocationRegistry {
    ids: SequenceCounter,
    pending: Mutex<HashMap<String, CompletionCallback>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self {
            ids: SequenceCounter::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `callback` under a never-used id and returns the id.
    pub fn register(&self, callback: CompletionCallback) -> String {
        let id = self.ids.next_id();
        self.table().insert(id.clone(), callback);
        debug!(invocation_id = %id, "registered pending invocation");
        id
    }

    /// Removes the entry for `id` and calls it with `outcome`.
    ///
    /// Returns `false` if no such entry exists, e.g. for a duplicate or late
    /// completion.  That case is logged and otherwise ignored.
    pub fn resolve(&self, id: &str, outcome: InvocationOutcome) -> bool {
        let callback = self.table().remove(id);
        match callback {
            Some(callback) => {
                debug!(invocation_id = %id, ok = outcome.is_ok(), "resolving invocation");
                callback(outcome);
                true
            }
            None => {
                warn!(invocation_id = %id, "completion for unknown invocation ignored");
                false
            }
        }
    }

    /// Resolves every pending entry with an error and empties the table.
    ///
    /// Returns how many entries were failed.
    pub fn fail_all(&self, make_error: impl Fn() -> HubError) -> usize {
        let drained: Vec<(String, CompletionCallback)> = self.table().drain().collect();
        let count = drained.len();
        for (id, callback) in drained {
            let error = make_error();
            debug!(invocation_id = %id, %error, "failing pending invocation");
            callback(Err(error));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Removes the entry for `id` without calling it.  Used when the caller
    /// is no longer waiting for the outcome.
    pub fn discard(&self, id: &str) -> bool {
        let callback = self.table().remove(id);
        callback.is_some()
    }

    /// Ids still waiting for a completion, sorted numerically.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.table().keys().cloned().collect();
        ids.sort_by_key(|id| (id.len(), id.clone()));
        ids
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, CompletionCallback>> {
        // A panicking callback never runs under this lock, so the map is
        // still consistent after a poison.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InvocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Builds a callback that records its outcome into the returned slot.
    fn recording() -> (
        CompletionCallback,
        Arc<Mutex<Option<InvocationOutcome>>>,
    ) {
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let callback: CompletionCallback = Box::new(move |outcome| {
            *sink.lock().unwrap() = Some(outcome);
        });
        (callback, slot)
    }

    #[test]
    fn test_register_returns_distinct_ids() {
        // Arrange
        let registry = InvocationRegistry::new();

        // Act
        let a = registry.register(Box::new(|_| {}));
        let b = registry.register(Box::new(|_| {}));

        // Assert
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_not_reused_after_out_of_order_resolution() {
        // Arrange – three pending, resolve the middle one
        let registry = InvocationRegistry::new();
        let first = registry.register(Box::new(|_| {}));
        let second = registry.register(Box::new(|_| {}));
        let third = registry.register(Box::new(|_| {}));
        registry.resolve(&second, Ok(None));

        // Act
        let fourth = registry.register(Box::new(|_| {}));

        // Assert
        assert!(![first, second, third].contains(&fourth));
    }

    #[test]
    fn test_resolve_calls_callback_once_and_removes_entry() {
        // Arrange
        let registry = InvocationRegistry::new();
        let (callback, slot) = recording();
        let id = registry.register(callback);

        // Act
        let first = registry.resolve(&id, Ok(Some(Value::from(7))));
        let second = registry.resolve(&id, Ok(None));

        // Assert
        assert!(first);
        assert!(!second, "a duplicate completion must be a no-op");
        assert_eq!(*slot.lock().unwrap(), Some(Ok(Some(Value::from(7)))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pending_ids_lists_unresolved_entries_in_order() {
        let registry = InvocationRegistry::new();
        for _ in 0..11 {
            registry.register(Box::new(|_| {}));
        }
        registry.resolve("3", Ok(None));

        let ids = registry.pending_ids();

        assert_eq!(ids.len(), 10);
        assert_eq!(ids.first().map(String::as_str), Some("0"));
        assert_eq!(ids.last().map(String::as_str), Some("10"));
        assert!(!ids.contains(&"3".to_string()));
    }

    #[test]
    fn test_discard_removes_entry_without_calling_it() {
        // Arrange
        let registry = InvocationRegistry::new();
        let (callback, slot) = recording();
        let id = registry.register(callback);

        // Act
        let first = registry.discard(&id);
        let second = registry.discard(&id);

        // Assert
        assert!(first);
        assert!(!second);
        assert!(registry.is_empty());
        assert!(slot.lock().unwrap().is_none());
        assert!(!registry.resolve(&id, Ok(None)), "late completion is ignored");
    }

    #[test]
    fn test_resolve_unknown_id_is_noop() {
        let registry = InvocationRegistry::new();
        assert!(!registry.resolve("404", Ok(None)));
    }

    #[test]
    fn test_fail_all_resolves_every_entry_with_error() {
        // Arrange
        let registry = InvocationRegistry::new();
        let slots: Vec<_> = (0..5)
            .map(|_| {
                let (callback, slot) = recording();
                registry.register(callback);
                slot
            })
            .collect();

        // Act
        let failed = registry.fail_all(|| HubError::Cancelled);

        // Assert
        assert_eq!(failed, 5);
        assert!(registry.is_empty());
        for slot in slots {
            assert_eq!(*slot.lock().unwrap(), Some(Err(HubError::Cancelled)));
        }
    }

    #[test]
    fn test_callback_may_register_during_resolution() {
        // Arrange – the callback re-enters the registry
        let registry = Arc::new(InvocationRegistry::new());
        let inner = Arc::clone(&registry);
        let id = registry.register(Box::new(move |_| {
            inner.register(Box::new(|_| {}));
        }));

        // Act
        registry.resolve(&id, Ok(None));

        // Assert – no deadlock, and the nested entry exists
        assert_eq!(registry.len(), 1);
    }
}
