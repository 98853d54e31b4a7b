//! Routing of server-initiated invocations to application handlers.
//!
//! Handlers are keyed by the exact invocation target.  Each key holds at most
//! one handler; registering the same name again replaces it.  A handler owns
//! its argument decoding, so the table itself never inspects payloads.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

/// A handler after type erasure: takes the raw argument list.
type RawHandler = Arc<dyn Fn(&[Value]) -> Result<(), String> + Send + Sync>;

/// Result of routing one server invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler was found and ran.
    Handled,
    /// No handler is registered for the target.  Not an error.
    NoHandler,
    /// A handler was found but the arguments did not match its payload type.
    DecodeFailed(String),
}

/// Exact-name table of event handlers.
#[derive(Default)]
pub struct EventDispatchTable {
    handlers: RwLock<HashMap<String, RawHandler>>,
}

impl EventDispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler whose payload is the first invocation argument
    /// decoded as `T`.
    ///
    /// An invocation with no arguments is decoded from JSON `null`, which
    /// suits `()` or `Option<_>` payloads.
    pub fn register<T, F>(&self, name: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register_raw(name, move |arguments: &[Value]| {
            let argument = arguments.first().cloned().unwrap_or(Value::Null);
            let payload = serde_json::from_value::<T>(argument).map_err(|e| e.to_string())?;
            handler(payload);
            Ok(())
        });
    }

    /// Registers a handler that receives the full argument list untouched.
    pub fn register_raw<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> Result<(), String> + Send + Sync + 'static,
    {
        let name = name.into();
        let replaced = self
            .write()
            .insert(name.clone(), Arc::new(handler))
            .is_some();
        debug!(event = %name, replaced, "registered event handler");
    }

    /// Removes the handler for `name`.  Returns whether one existed.
    pub fn remove(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Looks up `target` by exact match and runs its handler.
    ///
    /// The handler runs after the table lock is released, so it may register
    /// or remove handlers itself.
    pub fn dispatch(&self, target: &str, arguments: &[Value]) -> DispatchOutcome {
        let handler = self.read().get(target).cloned();
        let Some(handler) = handler else {
            trace!(target_name = %target, "no handler registered; invocation dropped");
            return DispatchOutcome::NoHandler;
        };
        match handler(arguments) {
            Ok(()) => DispatchOutcome::Handled,
            Err(reason) => DispatchOutcome::DecodeFailed(reason),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RawHandler>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RawHandler>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
