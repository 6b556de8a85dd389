/// In-process UI host
///
/// Records what the relay pushes to the UI and lets callers play the UI's
/// part by emitting local events. Used by the demo binary and tests.

use crate::core::MovePayload;
use crate::error::{RelayError, Result};
use crate::host::{HostHandler, ListenerId, UiHost};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// An event the relay pushed to the UI
#[derive(Debug, Clone, PartialEq)]
pub struct PushedEvent {
    pub event: String,
    pub payload: MovePayload,
}

#[derive(Default)]
struct HostState {
    pushed: Vec<PushedEvent>,
    listeners: BTreeMap<ListenerId, (String, HostHandler)>,
    fail_pushes: bool,
}

/// Recording UI host
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
    next_listener: Arc<AtomicU64>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the UI emitting an event
    ///
    /// Returns the number of listeners invoked.
    pub fn emit_local(&self, event: &str, payload: MovePayload) -> usize {
        let handlers: Vec<HostHandler> = self
            .lock()
            .listeners
            .values()
            .filter(|(name, _)| name == event)
            .map(|(_, handler)| handler.clone())
            .collect();

        debug!("UI emitted '{}' to {} listener(s)", event, handlers.len());
        for handler in &handlers {
            handler(payload.clone());
        }
        handlers.len()
    }

    /// Everything pushed to the UI so far
    pub fn pushed_events(&self) -> Vec<PushedEvent> {
        self.lock().pushed.clone()
    }

    /// Listeners currently registered for an event
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock()
            .listeners
            .values()
            .filter(|(name, _)| name == event)
            .count()
    }

    /// Make every subsequent `push_event` fail
    pub fn fail_pushes(&self, fail: bool) {
        self.lock().fail_pushes = fail;
    }
}

impl UiHost for MemoryHost {
    fn push_event(&self, event: &str, payload: MovePayload) -> Result<()> {
        let mut state = self.lock();
        if state.fail_pushes {
            return Err(RelayError::HostError(format!("'{}' rejected by host", event)));
        }

        state.pushed.push(PushedEvent {
            event: event.to_string(),
            payload,
        });
        Ok(())
    }

    fn handle_event(&self, event: &str, handler: HostHandler) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock()
            .listeners
            .insert(id, (event.to_string(), handler));
        debug!("Registered {} for '{}'", id, event);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        if self.lock().listeners.remove(&id).is_some() {
            debug!("Removed {}", id);
        }
    }
}
