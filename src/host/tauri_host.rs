/// Tauri application as a UI host
///
/// Outbound payloads are emitted to the webview with `Emitter::emit`;
/// inbound ones arrive through `Listener::listen` as JSON event payloads.

use crate::core::MovePayload;
use crate::error::Result;
use crate::host::{HostHandler, ListenerId, UiHost};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tauri::{AppHandle, Emitter, EventId, Listener, Runtime};
use tracing::{debug, warn};

/// UI host backed by a Tauri `AppHandle`
pub struct TauriHost<R: Runtime> {
    app: AppHandle<R>,
    listeners: Mutex<HashMap<ListenerId, EventId>>,
    next_listener: AtomicU64,
}

impl<R: Runtime> TauriHost<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self {
            app,
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }
}

impl<R: Runtime> UiHost for TauriHost<R> {
    fn push_event(&self, event: &str, payload: MovePayload) -> Result<()> {
        self.app.emit(event, payload)?;
        Ok(())
    }

    fn handle_event(&self, event: &str, handler: HostHandler) -> ListenerId {
        let name = event.to_string();
        let event_id = self.app.listen(event.to_string(), move |ev| {
            match serde_json::from_str::<MovePayload>(ev.payload()) {
                Ok(payload) => handler(payload),
                Err(e) => warn!("Dropping '{}' with undecodable payload: {}", name, e),
            }
        });

        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, event_id);
        debug!("Registered {} for '{}' (tauri event {})", id, event, event_id);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        let event_id = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        if let Some(event_id) = event_id {
            self.app.unlisten(event_id);
            debug!("Removed {}", id);
        }
    }
}
