/// UI host abstraction
///
/// The relay is a hook: something else owns the element and calls
/// `mount` / `destroy`. What the relay needs from that host is:
/// - `push_event` to hand a payload to the UI
/// - `handle_event` / `remove_listener` to hear payloads from the UI
///
/// Element attributes are modelled by `Element`.

pub mod element;
pub mod memory;
#[cfg(feature = "tauri")]
pub mod tauri_host;

use crate::core::MovePayload;
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

pub use element::Element;
pub use memory::MemoryHost;
#[cfg(feature = "tauri")]
pub use tauri_host::TauriHost;

/// Callback for events emitted by the UI host
pub type HostHandler = Arc<dyn Fn(MovePayload) + Send + Sync>;

/// Identifies a registered host listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// The UI side of the relay
///
/// `handle_event` and `remove_listener` run with the relay's state locked and
/// must not call back into the relay. `push_event` and registered handlers
/// run unlocked and may.
#[cfg_attr(test, mockall::automock)]
pub trait UiHost: Send + Sync {
    /// Deliver an event to the UI
    fn push_event(&self, event: &str, payload: MovePayload) -> Result<()>;

    /// Listen for an event emitted by the UI
    fn handle_event(&self, event: &str, handler: HostHandler) -> ListenerId;

    /// Stop a listener; unknown ids are ignored
    fn remove_listener(&self, id: ListenerId);
}
