/// MoveRelay - relays game moves between a UI hook and a session channel
///
/// A `MoveRelay` is mounted on a UI element, joins the `game:<id>` channel
/// named by the element, forwards remote moves to the UI host and local
/// moves to the channel, and leaves the channel when destroyed.

// Module declarations
pub mod error;
pub mod core;
pub mod transport;
pub mod host;
pub mod bridge;

// Re-export commonly used types
pub use error::{RelayError, Result};
pub use crate::core::{EventBus, MovePayload, RelayConfig, RelayEvent, SessionId, SocketConfig, Topic};
pub use transport::{Channel, ChannelTransport, JoinPolicy, LocalHub};
pub use host::{Element, MemoryHost, UiHost};
pub use bridge::{JoinOutcome, JoinTicket, MoveRelay, RelayState};

/// Initialize logging infrastructure
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let installed = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("MoveRelay logging initialized");
    }
}
