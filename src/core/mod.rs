/// Core domain types for the move relay
///
/// Payloads, session identifiers and topics, configuration, and the event
/// bus every bridge reports to.

pub mod config;
pub mod events;
pub mod payload;
pub mod session;

// Re-export commonly used types
pub use config::{RelayConfig, RelayConfigBuilder, SocketConfig};
pub use events::{Direction, EventBus, RelayEvent};
pub use payload::{MoveFields, MovePayload};
pub use session::{SessionId, Topic};
