/// The move relay hook
///
/// `MoveRelay` is mounted on a UI element, joins the element's session
/// channel, and relays moves in both directions until destroyed.

pub mod relay;

// Re-export commonly used types
pub use relay::{JoinOutcome, JoinTicket, MoveRelay, MoveRelayBuilder, RelayState};
