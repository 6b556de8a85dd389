/// Event system for relay observers
///
/// Every bridge publishes what it does to an `EventBus`:
/// - join requests and their acknowledgements
/// - channel releases
/// - moves forwarded in either direction, and forwarding failures
///
/// Nothing on the relay path depends on subscribers; the bus is for
/// diagnostics, UIs that show connection status, and tests.

use crate::core::MovePayload;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of events buffered per subscriber
const EVENT_BUFFER_SIZE: usize = 100;

/// Direction a failed forward was travelling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Channel to UI host
    Inbound,
    /// UI host to channel
    Outbound,
}

/// Events that occur during a relay's lifetime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RelayEvent {
    /// Join issued for a topic
    JoinRequested {
        bridge_id: Uuid,
        topic: String,
    },

    /// Server acknowledged the join
    Joined {
        bridge_id: Uuid,
        topic: String,
        response: Value,
    },

    /// Server rejected the join
    JoinRejected {
        bridge_id: Uuid,
        topic: String,
        response: Value,
    },

    /// Channel handle released
    Left {
        bridge_id: Uuid,
        topic: String,
    },

    /// Wire move forwarded to the UI host
    RemoteMoveForwarded {
        bridge_id: Uuid,
        topic: String,
        payload: MovePayload,
    },

    /// UI host move pushed onto the channel
    LocalMoveBroadcast {
        bridge_id: Uuid,
        topic: String,
        payload: MovePayload,
    },

    /// A forward could not be delivered
    ForwardFailed {
        bridge_id: Uuid,
        topic: String,
        direction: Direction,
        error: String,
    },
}

impl RelayEvent {
    /// Get the bridge ID associated with this event
    pub fn bridge_id(&self) -> Uuid {
        match self {
            RelayEvent::JoinRequested { bridge_id, .. }
            | RelayEvent::Joined { bridge_id, .. }
            | RelayEvent::JoinRejected { bridge_id, .. }
            | RelayEvent::Left { bridge_id, .. }
            | RelayEvent::RemoteMoveForwarded { bridge_id, .. }
            | RelayEvent::LocalMoveBroadcast { bridge_id, .. }
            | RelayEvent::ForwardFailed { bridge_id, .. } => *bridge_id,
        }
    }

    /// Get the topic this event concerns
    pub fn topic(&self) -> &str {
        match self {
            RelayEvent::JoinRequested { topic, .. }
            | RelayEvent::Joined { topic, .. }
            | RelayEvent::JoinRejected { topic, .. }
            | RelayEvent::Left { topic, .. }
            | RelayEvent::RemoteMoveForwarded { topic, .. }
            | RelayEvent::LocalMoveBroadcast { topic, .. }
            | RelayEvent::ForwardFailed { topic, .. } => topic,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            RelayEvent::JoinRejected { .. } | RelayEvent::ForwardFailed { .. }
        )
    }
}

/// Event bus for pub/sub communication
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: RelayEvent) -> Result<()> {
        // broadcast::send returns error only if no receivers exist, which is ok
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Subscribe to events
    ///
    /// Returns a receiver that will receive all future events.
    /// The receiver will buffer up to EVENT_BUFFER_SIZE events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
