/// Move relay bridge
///
/// Ties one UI element to one channel topic:
/// - inbound wire moves are pushed to the UI host
/// - moves the UI host emits are pushed onto the channel
///
/// A relay holds at most one channel handle. Joining a new session always
/// leaves the previous handle first, and every handle acquired is left
/// exactly once (on rejoin, destroy, drop, or join rejection).
///
/// Join acknowledgements are awaited on the tokio runtime by a small task;
/// the caller gets a `JoinTicket` it may await or ignore.

use crate::core::{Direction, EventBus, MovePayload, RelayConfig, RelayEvent, SessionId, Topic};
use crate::error::{RelayError, Result};
use crate::host::{Element, HostHandler, ListenerId, UiHost};
use crate::transport::{Channel, ChannelTransport, InboundHandler, JoinReply};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Observable relay state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// No channel held
    Idle,
    /// Channel held, join not yet acknowledged
    Pending(SessionId),
    /// Channel held and joined
    Joined(SessionId),
}

impl RelayState {
    pub fn holds_channel(&self) -> bool {
        !matches!(self, RelayState::Idle)
    }

    pub fn session(&self) -> Option<&SessionId> {
        match self {
            RelayState::Idle => None,
            RelayState::Pending(id) | RelayState::Joined(id) => Some(id),
        }
    }
}

/// How a join request ended
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Server replied `ok`
    Joined(Value),
    /// Server replied `error`; the relay went back to idle
    Rejected(Value),
    /// The handle was released before the reply mattered
    Superseded,
    /// The transport dropped the request without replying
    Abandoned,
}

/// Handle on an in-flight join
#[derive(Debug)]
pub struct JoinTicket {
    session: SessionId,
    topic: Topic,
    handle: JoinHandle<JoinOutcome>,
}

impl JoinTicket {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the acknowledgement
    ///
    /// Never resolves if the transport neither replies nor drops the request.
    pub async fn outcome(self) -> Result<JoinOutcome> {
        match self.handle.await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() => Ok(JoinOutcome::Superseded),
            Err(e) => Err(RelayError::JoinTaskFailed(e.to_string())),
        }
    }
}

struct ActiveChannel {
    generation: u64,
    session: SessionId,
    channel: Arc<dyn Channel>,
    listener: ListenerId,
    joined: bool,
    watcher: Option<AbortHandle>,
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveChannel>,
    generation: u64,
    /// Session whose join the server refused; `update` does not retry it
    rejected: Option<SessionId>,
}

/// State shared with handlers and the acknowledgement task
struct Shared {
    id: Uuid,
    config: RelayConfig,
    host: Arc<dyn UiHost>,
    events: Arc<EventBus>,
    slot: Mutex<Slot>,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: RelayEvent) {
        // EventBus::publish only fails if the bus itself is broken
        if let Err(e) = self.events.publish(event) {
            warn!("Relay {} failed to publish event: {}", self.id, e);
        }
    }

    /// Drop the host listener and leave the channel
    fn release(&self, mut active: ActiveChannel) {
        if let Some(watcher) = active.watcher.take() {
            watcher.abort();
        }

        let topic = active.channel.topic().clone();
        info!("Relay {} leaving {}", self.id, topic);

        self.host.remove_listener(active.listener);
        active.channel.leave();

        self.publish(RelayEvent::Left {
            bridge_id: self.id,
            topic: topic.to_string(),
        });
    }

    fn forward_inbound(&self, topic: &Topic, payload: MovePayload) {
        debug!("Relay {} received move on {}: {:?}", self.id, topic, payload);

        match self.host.push_event(&self.config.host_inbound_event, payload.clone()) {
            Ok(()) => self.publish(RelayEvent::RemoteMoveForwarded {
                bridge_id: self.id,
                topic: topic.to_string(),
                payload,
            }),
            Err(e) => {
                warn!("Relay {} could not forward move from {}: {}", self.id, topic, e);
                self.publish(RelayEvent::ForwardFailed {
                    bridge_id: self.id,
                    topic: topic.to_string(),
                    direction: Direction::Inbound,
                    error: e.to_string(),
                });
            }
        }
    }

    fn forward_outbound(&self, channel: &dyn Channel, payload: MovePayload) {
        let topic = channel.topic();
        debug!("Relay {} broadcasting move on {}: {:?}", self.id, topic, payload);

        match channel.push(&self.config.wire_event, payload.clone()) {
            Ok(()) => self.publish(RelayEvent::LocalMoveBroadcast {
                bridge_id: self.id,
                topic: topic.to_string(),
                payload,
            }),
            Err(e) => {
                warn!("Relay {} could not broadcast move on {}: {}", self.id, topic, e);
                self.publish(RelayEvent::ForwardFailed {
                    bridge_id: self.id,
                    topic: topic.to_string(),
                    direction: Direction::Outbound,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Apply a join reply to the handle it was issued for
    fn settle(&self, generation: u64, topic: &Topic, reply: Option<JoinReply>) -> JoinOutcome {
        let mut slot = self.lock_slot();
        let current = slot
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);

        let reply = match reply {
            Some(reply) if current => reply,
            Some(_) => {
                debug!("Relay {} ignoring stale acknowledgement for {}", self.id, topic);
                return JoinOutcome::Superseded;
            }
            None => {
                warn!("Relay {} join on {} was dropped without a reply", self.id, topic);
                return JoinOutcome::Abandoned;
            }
        };

        match reply {
            JoinReply::Ok(response) => {
                info!("Relay {} joined {} successfully: {}", self.id, topic, response);
                if let Some(active) = slot.active.as_mut() {
                    active.joined = true;
                    active.watcher = None;
                }

                self.publish(RelayEvent::Joined {
                    bridge_id: self.id,
                    topic: topic.to_string(),
                    response: response.clone(),
                });
                JoinOutcome::Joined(response)
            }
            JoinReply::Error(response) => {
                error!("Relay {} unable to join {}: {}", self.id, topic, response);
                if let Some(mut active) = slot.active.take() {
                    slot.rejected = Some(active.session.clone());
                    active.watcher = None;
                    self.release(active);
                }

                self.publish(RelayEvent::JoinRejected {
                    bridge_id: self.id,
                    topic: topic.to_string(),
                    response: response.clone(),
                });
                JoinOutcome::Rejected(response)
            }
        }
    }
}

/// Bridge between a UI element and its session channel
pub struct MoveRelay {
    transport: Arc<dyn ChannelTransport>,
    shared: Arc<Shared>,
}

impl MoveRelay {
    /// Create a builder; the transport and host are injected, never looked up
    pub fn builder(transport: Arc<dyn ChannelTransport>, host: Arc<dyn UiHost>) -> MoveRelayBuilder {
        MoveRelayBuilder::new(transport, host)
    }

    /// Unique identifier used in logs and events
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.shared.events.clone()
    }

    pub fn state(&self) -> RelayState {
        match &self.shared.lock_slot().active {
            None => RelayState::Idle,
            Some(active) if active.joined => RelayState::Joined(active.session.clone()),
            Some(active) => RelayState::Pending(active.session.clone()),
        }
    }

    /// Session of the held channel, if any
    pub fn session(&self) -> Option<SessionId> {
        self.state().session().cloned()
    }

    /// Mount lifecycle callback
    ///
    /// Reads the session identifier from the element. Without one the relay
    /// stays idle and no ticket is returned.
    pub fn mount(&self, element: &Element) -> Result<Option<JoinTicket>> {
        info!("Relay {} mounted", self.shared.id);

        let attribute = &self.shared.config.session_attribute;
        let Some(session) = SessionId::from_attribute(element.data(attribute)) else {
            debug!("Relay {} has no '{}' session; staying idle", self.shared.id, attribute);
            return Ok(None);
        };

        self.join_session(session).map(Some)
    }

    /// Update lifecycle callback
    ///
    /// Rejoins when the element's session changed, releases the channel when
    /// the session was removed, and does nothing otherwise. A session the
    /// server rejected is not retried while the element still names it.
    pub fn update(&self, element: &Element) -> Result<Option<JoinTicket>> {
        let next = SessionId::from_attribute(element.data(&self.shared.config.session_attribute));
        let (current, rejected) = {
            let slot = self.shared.lock_slot();
            (
                slot.active.as_ref().map(|active| active.session.clone()),
                slot.rejected.clone(),
            )
        };

        match (current, next) {
            (Some(current), Some(next)) if current == next => {
                debug!("Relay {} session unchanged ({})", self.shared.id, current);
                Ok(None)
            }
            (None, Some(next)) if rejected.as_ref() == Some(&next) => {
                debug!("Relay {} not retrying rejected session {}", self.shared.id, next);
                Ok(None)
            }
            (_, Some(next)) => self.join_session(next).map(Some),
            (Some(_), None) => {
                info!("Relay {} session removed from element", self.shared.id);
                self.destroy();
                Ok(None)
            }
            (None, None) => {
                self.shared.lock_slot().rejected = None;
                Ok(None)
            }
        }
    }

    /// Join the channel for a session, leaving any held channel first
    ///
    /// Relay state stays locked while the transport and host are called
    /// here, so those calls must not re-enter this relay.
    ///
    /// # Errors
    /// - `RelayError::NoRuntime`: called outside a tokio runtime
    /// - Transport errors from creating the channel handle (the previous
    ///   handle has already been released by then)
    pub fn join_session(&self, session: SessionId) -> Result<JoinTicket> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RelayError::NoRuntime)?;
        let shared = &self.shared;
        let mut slot = shared.lock_slot();
        slot.rejected = None;

        if let Some(previous) = slot.active.take() {
            debug!("Relay {} releasing {} before rejoining", shared.id, previous.session);
            shared.release(previous);
        }

        let topic = shared.config.topic_for(&session);
        info!("Relay {} setting up session {} on {}", shared.id, session, topic);

        let channel = self.transport.channel(&topic)?;

        let weak: Weak<Shared> = Arc::downgrade(shared);
        let inbound_topic = topic.clone();
        let inbound: InboundHandler = Arc::new(move |payload: MovePayload| {
            if let Some(shared) = weak.upgrade() {
                shared.forward_inbound(&inbound_topic, payload);
            }
        });
        channel.on(&shared.config.wire_event, inbound);

        let weak: Weak<Shared> = Arc::downgrade(shared);
        let weak_channel: Weak<dyn Channel> = Arc::downgrade(&channel);
        let outbound: HostHandler = Arc::new(move |payload: MovePayload| {
            if let (Some(shared), Some(channel)) = (weak.upgrade(), weak_channel.upgrade()) {
                shared.forward_outbound(channel.as_ref(), payload);
            }
        });
        let listener = shared.host.handle_event(&shared.config.host_outbound_event, outbound);

        slot.generation += 1;
        let generation = slot.generation;

        let receipt = channel.join();
        shared.publish(RelayEvent::JoinRequested {
            bridge_id: shared.id,
            topic: topic.to_string(),
        });

        let task_shared = Arc::clone(shared);
        let task_topic = topic.clone();
        let handle = runtime.spawn(async move {
            let reply = receipt.await;
            task_shared.settle(generation, &task_topic, reply)
        });

        slot.active = Some(ActiveChannel {
            generation,
            session: session.clone(),
            channel,
            listener,
            joined: false,
            watcher: Some(handle.abort_handle()),
        });

        Ok(JoinTicket {
            session,
            topic,
            handle,
        })
    }

    /// Destroy lifecycle callback
    ///
    /// Leaves the held channel, if any. Returns whether a channel was left.
    pub fn destroy(&self) -> bool {
        let active = {
            let mut slot = self.shared.lock_slot();
            slot.rejected = None;
            slot.active.take()
        };

        match active {
            Some(active) => {
                self.shared.release(active);
                true
            }
            None => {
                debug!("Relay {} destroyed while idle", self.shared.id);
                false
            }
        }
    }
}

impl Drop for MoveRelay {
    fn drop(&mut self) {
        let active = self.shared.lock_slot().active.take();
        if let Some(active) = active {
            self.shared.release(active);
        }
    }
}

/// Builder for `MoveRelay`
pub struct MoveRelayBuilder {
    transport: Arc<dyn ChannelTransport>,
    host: Arc<dyn UiHost>,
    config: RelayConfig,
    events: Option<Arc<EventBus>>,
}

impl MoveRelayBuilder {
    pub fn new(transport: Arc<dyn ChannelTransport>, host: Arc<dyn UiHost>) -> Self {
        Self {
            transport,
            host,
            config: RelayConfig::default(),
            events: None,
        }
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an event bus instead of creating one
    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the relay
    ///
    /// # Errors
    /// Configuration validation errors.
    pub fn build(self) -> Result<MoveRelay> {
        self.config.validate()?;

        let id = Uuid::new_v4();
        debug!("Creating relay {}", id);

        Ok(MoveRelay {
            transport: self.transport,
            shared: Arc::new(Shared {
                id,
                config: self.config,
                host: self.host,
                events: self.events.unwrap_or_default(),
                slot: Mutex::new(Slot::default()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SocketConfig;
    use crate::host::{MemoryHost, MockUiHost};
    use crate::transport::{JoinPolicy, JoinReceipt, LocalHub};
    use mockall::predicate::eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn setup(policy: JoinPolicy) -> (LocalHub, Arc<MemoryHost>, MoveRelay) {
        setup_with(policy, RelayConfig::default())
    }

    fn setup_with(policy: JoinPolicy, config: RelayConfig) -> (LocalHub, Arc<MemoryHost>, MoveRelay) {
        let hub = LocalHub::with_policy(policy);
        let socket = Arc::new(hub.connect(&SocketConfig::default()).unwrap());
        let host = Arc::new(MemoryHost::new());
        let relay = MoveRelay::builder(socket, host.clone())
            .config(config)
            .build()
            .unwrap();
        (hub, host, relay)
    }

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    fn topic(id: &str) -> Topic {
        Topic::for_session("game", &session(id))
    }

    fn game_element(id: &str) -> Element {
        Element::new().with_attribute("data-game-id", id)
    }

    #[tokio::test]
    async fn test_mount_without_session_stays_idle() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);

        let ticket = relay.mount(&Element::new().with_attribute("id", "board")).unwrap();
        assert!(ticket.is_none());
        assert_eq!(relay.state(), RelayState::Idle);

        let ticket = relay.mount(&game_element("")).unwrap();
        assert!(ticket.is_none(), "Empty attribute counts as absent");

        assert!(hub.join_requests().is_empty());
        assert_eq!(hub.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_mount_joins_session_topic() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);

        let ticket = relay.mount(&game_element("42")).unwrap().expect("Should join");
        assert_eq!(ticket.topic(), &topic("42"));
        assert_eq!(ticket.session(), &session("42"));

        let outcome = ticket.outcome().await.unwrap();
        assert_eq!(outcome, JoinOutcome::Joined(json!({})));
        assert_eq!(relay.state(), RelayState::Joined(session("42")));

        assert_eq!(hub.join_requests(), vec![topic("42")]);
        assert!(host.pushed_events().is_empty(), "Nothing forwarded on join");
    }

    #[tokio::test]
    async fn test_inbound_move_reaches_host() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();

        let payload = MovePayload::new("e2", "e4");
        assert_eq!(hub.inject(&topic("42"), "move_made", payload.clone()), 1);

        let pushed = host.pushed_events();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].event, "handle_remote_move");
        assert_eq!(pushed[0].payload, payload);
    }

    #[tokio::test]
    async fn test_other_wire_events_are_ignored() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();

        assert_eq!(hub.inject(&topic("42"), "chat", MovePayload::default()), 0);
        assert!(host.pushed_events().is_empty());
    }

    #[tokio::test]
    async fn test_outbound_move_reaches_channel() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();

        let payload = MovePayload::new("e7", "e5").with_player("black");
        assert_eq!(host.emit_local("broadcast_move", payload.clone()), 1);

        let pushes = hub.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].topic, topic("42"));
        assert_eq!(pushes[0].event, "move_made");
        assert_eq!(pushes[0].payload, payload);
    }

    #[tokio::test]
    async fn test_rejoin_leaves_previous_channel_first() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);

        relay.join_session(session("1")).unwrap().outcome().await.unwrap();
        relay.join_session(session("2")).unwrap().outcome().await.unwrap();

        assert_eq!(hub.join_requests(), vec![topic("1"), topic("2")]);
        assert_eq!(hub.leave_count(), 1);
        assert_eq!(hub.open_channels(), 1);
        assert_eq!(host.listener_count("broadcast_move"), 1, "Old listener removed");
        assert_eq!(relay.state(), RelayState::Joined(session("2")));

        // Moves for the old session no longer reach the host
        assert_eq!(hub.inject(&topic("1"), "move_made", MovePayload::new("a", "b")), 0);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();

        assert!(relay.destroy());
        assert!(!relay.destroy());

        assert_eq!(hub.leave_count(), 1);
        assert_eq!(relay.state(), RelayState::Idle);
        assert_eq!(host.emit_local("broadcast_move", MovePayload::new("a", "b")), 0);
    }

    #[tokio::test]
    async fn test_destroy_idle_relay_leaves_nothing() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);

        assert!(!relay.destroy());
        assert_eq!(hub.leave_count(), 0);
    }

    #[tokio::test]
    async fn test_join_rejection_returns_to_idle() {
        let (hub, host, relay) = setup(JoinPolicy::Reject(json!({"reason": "unauthorized"})));
        let mut rx = relay.event_bus().subscribe();

        let outcome = relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(json!({"reason": "unauthorized"})));
        assert_eq!(relay.state(), RelayState::Idle);

        assert_eq!(hub.join_requests().len(), 1, "No automatic retry");
        assert_eq!(hub.leave_count(), 1, "Rejected handle is released");
        assert_eq!(host.listener_count("broadcast_move"), 0);

        assert!(!relay.destroy());
        assert_eq!(hub.leave_count(), 1);

        let mut saw_rejection = false;
        while let Ok(event) = rx.try_recv() {
            if let RelayEvent::JoinRejected { topic, .. } = event {
                assert_eq!(topic, "game:42");
                saw_rejection = true;
            }
        }
        assert!(saw_rejection, "Rejection should be published");
    }

    #[tokio::test]
    async fn test_deferred_join_is_pending_until_acknowledged() {
        let (hub, _host, relay) = setup(JoinPolicy::Defer);

        let ticket = relay.mount(&game_element("42")).unwrap().unwrap();
        tokio::task::yield_now().await;
        assert_eq!(relay.state(), RelayState::Pending(session("42")));

        assert_eq!(hub.acknowledge_pending(), 1);
        assert_eq!(ticket.outcome().await.unwrap(), JoinOutcome::Joined(json!({})));
        assert_eq!(relay.state(), RelayState::Joined(session("42")));
    }

    #[tokio::test]
    async fn test_unacknowledged_join_stays_pending() {
        let (hub, _host, relay) = setup(JoinPolicy::Defer);

        let _ticket = relay.join_session(session("42")).unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(relay.state(), RelayState::Pending(session("42")));
        assert_eq!(hub.open_channels(), 1);

        assert!(relay.destroy());
        assert_eq!(hub.leave_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_acknowledgement_is_ignored() {
        let (hub, _host, relay) = setup(JoinPolicy::Defer);

        let first = relay.join_session(session("1")).unwrap();
        let second = relay.join_session(session("2")).unwrap();

        assert_eq!(hub.acknowledge_pending(), 1, "Only the live handle is answered");
        assert_eq!(first.outcome().await.unwrap(), JoinOutcome::Superseded);
        assert_eq!(second.outcome().await.unwrap(), JoinOutcome::Joined(json!({})));
        assert_eq!(relay.state(), RelayState::Joined(session("2")));
    }

    #[tokio::test]
    async fn test_rejection_of_new_session_after_rejoin() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);
        hub.reject_topic("game:2", json!({"reason": "full"}));

        relay.join_session(session("1")).unwrap().outcome().await.unwrap();
        let outcome = relay.join_session(session("2")).unwrap().outcome().await.unwrap();

        assert_eq!(outcome, JoinOutcome::Rejected(json!({"reason": "full"})));
        assert_eq!(relay.state(), RelayState::Idle);
        assert_eq!(hub.leave_count(), 2);
        assert_eq!(hub.open_channels(), 0);
    }

    #[test]
    fn test_join_requires_runtime() {
        let hub = LocalHub::new();
        let socket = Arc::new(hub.connect(&SocketConfig::default()).unwrap());
        let relay = MoveRelay::builder(socket, Arc::new(MemoryHost::new()))
            .build()
            .unwrap();

        let result = relay.mount(&game_element("42"));
        assert!(matches!(result, Err(RelayError::NoRuntime)));
        assert!(hub.join_requests().is_empty());
        assert_eq!(relay.state(), RelayState::Idle);
    }

    #[tokio::test]
    async fn test_update_lifecycle() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("1")).unwrap().unwrap().outcome().await.unwrap();

        assert!(relay.update(&game_element("1")).unwrap().is_none());
        assert_eq!(hub.join_requests().len(), 1, "Same session does not rejoin");

        let ticket = relay.update(&game_element("2")).unwrap().expect("Should rejoin");
        ticket.outcome().await.unwrap();
        assert_eq!(relay.state(), RelayState::Joined(session("2")));

        assert!(relay.update(&Element::new()).unwrap().is_none());
        assert_eq!(relay.state(), RelayState::Idle);
        assert_eq!(hub.leave_count(), 2);

        assert!(relay.update(&Element::new()).unwrap().is_none());
        assert_eq!(hub.leave_count(), 2);
    }

    #[tokio::test]
    async fn test_update_does_not_retry_rejected_session() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);
        hub.reject_topic("game:42", json!({"reason": "not a player"}));
        let element = game_element("42");

        let outcome = relay.mount(&element).unwrap().unwrap().outcome().await.unwrap();
        assert!(matches!(outcome, JoinOutcome::Rejected(_)));

        for _ in 0..3 {
            assert!(relay.update(&element).unwrap().is_none());
        }
        assert_eq!(hub.join_requests().len(), 1, "Rejected session is not retried");
        assert_eq!(relay.state(), RelayState::Idle);

        // A different session is a fresh join
        let ticket = relay.update(&game_element("43")).unwrap().expect("Should join new session");
        assert!(matches!(ticket.outcome().await.unwrap(), JoinOutcome::Joined(_)));
        assert_eq!(hub.join_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_session_retried_after_attribute_removed() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);
        hub.reject_topic("game:42", json!({"reason": "full"}));
        let element = game_element("42");

        relay.mount(&element).unwrap().unwrap().outcome().await.unwrap();
        assert!(relay.update(&element).unwrap().is_none());

        assert!(relay.update(&Element::new()).unwrap().is_none());
        assert!(relay.update(&element).unwrap().is_some(), "Attribute re-added counts as new");
        assert_eq!(hub.join_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_leaves_channel() {
        let (hub, _host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();

        drop(relay);
        assert_eq!(hub.leave_count(), 1);
        assert_eq!(hub.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_host_failure_is_reported_not_raised() {
        let (hub, host, relay) = setup(JoinPolicy::Accept);
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();
        let mut rx = relay.event_bus().subscribe();

        host.fail_pushes(true);
        hub.inject(&topic("42"), "move_made", MovePayload::new("e2", "e4"));

        match rx.try_recv().unwrap() {
            RelayEvent::ForwardFailed { direction, .. } => assert_eq!(direction, Direction::Inbound),
            other => panic!("Unexpected event {:?}", other),
        }
        assert_eq!(relay.state(), RelayState::Joined(session("42")));
    }

    #[tokio::test]
    async fn test_outbound_push_before_join_is_buffered() {
        let (hub, host, relay) = setup(JoinPolicy::Defer);
        let ticket = relay.mount(&game_element("42")).unwrap().unwrap();

        host.emit_local("broadcast_move", MovePayload::new("c2", "c4"));
        assert!(hub.pushes().is_empty());

        hub.acknowledge_pending();
        ticket.outcome().await.unwrap();
        assert_eq!(hub.pushes().len(), 1);
    }

    #[tokio::test]
    async fn test_alternate_event_names() {
        let (hub, host, relay) = setup_with(JoinPolicy::Accept, RelayConfig::alternate_events());
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();

        hub.inject(&topic("42"), "move_made", MovePayload::new("e2", "e4"));
        assert_eq!(host.pushed_events()[0].event, "remote_move");

        assert_eq!(host.emit_local("broadcast_move", MovePayload::new("a", "b")), 0);
        assert_eq!(host.emit_local("make_move", MovePayload::new("a", "b")), 1);
        assert_eq!(hub.pushes()[0].event, "move_made");
    }

    #[tokio::test]
    async fn test_custom_session_attribute_and_prefix() {
        let config = RelayConfig::builder()
            .topic_prefix("match")
            .session_attribute("matchId")
            .build()
            .unwrap();
        let (hub, _host, relay) = setup_with(JoinPolicy::Accept, config);

        assert!(relay.mount(&game_element("42")).unwrap().is_none());

        let element = Element::new().with_data("matchId", "7");
        relay.mount(&element).unwrap().unwrap().outcome().await.unwrap();
        assert_eq!(hub.join_requests()[0].as_str(), "match:7");
    }

    #[test]
    fn test_invalid_config_rejected_by_builder() {
        let hub = LocalHub::new();
        let socket = Arc::new(hub.connect(&SocketConfig::default()).unwrap());
        let config = RelayConfig {
            wire_event: String::new(),
            ..RelayConfig::default()
        };

        let result = MoveRelay::builder(socket, Arc::new(MemoryHost::new()))
            .config(config)
            .build();
        assert!(matches!(result, Err(RelayError::ValidationError { .. })));
    }

    #[tokio::test]
    async fn test_host_interactions_with_mock() {
        let captured: Arc<Mutex<Option<HostHandler>>> = Arc::new(Mutex::new(None));
        let slot = captured.clone();

        let mut host = MockUiHost::new();
        host.expect_handle_event()
            .withf(|event, _| event.to_string() == "broadcast_move")
            .times(1)
            .returning(move |_, handler| {
                *slot.lock().unwrap() = Some(handler);
                ListenerId(7)
            });
        host.expect_push_event()
            .withf(|event, payload| {
                event.to_string() == "handle_remote_move"
                    && *payload.as_value() == json!({"from": "e2", "to": "e4"})
            })
            .times(1)
            .returning(|_, _| Ok(()));
        host.expect_remove_listener()
            .with(eq(ListenerId(7)))
            .times(1)
            .return_const(());

        let hub = LocalHub::new();
        let socket = Arc::new(hub.connect(&SocketConfig::default()).unwrap());
        let relay = MoveRelay::builder(socket, Arc::new(host)).build().unwrap();

        relay.join_session(session("42")).unwrap().outcome().await.unwrap();
        hub.inject(&topic("42"), "move_made", MovePayload::new("e2", "e4"));

        let handler = captured.lock().unwrap().clone().expect("Listener registered");
        handler(MovePayload::new("d7", "d5"));
        assert_eq!(hub.pushes().len(), 1);

        assert!(relay.destroy());

        // A late UI event after teardown has nowhere to go
        handler(MovePayload::new("c7", "c5"));
        assert_eq!(hub.pushes().len(), 1);
    }

    /// Channel whose pushes always fail
    ///
    /// With `drop_ack` set, `join` drops the acknowledger without replying.
    struct ScriptedChannel {
        topic: Topic,
        drop_ack: bool,
    }

    impl Channel for ScriptedChannel {
        fn topic(&self) -> &Topic {
            &self.topic
        }

        fn on(&self, _event: &str, _handler: InboundHandler) {}

        fn join(&self) -> JoinReceipt {
            if self.drop_ack {
                let (ack, receipt) = JoinReceipt::pair();
                drop(ack);
                receipt
            } else {
                JoinReceipt::ready(JoinReply::Ok(json!({})))
            }
        }

        fn push(&self, _event: &str, _payload: MovePayload) -> Result<()> {
            Err(RelayError::TransportError("socket closed".to_string()))
        }

        fn leave(&self) {}
    }

    struct ScriptedTransport {
        drop_ack: bool,
    }

    impl ChannelTransport for ScriptedTransport {
        fn channel(&self, topic: &Topic) -> Result<Arc<dyn Channel>> {
            Ok(Arc::new(ScriptedChannel {
                topic: topic.clone(),
                drop_ack: self.drop_ack,
            }))
        }
    }

    #[tokio::test]
    async fn test_channel_push_failure_is_reported_not_raised() {
        let host = Arc::new(MemoryHost::new());
        let transport = Arc::new(ScriptedTransport { drop_ack: false });
        let relay = MoveRelay::builder(transport, host.clone()).build().unwrap();
        relay.mount(&game_element("42")).unwrap().unwrap().outcome().await.unwrap();
        let mut rx = relay.event_bus().subscribe();

        assert_eq!(host.emit_local("broadcast_move", MovePayload::new("e2", "e4")), 1);

        match rx.try_recv().unwrap() {
            RelayEvent::ForwardFailed { direction, topic, error, .. } => {
                assert_eq!(direction, Direction::Outbound);
                assert_eq!(topic, "game:42");
                assert!(error.contains("socket closed"));
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert_eq!(relay.state(), RelayState::Joined(session("42")));
    }

    #[tokio::test]
    async fn test_dropped_acknowledgement_is_abandoned() {
        let transport = Arc::new(ScriptedTransport { drop_ack: true });
        let relay = MoveRelay::builder(transport, Arc::new(MemoryHost::new()))
            .build()
            .unwrap();

        let ticket = relay.mount(&game_element("42")).unwrap().unwrap();
        assert_eq!(ticket.outcome().await.unwrap(), JoinOutcome::Abandoned);
        assert_eq!(relay.state(), RelayState::Pending(session("42")));

        assert!(relay.destroy());
        assert_eq!(relay.state(), RelayState::Idle);
    }

    /// Host that destroys the relay from inside its first push
    #[derive(Default)]
    struct TeardownHost {
        relay: Mutex<Weak<MoveRelay>>,
        torn_down: AtomicBool,
    }

    impl UiHost for TeardownHost {
        fn push_event(&self, _event: &str, _payload: MovePayload) -> Result<()> {
            let relay = self.relay.lock().unwrap().upgrade();
            if let Some(relay) = relay {
                self.torn_down.store(relay.destroy(), Ordering::SeqCst);
            }
            Ok(())
        }

        fn handle_event(&self, _event: &str, _handler: HostHandler) -> ListenerId {
            ListenerId(1)
        }

        fn remove_listener(&self, _id: ListenerId) {}
    }

    #[tokio::test]
    async fn test_host_may_destroy_relay_while_receiving_move() {
        let hub = LocalHub::new();
        let socket = Arc::new(hub.connect(&SocketConfig::default()).unwrap());
        let host = Arc::new(TeardownHost::default());
        let relay = Arc::new(MoveRelay::builder(socket, host.clone()).build().unwrap());
        *host.relay.lock().unwrap() = Arc::downgrade(&relay);

        relay.join_session(session("42")).unwrap().outcome().await.unwrap();
        hub.inject(&topic("42"), "move_made", MovePayload::new("e2", "e4"));

        assert!(host.torn_down.load(Ordering::SeqCst));
        assert_eq!(relay.state(), RelayState::Idle);
        assert_eq!(hub.leave_count(), 1);
    }
}
