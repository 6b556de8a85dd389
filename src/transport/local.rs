/// In-process channel transport
///
/// `LocalHub` plays the server: it tracks every channel handle, answers
/// joins according to a `JoinPolicy`, and fans pushes out to the other
/// joined members of the same topic. Handlers are always invoked after the
/// hub lock is released, so a handler may push again without deadlocking.
///
/// It also records what happened (join requests, leaves, pushes) so tests
/// can assert on the relay's traffic.

use crate::core::{MovePayload, SocketConfig, Topic};
use crate::error::{RelayError, Result};
use crate::transport::{Channel, ChannelTransport, InboundHandler, JoinAcknowledger, JoinReceipt, JoinReply};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// How the hub answers join requests
#[derive(Debug, Clone, PartialEq)]
pub enum JoinPolicy {
    /// Acknowledge `ok` immediately
    Accept,
    /// Reply `error` immediately with this response
    Reject(Value),
    /// Hold the acknowledgement until `acknowledge_pending` / `reject_pending`
    Defer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberStatus {
    Created,
    Joining,
    Joined,
}

struct Member {
    topic: Topic,
    status: MemberStatus,
    handlers: HashMap<String, Vec<InboundHandler>>,
    outbox: Vec<(String, MovePayload)>,
}

/// A push recorded by the hub
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPush {
    pub topic: Topic,
    pub event: String,
    pub payload: MovePayload,
}

/// Handlers to run once the lock is released
type Delivery = (Vec<InboundHandler>, MovePayload);

struct HubState {
    policy: JoinPolicy,
    rejected_topics: HashMap<String, Value>,
    required_token: Option<String>,
    next_member: u64,
    members: BTreeMap<u64, Member>,
    pending: Vec<(u64, JoinAcknowledger)>,
    join_requests: Vec<Topic>,
    leaves: usize,
    pushes: Vec<RecordedPush>,
}

impl HubState {
    /// Record a push and collect the handlers of every other joined member
    fn fan_out(&mut self, from: Option<u64>, topic: &Topic, event: &str, payload: MovePayload) -> Delivery {
        if from.is_some() {
            self.pushes.push(RecordedPush {
                topic: topic.clone(),
                event: event.to_string(),
                payload: payload.clone(),
            });
        }

        let handlers = self
            .members
            .iter()
            .filter(|(id, m)| Some(**id) != from && m.status == MemberStatus::Joined && &m.topic == topic)
            .filter_map(|(_, m)| m.handlers.get(event))
            .flat_map(|hs| hs.iter().cloned())
            .collect();

        (handlers, payload)
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for (handlers, payload) in deliveries {
        for handler in handlers {
            handler(payload.clone());
        }
    }
}

/// In-memory publish/subscribe hub
#[derive(Clone)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Create a hub that accepts every join
    pub fn new() -> Self {
        Self::with_policy(JoinPolicy::Accept)
    }

    pub fn with_policy(policy: JoinPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                policy,
                rejected_topics: HashMap::new(),
                required_token: None,
                next_member: 1,
                members: BTreeMap::new(),
                pending: Vec::new(),
                join_requests: Vec::new(),
                leaves: 0,
                pushes: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject joins on one topic regardless of policy
    pub fn reject_topic(&self, topic: impl Into<String>, response: Value) {
        self.lock().rejected_topics.insert(topic.into(), response);
    }

    /// Require a `token` connect param on every socket
    pub fn require_token(&self, token: impl Into<String>) {
        self.lock().required_token = Some(token.into());
    }

    /// Open a socket on this hub
    ///
    /// # Errors
    /// - `RelayError::Unauthorized`: a token is required and missing or wrong
    pub fn connect(&self, socket: &SocketConfig) -> Result<LocalSocket> {
        let required = self.lock().required_token.clone();

        if let Some(expected) = required {
            if socket.token() != Some(expected.as_str()) {
                warn!("Socket connect to {} refused: bad token", socket.endpoint);
                return Err(RelayError::Unauthorized {
                    endpoint: socket.endpoint.clone(),
                    reason: "missing or invalid token".to_string(),
                });
            }
        }

        info!("Socket connected to {}", socket.endpoint);
        Ok(LocalSocket {
            hub: self.clone(),
            endpoint: socket.endpoint.clone(),
        })
    }

    /// Answer every deferred join
    ///
    /// Topics registered with `reject_topic` are rejected; the rest are
    /// acknowledged `ok` and have their buffered pushes flushed.
    /// Returns how many joins were answered.
    pub fn acknowledge_pending(&self) -> usize {
        let mut acks = Vec::new();
        let mut deliveries = Vec::new();

        {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.pending);

            for (id, ack) in pending {
                let Some(member) = state.members.get(&id) else {
                    continue;
                };
                if member.status != MemberStatus::Joining {
                    continue;
                }
                let topic = member.topic.clone();

                if let Some(response) = state.rejected_topics.get(topic.as_str()).cloned() {
                    if let Some(member) = state.members.get_mut(&id) {
                        member.status = MemberStatus::Created;
                        member.outbox.clear();
                    }
                    acks.push((ack, JoinReply::Error(response)));
                    continue;
                }

                let outbox = match state.members.get_mut(&id) {
                    Some(member) => {
                        member.status = MemberStatus::Joined;
                        std::mem::take(&mut member.outbox)
                    }
                    None => Vec::new(),
                };

                for (event, payload) in outbox {
                    deliveries.push(state.fan_out(Some(id), &topic, &event, payload));
                }
                acks.push((ack, JoinReply::Ok(json!({}))));
            }
        }

        let answered = acks.len();
        debug!("Acknowledging {} pending join(s)", answered);
        for (ack, reply) in acks {
            ack.reply(reply);
        }
        deliver(deliveries);
        answered
    }

    /// Reject every deferred join with the same response
    pub fn reject_pending(&self, response: Value) -> usize {
        let acks: Vec<JoinAcknowledger> = {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.pending);
            let mut acks = Vec::new();

            for (id, ack) in pending {
                if let Some(member) = state.members.get_mut(&id) {
                    if member.status == MemberStatus::Joining {
                        member.status = MemberStatus::Created;
                        member.outbox.clear();
                        acks.push(ack);
                    }
                }
            }
            acks
        };

        let answered = acks.len();
        for ack in acks {
            ack.error(response.clone());
        }
        answered
    }

    /// Broadcast from the server side to every joined member of a topic
    ///
    /// Returns the number of handlers invoked.
    pub fn inject(&self, topic: &Topic, event: &str, payload: MovePayload) -> usize {
        let delivery = self.lock().fan_out(None, topic, event, payload);
        let count = delivery.0.len();
        debug!("Injecting '{}' on {} to {} handler(s)", event, topic, count);
        deliver(vec![delivery]);
        count
    }

    /// Every join request received, in order
    pub fn join_requests(&self) -> Vec<Topic> {
        self.lock().join_requests.clone()
    }

    /// Number of handles released
    pub fn leave_count(&self) -> usize {
        self.lock().leaves
    }

    /// Handles created and not yet left
    pub fn open_channels(&self) -> usize {
        self.lock().members.len()
    }

    /// Members currently joined to a topic
    pub fn joined_members(&self, topic: &Topic) -> usize {
        self.lock()
            .members
            .values()
            .filter(|m| m.status == MemberStatus::Joined && &m.topic == topic)
            .count()
    }

    /// Every push delivered to the hub by a joined member, in order
    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.lock().pushes.clone()
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A socket connected to a `LocalHub`
#[derive(Clone)]
pub struct LocalSocket {
    hub: LocalHub,
    endpoint: String,
}

impl LocalSocket {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChannelTransport for LocalSocket {
    fn channel(&self, topic: &Topic) -> Result<Arc<dyn Channel>> {
        let id = {
            let mut state = self.hub.lock();
            let id = state.next_member;
            state.next_member += 1;
            state.members.insert(
                id,
                Member {
                    topic: topic.clone(),
                    status: MemberStatus::Created,
                    handlers: HashMap::new(),
                    outbox: Vec::new(),
                },
            );
            id
        };

        debug!("Created channel handle {} for {}", id, topic);
        Ok(Arc::new(LocalChannel {
            hub: self.hub.clone(),
            id,
            topic: topic.clone(),
        }))
    }
}

struct LocalChannel {
    hub: LocalHub,
    id: u64,
    topic: Topic,
}

impl Channel for LocalChannel {
    fn topic(&self) -> &Topic {
        &self.topic
    }

    fn on(&self, event: &str, handler: InboundHandler) {
        let mut state = self.hub.lock();
        match state.members.get_mut(&self.id) {
            Some(member) => {
                member
                    .handlers
                    .entry(event.to_string())
                    .or_default()
                    .push(handler);
            }
            _ => warn!("Ignoring '{}' handler on left channel {}", event, self.topic),
        }
    }

    fn join(&self) -> JoinReceipt {
        let mut state = self.hub.lock();
        state.join_requests.push(self.topic.clone());

        let status = state.members.get(&self.id).map(|m| m.status);
        match status {
            Some(MemberStatus::Created) => {}
            None => {
                warn!("Join on left channel {}", self.topic);
                return JoinReceipt::ready(JoinReply::Error(json!({"reason": "left"})));
            }
            Some(_) => {
                warn!("Duplicate join on {}", self.topic);
                return JoinReceipt::ready(JoinReply::Error(json!({"reason": "already joined"})));
            }
        }

        if let Some(response) = state.rejected_topics.get(self.topic.as_str()).cloned() {
            debug!("Rejecting join on {}", self.topic);
            return JoinReceipt::ready(JoinReply::Error(response));
        }

        let policy = state.policy.clone();
        match policy {
            JoinPolicy::Accept => {
                if let Some(member) = state.members.get_mut(&self.id) {
                    member.status = MemberStatus::Joined;
                }
                debug!("Accepted join on {}", self.topic);
                JoinReceipt::ready(JoinReply::Ok(json!({})))
            }
            JoinPolicy::Reject(response) => {
                debug!("Rejecting join on {}", self.topic);
                JoinReceipt::ready(JoinReply::Error(response))
            }
            JoinPolicy::Defer => {
                if let Some(member) = state.members.get_mut(&self.id) {
                    member.status = MemberStatus::Joining;
                }
                let (ack, receipt) = JoinReceipt::pair();
                state.pending.push((self.id, ack));
                debug!("Deferred join on {}", self.topic);
                receipt
            }
        }
    }

    fn push(&self, event: &str, payload: MovePayload) -> Result<()> {
        let delivery = {
            let mut state = self.hub.lock();
            let status = state.members.get(&self.id).map(|m| m.status);

            match status {
                Some(MemberStatus::Joined) => state.fan_out(Some(self.id), &self.topic, event, payload),
                Some(MemberStatus::Joining) => {
                    if let Some(member) = state.members.get_mut(&self.id) {
                        member.outbox.push((event.to_string(), payload));
                    }
                    debug!("Buffered '{}' on {} until joined", event, self.topic);
                    return Ok(());
                }
                Some(MemberStatus::Created) => {
                    return Err(RelayError::TransportError(format!(
                        "push '{}' on {} before joining",
                        event, self.topic
                    )));
                }
                None => {
                    return Err(RelayError::ChannelClosed {
                        topic: self.topic.to_string(),
                    });
                }
            }
        };

        deliver(vec![delivery]);
        Ok(())
    }

    fn leave(&self) {
        let mut state = self.hub.lock();

        if state.members.remove(&self.id).is_some() {
            state.leaves += 1;
            let id = self.id;
            state.pending.retain(|(pending_id, _)| *pending_id != id);
            debug!("Handle {} left {}", self.id, self.topic);
        } else {
            debug!("Handle {} already left {}", self.id, self.topic);
        }
    }
}
