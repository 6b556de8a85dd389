/// Channel transport abstraction
///
/// The relay does not implement a publish/subscribe transport. It talks to
/// one through these traits:
/// - `ChannelTransport` hands out channel handles per topic
/// - `Channel` joins, leaves, pushes, and dispatches inbound events
///
/// Join acknowledgements are futures (`JoinReceipt`) completed by the
/// transport through a `JoinAcknowledger`.
///
/// `LocalHub` is an in-process implementation for tests and demos.

pub mod local;

use crate::core::{MovePayload, Topic};
use crate::error::Result;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub use local::{JoinPolicy, LocalHub, LocalSocket};

/// Callback for inbound channel events
pub type InboundHandler = Arc<dyn Fn(MovePayload) + Send + Sync>;

/// Server reply to a join request
#[derive(Debug, Clone, PartialEq)]
pub enum JoinReply {
    Ok(Value),
    Error(Value),
}

impl JoinReply {
    pub fn is_ok(&self) -> bool {
        matches!(self, JoinReply::Ok(_))
    }

    pub fn response(&self) -> &Value {
        match self {
            JoinReply::Ok(resp) | JoinReply::Error(resp) => resp,
        }
    }
}

/// Pending join acknowledgement
///
/// Resolves to `Some(reply)` once the transport acknowledges, or `None` if
/// the transport dropped the acknowledger without replying.
#[derive(Debug)]
pub struct JoinReceipt {
    rx: oneshot::Receiver<JoinReply>,
}

impl JoinReceipt {
    /// Create a connected acknowledger/receipt pair
    pub fn pair() -> (JoinAcknowledger, JoinReceipt) {
        let (tx, rx) = oneshot::channel();
        (JoinAcknowledger { tx }, JoinReceipt { rx })
    }

    /// A receipt that is already resolved
    pub fn ready(reply: JoinReply) -> Self {
        let (ack, receipt) = Self::pair();
        ack.reply(reply);
        receipt
    }
}

impl Future for JoinReceipt {
    type Output = Option<JoinReply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|reply| reply.ok())
    }
}

/// Transport side of a join acknowledgement
#[derive(Debug)]
pub struct JoinAcknowledger {
    tx: oneshot::Sender<JoinReply>,
}

impl JoinAcknowledger {
    pub fn ok(self, response: Value) {
        self.reply(JoinReply::Ok(response));
    }

    pub fn error(self, response: Value) {
        self.reply(JoinReply::Error(response));
    }

    pub fn reply(self, reply: JoinReply) {
        // Receiver gone means nobody is waiting any more
        let _ = self.tx.send(reply);
    }
}

/// A handle on one topic of the transport
///
/// `on`, `join` and `leave` are called with the relay's state locked and must
/// not call back into the relay. Inbound handlers may run on any thread,
/// including from inside `push`.
pub trait Channel: Send + Sync {
    /// Topic this handle is bound to
    fn topic(&self) -> &Topic;

    /// Register a handler for an inbound event
    fn on(&self, event: &str, handler: InboundHandler);

    /// Request to join the topic
    fn join(&self) -> JoinReceipt;

    /// Push an event to the topic
    fn push(&self, event: &str, payload: MovePayload) -> Result<()>;

    /// Leave the topic; the handle is unusable afterwards
    fn leave(&self);
}

/// Source of channel handles
///
/// `channel` is called with the relay's state locked and must not call back
/// into the relay.
pub trait ChannelTransport: Send + Sync {
    /// Create a handle for a topic (does not join)
    fn channel(&self, topic: &Topic) -> Result<Arc<dyn Channel>>;
}
