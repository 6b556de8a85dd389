/// Move payloads relayed between the UI host and the channel
///
/// The relay treats a payload as opaque JSON and forwards it verbatim in
/// both directions. The typed accessors here exist for consumers that want
/// to read the usual `{from, to[, player]}` shape; nothing on the relay path
/// calls them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Opaque move payload, forwarded unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovePayload(Value);

/// Typed view of the usual move shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveFields {
    pub from: String,
    pub to: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<Value>,
}

impl MovePayload {
    /// Build a `{from, to}` payload
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self(json!({ "from": from.into(), "to": to.into() }))
    }

    /// Attach a `player` field
    ///
    /// Has no effect when the payload is not a JSON object.
    pub fn with_player(mut self, player: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.0 {
            map.insert("player".to_string(), player.into());
        }
        self
    }

    /// Wrap an arbitrary JSON value without inspecting it
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// The `from` field, if present as a string
    pub fn origin(&self) -> Option<&str> {
        self.0.get("from").and_then(Value::as_str)
    }

    /// The `to` field, if present as a string
    pub fn target(&self) -> Option<&str> {
        self.0.get("to").and_then(Value::as_str)
    }

    /// Player identifier, if present
    pub fn player(&self) -> Option<&Value> {
        self.0.get("player")
    }

    /// Decode the typed view; `None` if the payload doesn't have that shape
    pub fn fields(&self) -> Option<MoveFields> {
        serde_json::from_value(self.0.clone()).ok()
    }
}

impl Default for MovePayload {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl From<Value> for MovePayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<MoveFields> for MovePayload {
    fn from(fields: MoveFields) -> Self {
        let mut payload = MovePayload::new(fields.from, fields.to);
        if let Some(player) = fields.player {
            payload = payload.with_player(player);
        }
        payload
    }
}
