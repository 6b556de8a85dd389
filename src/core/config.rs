/// Relay configuration
///
/// Names every string the relay depends on: the topic prefix, the dataset
/// key holding the session identifier, the wire event and the two UI host
/// events, plus the socket endpoint and connect params.

use crate::core::{SessionId, Topic};
use crate::error::{RelayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Characters allowed in event names and topic prefixes
static EVENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-/:]+$").expect("static pattern"));

/// Socket connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketConfig {
    /// Socket endpoint path
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Params sent when connecting (e.g. `token`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

fn default_endpoint() -> String {
    "/socket".to_string()
}

impl SocketConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a connect param
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.params.get("token").map(String::as_str)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new(default_endpoint())
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Topic prefix; topics are `<prefix>:<session>`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Dataset key holding the session identifier (`gameId` => `data-game-id`)
    #[serde(default = "default_session_attribute")]
    pub session_attribute: String,

    /// Channel event carrying moves, both directions
    #[serde(default = "default_wire_event")]
    pub wire_event: String,

    /// Event pushed to the UI host when a remote move arrives
    #[serde(default = "default_host_inbound_event")]
    pub host_inbound_event: String,

    /// Event the UI host emits for a local move
    #[serde(default = "default_host_outbound_event")]
    pub host_outbound_event: String,

    #[serde(default)]
    pub socket: SocketConfig,
}

fn default_topic_prefix() -> String {
    "game".to_string()
}

fn default_session_attribute() -> String {
    "gameId".to_string()
}

fn default_wire_event() -> String {
    "move_made".to_string()
}

fn default_host_inbound_event() -> String {
    "handle_remote_move".to_string()
}

fn default_host_outbound_event() -> String {
    "broadcast_move".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            session_attribute: default_session_attribute(),
            wire_event: default_wire_event(),
            host_inbound_event: default_host_inbound_event(),
            host_outbound_event: default_host_outbound_event(),
            socket: SocketConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Preset using `remote_move` / `make_move` as the host event names
    pub fn alternate_events() -> Self {
        Self {
            host_inbound_event: "remote_move".to_string(),
            host_outbound_event: "make_move".to_string(),
            ..Self::default()
        }
    }

    /// Create a builder starting from the defaults
    ///
    /// # Examples
    /// ```ignore
    /// let config = RelayConfig::builder()
    ///     .topic_prefix("match")
    ///     .socket(SocketConfig::default().param("token", "abc"))
    ///     .build()?;
    /// ```
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Topic for a session under this configuration
    pub fn topic_for(&self, session: &SessionId) -> Topic {
        Topic::for_session(&self.topic_prefix, session)
    }

    /// Validate the configuration
    ///
    /// - Event names and the topic prefix must be non-empty and limited to
    ///   `[A-Za-z0-9_-/:]`
    /// - The topic prefix must not contain the topic separator
    /// - The session attribute and socket endpoint must be non-empty
    ///
    /// # Errors
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<()> {
        check_name("topic_prefix", &self.topic_prefix)?;
        if self.topic_prefix.contains(crate::core::session::TOPIC_SEPARATOR) {
            warn!("Validation failed: topic prefix '{}' contains ':'", self.topic_prefix);
            return Err(RelayError::ValidationError {
                field: "topic_prefix".to_string(),
                reason: "Prefix cannot contain ':'".to_string(),
            });
        }

        check_name("wire_event", &self.wire_event)?;
        check_name("host_inbound_event", &self.host_inbound_event)?;
        check_name("host_outbound_event", &self.host_outbound_event)?;

        if self.session_attribute.trim().is_empty() {
            warn!("Validation failed: empty session attribute");
            return Err(RelayError::ValidationError {
                field: "session_attribute".to_string(),
                reason: "Session attribute cannot be empty".to_string(),
            });
        }

        if self.socket.endpoint.trim().is_empty() {
            warn!("Validation failed: empty socket endpoint");
            return Err(RelayError::ValidationError {
                field: "socket.endpoint".to_string(),
                reason: "Endpoint cannot be empty".to_string(),
            });
        }

        debug!("Relay configuration valid");
        Ok(())
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading relay configuration from {}", path.display());

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;

        info!("Loaded relay configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn check_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        warn!("Validation failed: empty {}", field);
        return Err(RelayError::ValidationError {
            field: field.to_string(),
            reason: "Cannot be empty".to_string(),
        });
    }

    if !EVENT_NAME.is_match(value) {
        warn!("Validation failed: {} '{}' has invalid characters", field, value);
        return Err(RelayError::ValidationError {
            field: field.to_string(),
            reason: format!("'{}' may only contain letters, digits, '-', '/', ':' and '_'", value),
        });
    }

    Ok(())
}

/// Builder for `RelayConfig`
#[derive(Debug, Clone, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    pub fn session_attribute(mut self, key: impl Into<String>) -> Self {
        self.config.session_attribute = key.into();
        self
    }

    pub fn wire_event(mut self, event: impl Into<String>) -> Self {
        self.config.wire_event = event.into();
        self
    }

    pub fn host_inbound_event(mut self, event: impl Into<String>) -> Self {
        self.config.host_inbound_event = event.into();
        self
    }

    pub fn host_outbound_event(mut self, event: impl Into<String>) -> Self {
        self.config.host_outbound_event = event.into();
        self
    }

    pub fn socket(mut self, socket: SocketConfig) -> Self {
        self.config.socket = socket;
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<RelayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
