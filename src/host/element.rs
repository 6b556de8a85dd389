/// Hosting element attributes
///
/// The relay reads its session identifier from a `data-*` attribute through
/// dataset-style keys: `gameId` reads `data-game-id`.

use std::collections::BTreeMap;

/// Attributes of the element a relay is mounted on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute by its full name (`data-game-id`)
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Set a `data-*` attribute by dataset key (`gameId`)
    pub fn with_data(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attribute(dataset_attribute_name(key), value);
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(&name.to_ascii_lowercase())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Read a `data-*` attribute by dataset key
    pub fn data(&self, key: &str) -> Option<&str> {
        self.attribute(&dataset_attribute_name(key))
    }

    /// All `data-*` attributes keyed by dataset key
    pub fn dataset(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix("data-")
                    .map(|rest| (dataset_key(rest), value.clone()))
            })
            .collect()
    }
}

/// `gameId` => `data-game-id`
pub fn dataset_attribute_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 8);
    name.push_str("data-");
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            name.push('-');
            name.push(c.to_ascii_lowercase());
        } else {
            name.push(c);
        }
    }
    name
}

/// `game-id` => `gameId`
fn dataset_key(rest: &str) -> String {
    let mut key = String::with_capacity(rest.len());
    let mut upper_next = false;
    for c in rest.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next && c.is_ascii_lowercase() {
            key.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            if upper_next {
                key.push('-');
                upper_next = false;
            }
            key.push(c);
        }
    }
    if upper_next {
        key.push('-');
    }
    key
}
