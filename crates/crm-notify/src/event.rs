//! Event types exchanged through the persistent store.
//!
//! [`StorageEvent`] is what a context's listeners receive whenever a key
//! changes. [`EntityAdded`] is the relay payload written under the relay key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one execution context (a running front-end instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a fresh, globally unique context id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing id, e.g. one read back from the change log.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A change to one key of the persistent store.
///
/// Mirrors the browser storage event: `new_value` is `None` when the key was
/// removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// The key that changed.
    pub key: String,
    /// Value before the change.
    pub old_value: Option<String>,
    /// Value after the change.
    pub new_value: Option<String>,
    /// Context that made the change.
    pub origin: ContextId,
    /// Change log sequence number, `None` for in-process loopback events.
    pub seq: Option<i64>,
}

impl StorageEvent {
    /// Build a loopback event for a value just written by `origin`.
    #[must_use]
    pub fn loopback(
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: impl Into<String>,
        origin: ContextId,
    ) -> Self {
        Self {
            key: key.into(),
            old_value,
            new_value: Some(new_value.into()),
            origin,
            seq: None,
        }
    }

    /// Whether this event was dispatched in-process rather than read from
    /// the change log.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.seq.is_none()
    }
}

/// Payload announcing that a domain entity was created.
///
/// Serialized as `{"id": "...", "name": "..."}`; `name` is omitted when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAdded {
    /// Identifier of the created record.
    #[serde(rename = "id")]
    pub entity_id: String,

    /// Human-readable label of the created record.
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl EntityAdded {
    /// Create a new payload. A blank display name is treated as absent.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            entity_id: entity_id.into(),
            display_name: display_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string),
        }
    }

    /// The label to show for this entity, or `fallback` without a usable name.
    #[must_use]
    pub fn label<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => fallback,
        }
    }
}
