//! Durable log of free-text notifications, newest first.
//!
//! Independent of the relay: entries are added explicitly, the whole list is
//! rewritten to the store after every change, and it is read back verbatim
//! when a log is loaded.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::NotificationsConfig;
use crate::context::Context;
use crate::event::ContextId;
use crate::store::KeyValueStore;

/// In-memory notification list mirrored to the persistent store.
#[derive(Debug)]
pub struct NotificationLog {
    store: Arc<dyn KeyValueStore>,
    origin: ContextId,
    key: String,
    max_entries: usize,
    entries: Vec<String>,
}

impl NotificationLog {
    /// Load the log persisted under the configured key.
    ///
    /// A missing, unreadable, or malformed stored value yields an empty log.
    #[must_use]
    pub fn load(context: &Context, config: &NotificationsConfig) -> Self {
        let store = Arc::clone(context.store());
        let entries = read_entries(store.as_ref(), &config.key);

        Self {
            store,
            origin: context.id().clone(),
            key: config.key.clone(),
            max_entries: config.max_entries,
            entries,
        }
    }

    /// Entries, newest first.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepend `message` and persist the whole log.
    ///
    /// Returns `false` if persisting failed; the entry is kept in memory.
    pub fn add_notification(&mut self, message: impl Into<String>) -> bool {
        self.entries.insert(0, message.into());
        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            self.entries.truncate(self.max_entries);
        }
        self.persist()
    }

    /// Remove every entry and persist the empty log.
    ///
    /// Returns `false` if persisting failed; memory is cleared regardless.
    pub fn clear_notifications(&mut self) -> bool {
        self.entries.clear();
        self.persist()
    }

    /// Replace memory with what the store currently holds.
    pub fn reload(&mut self) {
        self.entries = read_entries(self.store.as_ref(), &self.key);
    }

    fn persist(&self) -> bool {
        let serialized = match serde_json::to_string(&self.entries) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(key = %self.key, "Could not serialize notifications: {e}");
                return false;
            }
        };

        match self.store.set(&self.key, &serialized, &self.origin) {
            Ok(()) => {
                debug!(key = %self.key, entries = self.entries.len(), "Persisted notifications");
                true
            }
            Err(e) if e.is_quota_exceeded() => {
                warn!(
                    key = %self.key,
                    entries = self.entries.len(),
                    "Notifications over the storage quota, not persisted: {e}"
                );
                false
            }
            Err(e) => {
                warn!(key = %self.key, "Could not persist notifications: {e}");
                false
            }
        }
    }
}

fn read_entries(store: &dyn KeyValueStore, key: &str) -> Vec<String> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(key, "Could not read notifications: {e}");
            return Vec::new();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(key, "Stored notifications are malformed, starting empty: {e}");
        Vec::new()
    })
}
