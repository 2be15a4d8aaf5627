//! Single-slot topic over one well-known store key.
//!
//! A [`RelayTopic`] has one producer side ([`RelayTopic::publish`]) and any
//! number of consumers. It holds at most one durable pending message: the
//! value under its key. Consumers that were running when a message was
//! published get it through their context's event stream; consumers that
//! start later claim the pending message with [`RelayTopic::take_pending`],
//! which succeeds for exactly one of them.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::{Context, ListenerId};
use crate::error::Result;
use crate::event::StorageEvent;
use crate::store::KeySnapshot;

/// What [`RelayTopic::publish`] managed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// The serialized message.
    pub raw: String,
    /// Whether the message reached the store.
    pub persisted: bool,
    /// The store rejected the message because of its byte quota.
    pub quota_exceeded: bool,
    /// Topic subscribers in the publishing context that received the loopback.
    pub local_subscribers: usize,
}

/// Outcome of [`RelayTopic::take_pending`].
#[derive(Debug)]
pub enum Take<T> {
    /// Nothing was pending.
    Empty,
    /// The pending value failed to parse and was left in place.
    Malformed(serde_json::Error),
    /// This caller claimed the pending message and removed it.
    Claimed(T),
    /// Another consumer removed or replaced the message first.
    Lost,
}

/// Typed single-slot topic bound to a context.
pub struct RelayTopic<T> {
    context: Arc<Context>,
    key: String,
    _message: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for RelayTopic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayTopic")
            .field("context", self.context.id())
            .field("key", &self.key)
            .finish()
    }
}

impl<T> RelayTopic<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Bind a topic on `key` to `context`.
    #[must_use]
    pub fn new(context: Arc<Context>, key: impl Into<String>) -> Self {
        Self {
            context,
            key: key.into(),
            _message: PhantomData,
        }
    }

    /// The store key backing this topic.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The context this topic publishes from and delivers into.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Parse a raw stored value.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `raw` is not a valid message.
    pub fn parse(raw: &str) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Publish `message`: store it as the pending message, then dispatch it
    /// into this context's event stream.
    ///
    /// A store failure is logged and reported through
    /// [`Publication::persisted`]; the loopback dispatch happens regardless.
    ///
    /// # Errors
    ///
    /// Returns an error only if `message` cannot be serialized.
    pub fn publish(&self, message: &T) -> Result<Publication> {
        let raw = serde_json::to_string(message)?;
        let store = self.context.store();

        let old_value = match store.get(&self.key) {
            Ok(value) => value,
            Err(e) => {
                debug!(key = %self.key, "Could not read previous value: {e}");
                None
            }
        };

        let (persisted, quota_exceeded) = match store.set(&self.key, &raw, self.context.id()) {
            Ok(()) => (true, false),
            Err(e) if e.is_quota_exceeded() => {
                warn!(key = %self.key, "Message over the storage quota, not persisted: {e}");
                (false, true)
            }
            Err(e) => {
                warn!(key = %self.key, "Message not persisted, other contexts miss it: {e}");
                (false, false)
            }
        };

        let local_subscribers = self.context.listener_count_for(&self.key);
        let event = StorageEvent::loopback(
            self.key.clone(),
            old_value,
            raw.clone(),
            self.context.id().clone(),
        );
        self.context.dispatch(&event);

        Ok(Publication {
            raw,
            persisted,
            quota_exceeded,
            local_subscribers,
        })
    }

    /// The raw pending value, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn peek_pending(&self) -> Result<Option<String>> {
        self.context.store().get(&self.key)
    }

    /// Claim and remove the pending message.
    ///
    /// The removal is a compare-and-delete against the value that was read,
    /// so of several consumers racing on one message exactly one gets
    /// [`Take::Claimed`]. A malformed value is left in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn take_pending(&self) -> Result<Take<T>> {
        self.take_pending_at_head().map(|(take, _)| take)
    }

    /// Like [`RelayTopic::take_pending`], and also return the change log
    /// head read together with the pending value.
    ///
    /// Every change with a higher seq was written after the read, including
    /// a message that replaced the one this call lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn take_pending_at_head(&self) -> Result<(Take<T>, i64)> {
        let store = self.context.store();
        let KeySnapshot { value, head } = store.snapshot(&self.key)?;
        let Some(raw) = value else {
            return Ok((Take::Empty, head));
        };

        let message = match Self::parse(&raw) {
            Ok(message) => message,
            Err(e) => return Ok((Take::Malformed(e), head)),
        };

        let claimed = store.compare_and_remove(&self.key, &raw, self.context.id())?;
        let take = if claimed {
            Take::Claimed(message)
        } else {
            Take::Lost
        };
        Ok((take, head))
    }

    /// Call `handler` for every message delivered to this context.
    ///
    /// Removals are ignored. Malformed messages are logged and dropped.
    pub fn subscribe(&self, handler: impl Fn(T) + Send + Sync + 'static) -> ListenerId {
        self.subscribe_after(0, handler)
    }

    /// Like [`RelayTopic::subscribe`], but skip change log records with a
    /// seq at or below `seq`. Loopback messages are always delivered.
    pub fn subscribe_after(
        &self,
        seq: i64,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> ListenerId {
        let key = self.key.clone();
        self.context.add_listener(Some(&self.key), move |event| {
            if event.seq.is_some_and(|event_seq| event_seq <= seq) {
                return;
            }
            let Some(raw) = event.new_value.as_deref() else {
                return;
            };
            match Self::parse(raw) {
                Ok(message) => handler(message),
                Err(e) => {
                    warn!(key = %key, origin = %event.origin, "Dropping malformed message: {e}");
                }
            }
        })
    }

    /// Stop delivering to a handler registered with [`RelayTopic::subscribe`].
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.context.remove_listener(id)
    }
}
