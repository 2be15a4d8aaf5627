//! Announcing newly created records.
//!
//! The creation flow calls [`EventRelay::announce_created`] once its backend
//! has confirmed the new record. The relay stores the announcement for
//! contexts that start later, loops it back into the current context, and
//! makes sure the current context shows exactly one acknowledgment.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::ack::{Acknowledgment, Presenter};
use crate::config::RelayConfig;
use crate::context::Context;
use crate::event::EntityAdded;
use crate::topic::RelayTopic;

/// Report of one announcement. Never carries an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Announcement {
    /// `false` when the entity id was empty and nothing happened.
    pub accepted: bool,
    /// Whether the announcement reached the store.
    pub persisted: bool,
    /// The store turned the announcement away for lack of space.
    pub quota_exceeded: bool,
    /// Subscribers in this context that received the loopback event.
    pub local_subscribers: usize,
    /// Whether the relay presented the acknowledgment itself because no
    /// subscriber in this context was listening.
    pub presented_directly: bool,
}

/// Publishes "entity created" events from one context.
pub struct EventRelay {
    topic: RelayTopic<EntityAdded>,
    relay: RelayConfig,
    presenter: Arc<dyn Presenter>,
}

impl fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRelay")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl EventRelay {
    /// Create a relay publishing from `context`.
    #[must_use]
    pub fn new(context: Arc<Context>, relay: RelayConfig, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            topic: RelayTopic::new(context, relay.key.clone()),
            relay,
            presenter,
        }
    }

    /// Announce that the entity `entity_id` was created.
    ///
    /// By the time this returns, the current context has shown exactly one
    /// acknowledgment: through its own subscriber if one is mounted,
    /// otherwise directly. Store failures are logged and only cost the
    /// cross-context delivery.
    pub fn announce_created(&self, entity_id: &str, display_name: Option<&str>) -> Announcement {
        if entity_id.trim().is_empty() {
            warn!("Ignoring announcement with an empty entity id");
            return Announcement::default();
        }

        let record = EntityAdded::new(entity_id, display_name);
        let (persisted, quota_exceeded, local_subscribers) = match self.topic.publish(&record) {
            Ok(publication) => (
                publication.persisted,
                publication.quota_exceeded,
                publication.local_subscribers,
            ),
            Err(e) => {
                warn!(entity_id, "Could not publish announcement: {e}");
                (false, false, 0)
            }
        };

        let presented_directly = local_subscribers == 0;
        if presented_directly {
            self.presenter
                .present(Acknowledgment::entity_added(&record, &self.relay));
        }

        info!(
            entity_id,
            persisted, local_subscribers, presented_directly, "Announced created entity"
        );

        Announcement {
            accepted: true,
            persisted,
            quota_exceeded,
            local_subscribers,
            presented_directly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::{RecordingNavigator, RecordingPresenter};
    use crate::error::{Error, Result};
    use crate::event::ContextId;
    use crate::store::{ChangeRecord, KeySnapshot, KeyValueStore, SqliteStore};
    use crate::subscriber::RelaySubscriber;

    /// Store whose writes always fail, like a disabled or full browser store.
    #[derive(Debug)]
    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn snapshot(&self, _key: &str) -> Result<KeySnapshot> {
            Ok(KeySnapshot::default())
        }

        fn set(&self, _key: &str, _value: &str, _origin: &ContextId) -> Result<()> {
            Err(Error::store_unavailable("storage disabled"))
        }

        fn remove(&self, _key: &str, _origin: &ContextId) -> Result<bool> {
            Err(Error::store_unavailable("storage disabled"))
        }

        fn compare_and_remove(
            &self,
            _key: &str,
            _expected: &str,
            _origin: &ContextId,
        ) -> Result<bool> {
            Err(Error::store_unavailable("storage disabled"))
        }

        fn changes_since(&self, _after: i64, _limit: usize) -> Result<Vec<ChangeRecord>> {
            Ok(Vec::new())
        }

        fn latest_seq(&self) -> Result<i64> {
            Ok(0)
        }
    }

    fn context_on(store: &Arc<dyn KeyValueStore>) -> Arc<Context> {
        Arc::new(Context::new(Arc::clone(store)).unwrap())
    }

    fn memory_store() -> Arc<dyn KeyValueStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_announce_without_subscriber_presents_directly() {
        let store = memory_store();
        let presenter = Arc::new(RecordingPresenter::new());
        let relay = EventRelay::new(context_on(&store), RelayConfig::default(), presenter.clone());

        let announcement = relay.announce_created("C010", Some("Acme"));

        assert!(announcement.accepted);
        assert!(announcement.persisted);
        assert!(announcement.presented_directly);
        assert_eq!(presenter.count(), 1);

        let ack = presenter.last().unwrap();
        assert!(ack.message.contains("Acme"));
        assert!(ack.message.contains("added"));

        let navigator = RecordingNavigator::new();
        ack.activate(&navigator);
        assert!(navigator.paths()[0].contains("C010"));
    }

    #[test]
    fn test_announce_with_local_subscriber_presents_once() {
        let store = memory_store();
        let context = context_on(&store);
        let presenter = Arc::new(RecordingPresenter::new());

        let _subscriber = RelaySubscriber::mount(
            Arc::clone(&context),
            &RelayConfig::default(),
            presenter.clone(),
        );
        let relay = EventRelay::new(context, RelayConfig::default(), presenter.clone());

        let announcement = relay.announce_created("C010", Some("Acme"));

        assert_eq!(announcement.local_subscribers, 1);
        assert!(!announcement.presented_directly);
        assert_eq!(presenter.count(), 1);
    }

    #[test]
    fn test_announce_stores_wire_payload() {
        let store = memory_store();
        let relay = EventRelay::new(
            context_on(&store),
            RelayConfig::default(),
            Arc::new(RecordingPresenter::new()),
        );

        relay.announce_created("C011", None);
        assert_eq!(
            store.get("entityAdded").unwrap().as_deref(),
            Some(r#"{"id":"C011"}"#)
        );
    }

    #[test]
    fn test_announce_without_name_uses_fallback() {
        let store = memory_store();
        let presenter = Arc::new(RecordingPresenter::new());
        let relay = EventRelay::new(context_on(&store), RelayConfig::default(), presenter.clone());

        relay.announce_created("C011", None);

        let message = presenter.last().unwrap().message;
        assert!(message.contains("New customer"));
        assert!(!message.contains("undefined"));
    }

    #[test]
    fn test_store_failure_still_acknowledges() {
        let store: Arc<dyn KeyValueStore> = Arc::new(FailingStore);
        let presenter = Arc::new(RecordingPresenter::new());
        let relay = EventRelay::new(context_on(&store), RelayConfig::default(), presenter.clone());

        let announcement = relay.announce_created("C012", Some("Initech"));

        assert!(announcement.accepted);
        assert!(!announcement.persisted);
        assert!(!announcement.quota_exceeded);
        assert_eq!(presenter.count(), 1);
    }

    #[test]
    fn test_quota_exceeded_still_acknowledges() {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteStore::open_in_memory().unwrap().with_quota(Some(8)));
        let presenter = Arc::new(RecordingPresenter::new());
        let relay = EventRelay::new(context_on(&store), RelayConfig::default(), presenter.clone());

        let announcement = relay.announce_created("C013", Some("Umbrella"));

        assert!(!announcement.persisted);
        assert!(announcement.quota_exceeded);
        assert_eq!(presenter.count(), 1);
        assert!(store.get("entityAdded").unwrap().is_none());
    }

    #[test]
    fn test_empty_entity_id_is_ignored() {
        let store = memory_store();
        let presenter = Arc::new(RecordingPresenter::new());
        let relay = EventRelay::new(context_on(&store), RelayConfig::default(), presenter.clone());

        let announcement = relay.announce_created("  ", Some("Nobody"));

        assert_eq!(announcement, Announcement::default());
        assert_eq!(presenter.count(), 0);
        assert!(store.get("entityAdded").unwrap().is_none());
    }
}
