//! Showing "entity created" acknowledgments in a context.
//!
//! Mounting a [`RelaySubscriber`] first claims an announcement left pending
//! by a context that ran before this one, then listens for announcements
//! delivered afterward. Dropping it unregisters the listener.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::ack::{Acknowledgment, Presenter};
use crate::config::RelayConfig;
use crate::context::{Context, ListenerId};
use crate::event::EntityAdded;
use crate::topic::{RelayTopic, Take};

/// Lifecycle of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Created, pending check not started.
    Idle,
    /// Presenting a claimed pending announcement.
    Consuming,
    /// Registered on the context's event stream.
    Listening,
    /// Listener removed.
    Unmounted,
}

/// What the mount-time pending check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Nothing was pending.
    Nothing,
    /// This subscriber claimed and presented the announcement.
    Consumed(EntityAdded),
    /// The pending value was not a valid announcement and was left alone.
    Malformed,
    /// Another context claimed or replaced the announcement first. A
    /// replacing announcement is delivered by the next pump.
    Lost,
    /// The store could not be read or written.
    Unavailable,
}

/// Per-context subscriber presenting relay acknowledgments.
#[derive(Debug)]
pub struct RelaySubscriber {
    topic: RelayTopic<EntityAdded>,
    state: Mutex<SubscriberState>,
    listener: Mutex<Option<ListenerId>>,
    pending: PendingOutcome,
}

impl RelaySubscriber {
    /// Mount a subscriber in `context`.
    ///
    /// Any pending announcement is claimed and presented before this
    /// returns. Never fails; store problems are logged.
    pub fn mount(
        context: Arc<Context>,
        relay: &RelayConfig,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let subscriber = Self {
            topic: RelayTopic::new(context, relay.key.clone()),
            state: Mutex::new(SubscriberState::Idle),
            listener: Mutex::new(None),
            pending: PendingOutcome::Nothing,
        };
        subscriber.mount_with(relay, presenter)
    }

    fn mount_with(mut self, relay: &RelayConfig, presenter: Arc<dyn Presenter>) -> Self {
        let context = Arc::clone(self.topic.context());

        // No pump may dispatch between the pending read and the registration
        let (pending, id) = context.with_pump_held(|| {
            let (pending, head) = self.check_pending(relay, presenter.as_ref());

            let listen_relay = relay.clone();
            let context_id = context.id().clone();
            let id = self.topic.subscribe_after(head, move |record: EntityAdded| {
                debug!(context = %context_id, entity_id = %record.entity_id, "Relay event");
                presenter.present(Acknowledgment::entity_added(&record, &listen_relay));
            });
            (pending, id)
        });

        self.pending = pending;
        *self.listener_slot() = Some(id);
        self.set_state(SubscriberState::Listening);
        self
    }

    /// Claim a pending announcement. Also returns the change log head read
    /// with it: later changes reach the listener through the next pump.
    fn check_pending(
        &self,
        relay: &RelayConfig,
        presenter: &dyn Presenter,
    ) -> (PendingOutcome, i64) {
        let context = self.topic.context().id();

        let (take, head) = match self.topic.take_pending_at_head() {
            Ok(taken) => taken,
            Err(e) => {
                warn!(context = %context, "Pending announcement check failed: {e}");
                return (PendingOutcome::Unavailable, 0);
            }
        };

        let outcome = match take {
            Take::Empty => PendingOutcome::Nothing,
            Take::Claimed(record) => {
                self.set_state(SubscriberState::Consuming);
                info!(
                    context = %context,
                    entity_id = %record.entity_id,
                    "Presenting pending announcement"
                );
                presenter.present(Acknowledgment::entity_added(&record, relay));
                PendingOutcome::Consumed(record)
            }
            Take::Malformed(e) => {
                warn!(
                    context = %context,
                    key = %self.topic.key(),
                    "Ignoring malformed pending announcement: {e}"
                );
                PendingOutcome::Malformed
            }
            Take::Lost => {
                debug!(context = %context, "Pending announcement removed or replaced first");
                PendingOutcome::Lost
            }
        };
        (outcome, head)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Result of the mount-time pending check.
    #[must_use]
    pub fn pending_outcome(&self) -> &PendingOutcome {
        &self.pending
    }

    /// Unregister from the context's event stream. Idempotent.
    pub fn unmount(&self) {
        if let Some(id) = self.listener_slot().take() {
            self.topic.unsubscribe(id);
            debug!(context = %self.topic.context().id(), "Relay subscriber unmounted");
        }
        self.set_state(SubscriberState::Unmounted);
    }

    fn set_state(&self, state: SubscriberState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<ListenerId>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RelaySubscriber {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::ack::RecordingPresenter;
    use crate::error::Result;
    use crate::event::ContextId;
    use crate::relay::EventRelay;
    use crate::store::{ChangeRecord, KeySnapshot, KeyValueStore, SqliteStore};

    const LATE: &str = r#"{"id":"C099","name":"Late"}"#;

    /// Another context writes `LATE` right after the first snapshot is read.
    #[derive(Debug)]
    struct InterleavingStore {
        inner: SqliteStore,
        fired: AtomicBool,
    }

    impl InterleavingStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                fired: AtomicBool::new(false),
            }
        }
    }

    impl KeyValueStore for InterleavingStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn snapshot(&self, key: &str) -> Result<KeySnapshot> {
            let snapshot = self.inner.snapshot(key)?;
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.inner.set(key, LATE, &ContextId::from_raw("other"))?;
            }
            Ok(snapshot)
        }

        fn set(&self, key: &str, value: &str, origin: &ContextId) -> Result<()> {
            self.inner.set(key, value, origin)
        }

        fn remove(&self, key: &str, origin: &ContextId) -> Result<bool> {
            self.inner.remove(key, origin)
        }

        fn compare_and_remove(&self, key: &str, expected: &str, origin: &ContextId) -> Result<bool> {
            self.inner.compare_and_remove(key, expected, origin)
        }

        fn changes_since(&self, after: i64, limit: usize) -> Result<Vec<ChangeRecord>> {
            self.inner.changes_since(after, limit)
        }

        fn latest_seq(&self) -> Result<i64> {
            self.inner.latest_seq()
        }
    }

    fn memory_store() -> Arc<dyn KeyValueStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    fn context_on(store: &Arc<dyn KeyValueStore>) -> Arc<Context> {
        Arc::new(Context::new(Arc::clone(store)).unwrap())
    }

    #[test]
    fn test_mount_without_pending() {
        let store = memory_store();
        let presenter = Arc::new(RecordingPresenter::new());
        let context = context_on(&store);

        let subscriber = RelaySubscriber::mount(
            Arc::clone(&context),
            &RelayConfig::default(),
            presenter.clone(),
        );

        assert_eq!(subscriber.state(), SubscriberState::Listening);
        assert_eq!(subscriber.pending_outcome(), &PendingOutcome::Nothing);
        assert_eq!(presenter.count(), 0);
        assert_eq!(context.listener_count_for("entityAdded"), 1);
    }

    #[test]
    fn test_mount_consumes_pending_once() {
        let store = memory_store();
        let origin = EventRelay::new(
            context_on(&store),
            RelayConfig::default(),
            Arc::new(RecordingPresenter::new()),
        );
        origin.announce_created("C010", Some("Acme"));

        let late = Arc::new(RecordingPresenter::new());
        let subscriber = RelaySubscriber::mount(
            context_on(&store),
            &RelayConfig::default(),
            late.clone(),
        );

        assert_eq!(late.count(), 1);
        assert!(late.last().unwrap().message.contains("Acme"));
        assert_eq!(
            subscriber.pending_outcome(),
            &PendingOutcome::Consumed(EntityAdded::new("C010", Some("Acme")))
        );
        assert!(store.get("entityAdded").unwrap().is_none());

        let third = Arc::new(RecordingPresenter::new());
        let _again = RelaySubscriber::mount(
            context_on(&store),
            &RelayConfig::default(),
            third.clone(),
        );
        assert_eq!(third.count(), 0);
    }

    #[test]
    fn test_announcement_before_mount_is_not_replayed() {
        let store = memory_store();
        let watcher_ctx = context_on(&store);

        EventRelay::new(
            context_on(&store),
            RelayConfig::default(),
            Arc::new(RecordingPresenter::new()),
        )
        .announce_created("C010", Some("Acme"));

        let presenter = Arc::new(RecordingPresenter::new());
        let _subscriber = RelaySubscriber::mount(
            Arc::clone(&watcher_ctx),
            &RelayConfig::default(),
            presenter.clone(),
        );
        assert_eq!(presenter.count(), 1);

        watcher_ctx.pump().unwrap();
        assert_eq!(presenter.count(), 1);
    }

    #[test]
    fn test_announcement_during_mount_is_delivered() {
        let racy = Arc::new(InterleavingStore::new());
        let store: Arc<dyn KeyValueStore> = racy.clone();
        let context = context_on(&store);
        let presenter = Arc::new(RecordingPresenter::new());

        let subscriber = RelaySubscriber::mount(
            Arc::clone(&context),
            &RelayConfig::default(),
            presenter.clone(),
        );
        assert!(racy.fired.load(Ordering::SeqCst));
        assert_eq!(subscriber.pending_outcome(), &PendingOutcome::Nothing);
        assert_eq!(presenter.count(), 0);

        assert_eq!(context.pump().unwrap(), 1);
        assert_eq!(presenter.count(), 1);
        assert_eq!(presenter.last().unwrap().message, "Late has been added");
    }

    #[test]
    fn test_replaced_pending_is_delivered_after_lost_claim() {
        let racy = Arc::new(InterleavingStore::new());
        let store: Arc<dyn KeyValueStore> = racy.clone();
        let acme = r#"{"id":"C010","name":"Acme"}"#;
        store.set("entityAdded", acme, &ContextId::from_raw("origin")).unwrap();
        let context = context_on(&store);
        let presenter = Arc::new(RecordingPresenter::new());

        let subscriber = RelaySubscriber::mount(
            Arc::clone(&context),
            &RelayConfig::default(),
            presenter.clone(),
        );
        assert_eq!(subscriber.pending_outcome(), &PendingOutcome::Lost);
        assert_eq!(presenter.count(), 0);
        assert_eq!(store.get("entityAdded").unwrap().as_deref(), Some(LATE));

        context.pump().unwrap();
        assert_eq!(presenter.count(), 1);
        assert_eq!(presenter.last().unwrap().message, "Late has been added");

        context.pump().unwrap();
        assert_eq!(presenter.count(), 1);
    }

    #[test]
    fn test_malformed_pending_is_left_and_ignored() {
        let store = memory_store();
        let writer = ContextId::from_raw("writer");
        store.set("entityAdded", "{\"name\": 42", &writer).unwrap();
        store.set("notifications", "[\"kept\"]", &writer).unwrap();

        let presenter = Arc::new(RecordingPresenter::new());
        let subscriber = RelaySubscriber::mount(
            context_on(&store),
            &RelayConfig::default(),
            presenter.clone(),
        );

        assert_eq!(subscriber.pending_outcome(), &PendingOutcome::Malformed);
        assert_eq!(subscriber.state(), SubscriberState::Listening);
        assert_eq!(presenter.count(), 0);
        assert!(store.get("entityAdded").unwrap().is_some());
        assert_eq!(store.get("notifications").unwrap().as_deref(), Some("[\"kept\"]"));
    }

    #[test]
    fn test_broadcast_presents_without_deleting() {
        let store = memory_store();
        let watcher_ctx = context_on(&store);
        let presenter = Arc::new(RecordingPresenter::new());
        let _subscriber = RelaySubscriber::mount(
            Arc::clone(&watcher_ctx),
            &RelayConfig::default(),
            presenter.clone(),
        );

        let origin = EventRelay::new(
            context_on(&store),
            RelayConfig::default(),
            Arc::new(RecordingPresenter::new()),
        );
        origin.announce_created("C010", Some("Acme"));
        assert_eq!(presenter.count(), 0);

        watcher_ctx.pump().unwrap();
        assert_eq!(presenter.count(), 1);
        let path = presenter.last().unwrap().action.unwrap().path;
        assert!(path.contains("C010"));

        // The broadcast path leaves the entry for a context mounting later
        assert!(store.get("entityAdded").unwrap().is_some());
    }

    #[test]
    fn test_malformed_broadcast_is_dropped() {
        let store = memory_store();
        let watcher_ctx = context_on(&store);
        let presenter = Arc::new(RecordingPresenter::new());
        let subscriber = RelaySubscriber::mount(
            Arc::clone(&watcher_ctx),
            &RelayConfig::default(),
            presenter.clone(),
        );

        store.set("entityAdded", "undefined", &ContextId::from_raw("other")).unwrap();
        assert_eq!(watcher_ctx.pump().unwrap(), 1);

        assert_eq!(presenter.count(), 0);
        assert_eq!(subscriber.state(), SubscriberState::Listening);
    }

    #[test]
    fn test_unmount_stops_delivery() {
        let store = memory_store();
        let watcher_ctx = context_on(&store);
        let presenter = Arc::new(RecordingPresenter::new());
        let subscriber = RelaySubscriber::mount(
            Arc::clone(&watcher_ctx),
            &RelayConfig::default(),
            presenter.clone(),
        );

        subscriber.unmount();
        subscriber.unmount();
        assert_eq!(subscriber.state(), SubscriberState::Unmounted);
        assert_eq!(watcher_ctx.listener_count(), 0);

        store
            .set("entityAdded", r#"{"id":"C9"}"#, &ContextId::from_raw("other"))
            .unwrap();
        watcher_ctx.pump().unwrap();
        assert_eq!(presenter.count(), 0);
    }

    #[test]
    fn test_drop_unregisters_listener() {
        let store = memory_store();
        let context = context_on(&store);
        {
            let _subscriber = RelaySubscriber::mount(
                Arc::clone(&context),
                &RelayConfig::default(),
                Arc::new(RecordingPresenter::new()),
            );
            assert_eq!(context.listener_count(), 1);
        }
        assert_eq!(context.listener_count(), 0);
    }

    #[test]
    fn test_custom_relay_key() {
        let store = memory_store();
        let relay = RelayConfig {
            key: "saleAdded".to_string(),
            detail_path: "/sales/{id}".to_string(),
            ..RelayConfig::default()
        };
        EventRelay::new(context_on(&store), relay.clone(), Arc::new(RecordingPresenter::new()))
            .announce_created("S1", None);

        let presenter = Arc::new(RecordingPresenter::new());
        let _subscriber = RelaySubscriber::mount(context_on(&store), &relay, presenter.clone());

        assert_eq!(presenter.last().unwrap().action.unwrap().path, "/sales/S1");
        assert!(store.get("saleAdded").unwrap().is_none());
    }
}
