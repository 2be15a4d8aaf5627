//! Execution contexts and their event streams.
//!
//! A [`Context`] is one running front-end instance. It owns a listener
//! registry that plays the role of the context's storage event stream:
//! [`Context::dispatch`] delivers an event to the matching listeners
//! synchronously, and [`Context::pump`] reads changes other contexts made
//! to the shared store and dispatches them. Changes a context makes itself
//! are never pumped back to it; the relay dispatches those explicitly.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::{ContextId, StorageEvent};
use crate::store::KeyValueStore;

/// Maximum change records read per store query while pumping.
const PUMP_BATCH: usize = 256;

/// Callback invoked for each delivered event.
pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Handle returned by [`Context::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    key: Option<String>,
    callback: Listener,
}

/// One execution context sharing a persistent store with others.
pub struct Context {
    id: ContextId,
    store: Arc<dyn KeyValueStore>,
    listeners: Mutex<Vec<Registration>>,
    next_listener: AtomicU64,
    /// Last change log seq this context has seen. Held for the whole pump.
    cursor: Mutex<i64>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("store", &self.store)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context with a fresh id.
    ///
    /// The context only observes changes made after this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's change log cannot be read.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::with_id(ContextId::generate(), store)
    }

    /// Create a context with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's change log cannot be read.
    pub fn with_id(id: ContextId, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let cursor = store.latest_seq()?;
        debug!(context = %id, cursor, "Created context");

        Ok(Self {
            id,
            store,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            cursor: Mutex::new(cursor),
        })
    }

    /// This context's id.
    #[must_use]
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Register a listener for events on `key`, or on every key when `None`.
    pub fn add_listener(
        &self,
        key: Option<&str>,
        callback: impl Fn(&StorageEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.registrations().push(Registration {
            id,
            key: key.map(ToString::to_string),
            callback: Arc::new(callback),
        });
        trace!(context = %self.id, listener = id.0, "Added listener");
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations();
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        before != registrations.len()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registrations().len()
    }

    /// Number of listeners registered for exactly `key`.
    #[must_use]
    pub fn listener_count_for(&self, key: &str) -> usize {
        self.registrations()
            .iter()
            .filter(|registration| registration.key.as_deref() == Some(key))
            .count()
    }

    /// Deliver `event` to every listener registered for its key, in
    /// registration order, before returning.
    ///
    /// Returns how many listeners received it. Listeners may dispatch or
    /// unregister from inside their callback.
    pub fn dispatch(&self, event: &StorageEvent) -> usize {
        let matching: Vec<Listener> = self
            .registrations()
            .iter()
            .filter(|registration| {
                registration
                    .key
                    .as_deref()
                    .map_or(true, |key| key == event.key)
            })
            .map(|registration| Arc::clone(&registration.callback))
            .collect();

        for callback in &matching {
            callback(event);
        }
        matching.len()
    }

    /// Dispatch every change other contexts made since the last pump.
    ///
    /// Returns the number of events dispatched. Listeners must not call
    /// `pump` themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read. Records read
    /// before the failure stay consumed.
    pub fn pump(&self) -> Result<usize> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let mut dispatched = 0;

        loop {
            let batch = self.store.changes_since(*cursor, PUMP_BATCH)?;
            let batch_len = batch.len();

            for change in batch {
                *cursor = change.seq;
                if change.origin == self.id {
                    continue;
                }
                self.dispatch(&change.into_event());
                dispatched += 1;
            }

            if batch_len < PUMP_BATCH {
                break;
            }
        }

        if dispatched > 0 {
            debug!(context = %self.id, dispatched, cursor = *cursor, "Pumped foreign changes");
        }
        Ok(dispatched)
    }

    /// Run [`Context::pump`] every `interval` on the tokio runtime.
    ///
    /// Must be called from within a tokio runtime. The feed stops when the
    /// returned handle is stopped or dropped.
    #[must_use]
    pub fn spawn_change_feed(self: &Arc<Self>, interval: Duration) -> ChangeFeedHandle {
        let context = Arc::clone(self);
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop_signal);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if stopped.load(Ordering::SeqCst) {
                    break;
                }

                let pumping = Arc::clone(&context);
                match tokio::task::spawn_blocking(move || pumping.pump()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if e.is_store_unavailable() => {
                        warn!(context = %context.id, "Store gone, stopping change feed: {e}");
                        break;
                    }
                    Ok(Err(e)) => warn!(context = %context.id, "Change feed poll failed: {e}"),
                    Err(e) => {
                        warn!(context = %context.id, "Change feed task failed: {e}");
                        break;
                    }
                }
            }
            debug!(context = %context.id, "Change feed stopped");
        });

        ChangeFeedHandle {
            stop_signal,
            task,
        }
    }

    /// Run `f` with no pump running in this context.
    ///
    /// Changes recorded meanwhile are delivered by the next pump, after `f`
    /// has returned. `f` must not pump.
    pub fn with_pump_held<R>(&self, f: impl FnOnce() -> R) -> R {
        let _cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn registrations(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running change feed.
#[derive(Debug)]
pub struct ChangeFeedHandle {
    stop_signal: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ChangeFeedHandle {
    /// Stop the feed. No events are dispatched by it afterward.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Whether the feed task has exited, on request or because the store
    /// became unavailable.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ChangeFeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
