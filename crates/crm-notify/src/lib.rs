//! `crm-notify` - Cross-context notification relay for a CRM front end
//!
//! When a creation flow saves a new record, [`EventRelay`] announces it.
//! Every running context with a mounted [`RelaySubscriber`] shows an
//! acknowledgment linking to the record, and so does the first context to
//! start afterward. All contexts share one persistent [`KeyValueStore`].
//! [`NotificationLog`] keeps a separate, durable list of messages.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod ack;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod logging;
pub mod notifications;
pub mod relay;
pub mod store;
pub mod subscriber;
pub mod topic;

pub use ack::{Acknowledgment, Navigator, Presenter};
pub use config::Config;
pub use context::{ChangeFeedHandle, Context};
pub use error::{Error, Result};
pub use event::{ContextId, EntityAdded, StorageEvent};
pub use logging::init_logging;
pub use notifications::NotificationLog;
pub use relay::{Announcement, EventRelay};
pub use store::{KeySnapshot, KeyValueStore, SqliteStore, StoreStats};
pub use subscriber::{RelaySubscriber, SubscriberState};
