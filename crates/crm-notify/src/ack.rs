//! Transient acknowledgments ("toasts") and the UI seams that show them.
//!
//! The crate never renders anything itself. A [`Presenter`] shows an
//! [`Acknowledgment`]; when the user activates its action, the presenter
//! calls [`Acknowledgment::activate`] with a [`Navigator`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::RelayConfig;
use crate::event::EntityAdded;

/// A transient message with an optional navigation action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Text shown to the user.
    pub message: String,
    /// Action offered alongside the message.
    pub action: Option<AckAction>,
}

/// Navigation action attached to an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckAction {
    /// Button label, e.g. "View".
    pub label: String,
    /// Path handed to the navigator.
    pub path: String,
}

impl Acknowledgment {
    /// Acknowledgment for a newly created entity, linking to its detail view.
    #[must_use]
    pub fn entity_added(record: &EntityAdded, relay: &RelayConfig) -> Self {
        let label = record.label(&relay.fallback_label);
        Self {
            message: format!("{label} has been added"),
            action: Some(AckAction {
                label: relay.action_label.clone(),
                path: relay.detail_path_for(&record.entity_id),
            }),
        }
    }

    /// Run the action through `navigator`. Returns `false` without an action.
    pub fn activate(&self, navigator: &dyn Navigator) -> bool {
        match &self.action {
            Some(action) => {
                navigator.navigate(&action.path);
                true
            }
            None => false,
        }
    }
}

/// Shows acknowledgments to the user.
pub trait Presenter: Send + Sync {
    /// Show `ack`. Must not block.
    fn present(&self, ack: Acknowledgment);
}

/// Goes to a path inside the application.
pub trait Navigator: Send + Sync {
    /// Navigate to `path`.
    fn navigate(&self, path: &str);
}

/// Presenter that keeps everything it was asked to show.
///
/// Used by tests and by headless embeddings that render acknowledgments
/// later.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<Acknowledgment>>,
}

impl RecordingPresenter {
    /// Create an empty presenter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything presented so far, oldest first.
    #[must_use]
    pub fn acknowledgments(&self) -> Vec<Acknowledgment> {
        self.shown().clone()
    }

    /// Number of acknowledgments presented so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shown().len()
    }

    /// The most recent acknowledgment.
    #[must_use]
    pub fn last(&self) -> Option<Acknowledgment> {
        self.shown().last().cloned()
    }

    fn shown(&self) -> MutexGuard<'_, Vec<Acknowledgment>> {
        self.shown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, ack: Acknowledgment) {
        self.shown().push(ack);
    }
}

/// Navigator that keeps every path it was sent to.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Create an empty navigator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every path navigated to, oldest first.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_entity_message_and_action() {
        let ack = Acknowledgment::entity_added(
            &EntityAdded::new("C010", Some("Acme")),
            &RelayConfig::default(),
        );

        assert!(ack.message.contains("Acme"));
        assert!(ack.message.contains("added"));

        let navigator = RecordingNavigator::new();
        assert!(ack.activate(&navigator));
        assert_eq!(navigator.paths(), vec!["/customers/C010"]);
    }

    #[test]
    fn test_unnamed_entity_uses_fallback() {
        let ack =
            Acknowledgment::entity_added(&EntityAdded::new("C011", None), &RelayConfig::default());

        assert!(ack.message.contains("New customer"));
        assert!(!ack.message.contains("undefined"));
        assert!(!ack.message.contains("None"));
    }

    #[test]
    fn test_custom_relay_settings() {
        let relay = RelayConfig {
            detail_path: "/sales/{id}/overview".to_string(),
            fallback_label: "New sale".to_string(),
            action_label: "Open".to_string(),
            ..RelayConfig::default()
        };
        let ack = Acknowledgment::entity_added(&EntityAdded::new("S7", None), &relay);

        assert_eq!(ack.message, "New sale has been added");
        let action = ack.action.unwrap();
        assert_eq!(action.label, "Open");
        assert_eq!(action.path, "/sales/S7/overview");
    }

    #[test]
    fn test_activate_without_action() {
        let ack = Acknowledgment {
            message: "Saved".to_string(),
            action: None,
        };
        let navigator = RecordingNavigator::new();

        assert!(!ack.activate(&navigator));
        assert!(navigator.paths().is_empty());
    }

    #[test]
    fn test_recording_presenter() {
        let presenter = RecordingPresenter::new();
        assert_eq!(presenter.count(), 0);
        assert!(presenter.last().is_none());

        presenter.present(Acknowledgment {
            message: "one".to_string(),
            action: None,
        });
        presenter.present(Acknowledgment {
            message: "two".to_string(),
            action: None,
        });

        assert_eq!(presenter.count(), 2);
        assert_eq!(presenter.last().unwrap().message, "two");
        assert_eq!(presenter.acknowledgments()[0].message, "one");
    }
}
