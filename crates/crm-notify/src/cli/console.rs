//! Terminal stand-ins for the front end's toast and router.

use std::sync::Arc;

use tracing::info;

use crate::ack::{Acknowledgment, Navigator, Presenter};

/// Prints acknowledgments to stdout.
///
/// With a navigator attached, each acknowledgment's action is activated
/// right after it is printed.
#[derive(Default)]
pub struct ConsolePresenter {
    auto_open: Option<Arc<dyn Navigator>>,
}

impl std::fmt::Debug for ConsolePresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolePresenter")
            .field("auto_open", &self.auto_open.is_some())
            .finish()
    }
}

impl ConsolePresenter {
    /// Presenter that only prints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Presenter that prints, then follows each action with `navigator`.
    #[must_use]
    pub fn auto_open(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            auto_open: Some(navigator),
        }
    }

    /// Render one acknowledgment as a single line.
    #[must_use]
    pub fn render(ack: &Acknowledgment) -> String {
        match &ack.action {
            Some(action) => format!("{}  [{} -> {}]", ack.message, action.label, action.path),
            None => ack.message.clone(),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn present(&self, ack: Acknowledgment) {
        println!("{}", Self::render(&ack));
        if let Some(navigator) = &self.auto_open {
            ack.activate(navigator.as_ref());
        }
    }
}

/// Prints navigation requests instead of routing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, path: &str) {
        info!(path, "Navigating");
        println!("open {path}");
    }
}
