//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Announce command arguments.
#[derive(Debug, Args)]
pub struct AnnounceCommand {
    /// Identifier of the created record
    pub id: String,

    /// Display name of the created record
    #[arg(short, long)]
    pub name: Option<String>,

    /// Also add the acknowledgment text to the notification log
    #[arg(long)]
    pub record: bool,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Change feed poll interval in milliseconds (overrides config)
    #[arg(short, long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Activate each acknowledgment's action as soon as it is shown
    #[arg(long)]
    pub open: bool,
}

/// Notification log commands.
#[derive(Debug, Subcommand)]
pub enum NotificationsCommand {
    /// List notifications, newest first
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Add a notification
    Add {
        /// Notification text
        message: String,
    },

    /// Remove all notifications
    Clear,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
