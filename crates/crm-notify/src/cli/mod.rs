//! Command-line interface for crm-notify.
//!
//! This module provides the CLI structure for the `crm-notify` binary.

mod commands;
mod console;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AnnounceCommand, ConfigCommand, NotificationsCommand, StatusCommand, WatchCommand,
};
pub use console::{ConsoleNavigator, ConsolePresenter};

/// crm-notify - Relay "record created" notifications between CRM windows
///
/// Announces newly created records so every open window acknowledges them,
/// and keeps a durable log of notifications.
#[derive(Debug, Parser)]
#[command(name = "crm-notify")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Announce that a record was created
    Announce(AnnounceCommand),

    /// Show acknowledgments for records created in other windows
    Watch(WatchCommand),

    /// Manage the notification log
    #[command(subcommand)]
    Notifications(NotificationsCommand),

    /// Show store status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
