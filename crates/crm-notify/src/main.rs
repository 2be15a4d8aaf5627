//! `crm-notify` - CLI for the CRM notification relay
//!
//! Each invocation runs as its own execution context against the shared
//! store, so `announce` in one terminal shows up in `watch` in another.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use crm_notify::ack::Acknowledgment;
use crm_notify::cli::{
    AnnounceCommand, Cli, Command, ConfigCommand, ConsoleNavigator, ConsolePresenter,
    NotificationsCommand, WatchCommand,
};
use crm_notify::topic::RelayTopic;
use crm_notify::{
    init_logging, Config, Context, EntityAdded, Error, EventRelay, KeyValueStore,
    NotificationLog, RelaySubscriber, SqliteStore,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Announce(cmd) => handle_announce(&config, &cmd),
        Command::Watch(cmd) => {
            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            runtime.block_on(handle_watch(&config, &cmd))
        }
        Command::Notifications(cmd) => handle_notifications(&config, cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_context(config: &Config) -> anyhow::Result<(Arc<SqliteStore>, Arc<Context>)> {
    let store = Arc::new(SqliteStore::from_config(config).with_context(|| {
        format!("opening store at {}", config.database_path().display())
    })?);
    let shared: Arc<dyn KeyValueStore> = store.clone();
    let context = Arc::new(Context::new(shared)?);
    Ok((store, context))
}

fn handle_announce(config: &Config, cmd: &AnnounceCommand) -> anyhow::Result<()> {
    let (_store, context) = open_context(config)?;
    let relay = EventRelay::new(
        Arc::clone(&context),
        config.relay.clone(),
        Arc::new(ConsolePresenter::new()),
    );

    let announcement = relay.announce_created(&cmd.id, cmd.name.as_deref());
    if !announcement.accepted {
        return Err(Error::InvalidEntityId.into());
    }
    if announcement.quota_exceeded {
        eprintln!("warning: store is over its quota; other windows will not see this record");
    } else if !announcement.persisted {
        eprintln!("warning: announcement was not stored; other windows will not see it");
    }

    if cmd.record {
        let record = EntityAdded::new(cmd.id.clone(), cmd.name.as_deref());
        let message = Acknowledgment::entity_added(&record, &config.relay).message;
        let mut log = NotificationLog::load(&context, &config.notifications);
        if !log.add_notification(message) {
            eprintln!("warning: notification log was not saved");
        }
    }
    Ok(())
}

async fn handle_watch(config: &Config, cmd: &WatchCommand) -> anyhow::Result<()> {
    let (_store, context) = open_context(config)?;

    let presenter = if cmd.open {
        ConsolePresenter::auto_open(Arc::new(ConsoleNavigator))
    } else {
        ConsolePresenter::new()
    };
    let subscriber =
        RelaySubscriber::mount(Arc::clone(&context), &config.relay, Arc::new(presenter));

    let interval = cmd
        .interval_ms
        .filter(|ms| *ms > 0)
        .map_or_else(|| config.poll_interval(), Duration::from_millis);
    let feed = context.spawn_change_feed(interval);

    eprintln!(
        "Watching {} for new records every {}ms (Ctrl-C to stop)",
        config.database_path().display(),
        interval.as_millis()
    );
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    feed.stop();
    subscriber.unmount();
    Ok(())
}

fn handle_notifications(config: &Config, cmd: NotificationsCommand) -> anyhow::Result<()> {
    let (_store, context) = open_context(config)?;
    let mut log = NotificationLog::load(&context, &config.notifications);

    match cmd {
        NotificationsCommand::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(log.entries())?);
            } else if log.is_empty() {
                println!("No notifications.");
            } else {
                for entry in log.entries() {
                    println!("- {entry}");
                }
            }
        }
        NotificationsCommand::Add { message } => {
            if !log.add_notification(message) {
                anyhow::bail!("notification was not saved");
            }
            println!("{} notification(s)", log.len());
        }
        NotificationsCommand::Clear => {
            if !log.clear_notifications() {
                anyhow::bail!("notification log was not cleared in the store");
            }
            println!("Notifications cleared.");
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let (store, context) = open_context(config)?;
    let stats = store.stats()?;
    let keys = store.keys()?;
    let topic: RelayTopic<EntityAdded> =
        RelayTopic::new(Arc::clone(&context), config.relay.key.clone());
    let pending_raw = topic.peek_pending()?;
    let pending = pending_raw
        .as_deref()
        .map(RelayTopic::<EntityAdded>::parse);
    let notifications = NotificationLog::load(&context, &config.notifications);

    if json {
        let pending_json = match &pending {
            Some(Ok(record)) => serde_json::to_value(record)?,
            Some(Err(_)) => serde_json::json!({ "malformed": pending_raw }),
            None => serde_json::Value::Null,
        };
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "pending": pending_json,
            "notifications": notifications.len(),
            "keys": keys,
            "changes": stats.change_count,
            "latest_seq": stats.latest_seq,
            "used_bytes": stats.used_bytes,
            "quota_bytes": config.quota(),
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("crm-notify status");
        println!("-----------------");
        println!("Store:          {}", config.database_path().display());
        match &pending {
            Some(Ok(record)) => println!(
                "Pending:        {} ({})",
                record.entity_id,
                record.label(&config.relay.fallback_label)
            ),
            Some(Err(e)) => println!("Pending:        malformed ({e})"),
            None => println!("Pending:        none"),
        }
        println!("Notifications:  {}", notifications.len());
        println!("Keys:           {} ({})", stats.key_count, keys.join(", "));
        println!("Change records: {} (latest seq {})", stats.change_count, stats.latest_seq);
        match config.quota() {
            Some(quota) => println!("Used bytes:     {} of {quota}", stats.used_bytes),
            None => println!("Used bytes:     {} (no quota)", stats.used_bytes),
        }
        println!("File size:      {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Quota (bytes):      {}", config.storage.quota_bytes);
                println!("  Max changes:        {}", config.storage.max_changes);
                println!("  Busy timeout (ms):  {}", config.storage.busy_timeout_ms);
                println!();
                println!("[Relay]");
                println!("  Key:                {}", config.relay.key);
                println!("  Detail path:        {}", config.relay.detail_path);
                println!("  Fallback label:     {}", config.relay.fallback_label);
                println!("  Action label:       {}", config.relay.action_label);
                println!("  Poll interval (ms): {}", config.relay.poll_interval_ms);
                println!();
                println!("[Notifications]");
                println!("  Key:                {}", config.notifications.key);
                println!("  Max entries:        {}", config.notifications.max_entries);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
