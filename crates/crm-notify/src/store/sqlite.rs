use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use super::{migrations, ChangeRecord, KeySnapshot, KeyValueStore, StoreStats};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::ContextId;

/// Default time a writer waits on a database locked by another process.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite`-backed [`KeyValueStore`].
///
/// Any number of processes may open the same file; each mutation runs in an
/// immediate transaction so the value table and the change log stay in step.
#[derive(Debug)]
pub struct SqliteStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
    /// Byte quota for keys and values together.
    quota: Option<u64>,
    /// Change records kept after each write.
    max_changes: Option<usize>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        // WAL lets readers in other processes proceed while one writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            quota: None,
            max_changes: None,
        })
    }

    /// Create an in-memory store.
    ///
    /// Contexts in the same process can share it through an `Arc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
            quota: None,
            max_changes: None,
        })
    }

    /// Open the store described by `config`, applying its quota, busy
    /// timeout, and change log retention.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or pruned.
    pub fn from_config(config: &Config) -> Result<Self> {
        let max_changes = (config.storage.max_changes > 0).then_some(config.storage.max_changes);
        let store = Self::open(config.database_path())?
            .with_quota(config.quota())
            .with_max_changes(max_changes);
        store.set_busy_timeout(config.busy_timeout())?;

        if let Some(keep) = max_changes {
            store.prune_changes_keep_recent(keep)?;
        }

        Ok(store)
    }

    /// Keep at most `max_changes` change records, trimming the oldest on
    /// every write (`None` = unlimited).
    ///
    /// Contexts that fall further behind than this miss the trimmed
    /// changes.
    #[must_use]
    pub fn with_max_changes(mut self, max_changes: Option<usize>) -> Self {
        self.max_changes = max_changes.filter(|max| *max > 0);
        self
    }

    /// Set the byte quota for keys and values together (`None` = unlimited).
    #[must_use]
    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    /// Change how long writers wait on a database locked by another process.
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be applied.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.lock()?.busy_timeout(timeout)?;
        Ok(())
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List every key currently held, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Prune the change log to keep only the most recent N records.
    ///
    /// Returns the number of records deleted. Sequence numbers are never
    /// reused, so cursors held by running contexts stay valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_changes_keep_recent(&self, keep_count: usize) -> Result<usize> {
        let keep_i64 = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let affected = self.lock()?.execute(
            r"
            DELETE FROM kv_changes WHERE seq NOT IN (
                SELECT seq FROM kv_changes ORDER BY seq DESC LIMIT ?1
            )
            ",
            [keep_i64],
        )?;

        if affected > 0 {
            info!("Pruned {} change records to keep {} recent", affected, keep_count);
        }
        Ok(affected)
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let key_count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        let change_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM kv_changes", [], |row| row.get(0))?;
        let latest_seq = Self::max_seq(&conn)?;
        let used_bytes = Self::used_bytes(&conn, None)?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            key_count,
            change_count,
            latest_seq,
            used_bytes,
            db_size_bytes,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::store_unavailable("store connection lock poisoned"))
    }

    fn current_value(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn max_seq(conn: &Connection) -> Result<i64> {
        let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM kv_changes", [], |row| {
            row.get(0)
        })?;
        Ok(seq)
    }

    /// Bytes held by keys and values, optionally leaving one key out.
    fn used_bytes(conn: &Connection, excluding: Option<&str>) -> Result<u64> {
        let used: i64 = conn.query_row(
            r"
            SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
            FROM kv WHERE key IS NOT ?1
            ",
            [excluding],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(used).unwrap_or(0))
    }

    fn check_quota(&self, conn: &Connection, key: &str, value: &str) -> Result<()> {
        let Some(quota) = self.quota else {
            return Ok(());
        };

        let needed = Self::used_bytes(conn, Some(key))?
            .saturating_add(byte_len(key))
            .saturating_add(byte_len(value));

        if needed > quota {
            warn!(key, needed, quota, "Write rejected by storage quota");
            return Err(Error::QuotaExceeded {
                key: key.to_string(),
                needed,
                quota,
            });
        }
        Ok(())
    }

    fn append_change(
        &self,
        conn: &Connection,
        key: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
        origin: &ContextId,
    ) -> Result<()> {
        conn.execute(
            r"
            INSERT INTO kv_changes (key, old_value, new_value, origin, changed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                key,
                old_value,
                new_value,
                origin.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;

        if let Some(max) = self.max_changes {
            let keep = i64::try_from(max).unwrap_or(i64::MAX);
            let oldest_kept = conn.last_insert_rowid().saturating_sub(keep);
            conn.execute("DELETE FROM kv_changes WHERE seq <= ?1", [oldest_kept])?;
        }
        Ok(())
    }

    fn row_to_change(row: &rusqlite::Row) -> rusqlite::Result<ChangeRecord> {
        let changed_at_str: String = row.get(5)?;
        let changed_at = DateTime::parse_from_rfc3339(&changed_at_str)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

        Ok(ChangeRecord {
            seq: row.get(0)?,
            key: row.get(1)?,
            old_value: row.get(2)?,
            new_value: row.get(3)?,
            origin: ContextId::from_raw(row.get::<_, String>(4)?),
            changed_at,
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Self::current_value(&conn, key)
    }

    fn snapshot(&self, key: &str) -> Result<KeySnapshot> {
        let conn = self.lock()?;
        // One statement reads both from the same database snapshot
        let snapshot = conn.query_row(
            r"
            SELECT (SELECT value FROM kv WHERE key = ?1),
                   (SELECT COALESCE(MAX(seq), 0) FROM kv_changes)
            ",
            [key],
            |row| {
                Ok(KeySnapshot {
                    value: row.get(0)?,
                    head: row.get(1)?,
                })
            },
        )?;
        Ok(snapshot)
    }

    fn set(&self, key: &str, value: &str, origin: &ContextId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        self.check_quota(&tx, key, value)?;
        let old_value = Self::current_value(&tx, key)?;

        tx.execute(
            r"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        self.append_change(&tx, key, old_value.as_deref(), Some(value), origin)?;
        tx.commit()?;

        debug!(key, origin = %origin, "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str, origin: &ContextId) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(old_value) = Self::current_value(&tx, key)? else {
            return Ok(false);
        };

        tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        self.append_change(&tx, key, Some(&old_value), None, origin)?;
        tx.commit()?;

        debug!(key, origin = %origin, "Removed value");
        Ok(true)
    }

    fn compare_and_remove(&self, key: &str, expected: &str, origin: &ContextId) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let affected = tx.execute(
            "DELETE FROM kv WHERE key = ?1 AND value = ?2",
            params![key, expected],
        )?;
        if affected == 0 {
            return Ok(false);
        }

        self.append_change(&tx, key, Some(expected), None, origin)?;
        tx.commit()?;

        debug!(key, origin = %origin, "Consumed value");
        Ok(true)
    }

    fn changes_since(&self, after: i64, limit: usize) -> Result<Vec<ChangeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT seq, key, old_value, new_value, origin, changed_at
            FROM kv_changes WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let changes = stmt
            .query_map(params![after, limit_i64], Self::row_to_change)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    fn latest_seq(&self) -> Result<i64> {
        let conn = self.lock()?;
        Self::max_seq(&conn)
    }
}

fn byte_len(s: &str) -> u64 {
    u64::try_from(s.len()).unwrap_or(u64::MAX)
}
