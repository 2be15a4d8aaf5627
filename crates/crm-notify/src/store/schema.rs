//! `SQLite` schema definitions for the persistent store.

/// Current values, one row per key.
pub const CREATE_KV_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Ordered log of every mutation, read by the change feed.
pub const CREATE_CHANGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS kv_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    origin TEXT NOT NULL,
    changed_at TEXT NOT NULL
)
";

/// Index on `key` so per-key history stays cheap as the log grows.
pub const CREATE_CHANGES_KEY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_kv_changes_key ON kv_changes(key)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_KV_TABLE,
    CREATE_CHANGES_TABLE,
    CREATE_CHANGES_KEY_INDEX,
    CREATE_METADATA_TABLE,
];
