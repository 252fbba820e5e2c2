//! Database schema definitions and creation
//!
//! This module defines the SQLite schema for a dump store and a sources
//! store, and provides functions to create, open and configure them.

use crate::error::{DbError, DbResult};
use crate::record::reverse;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// Current schema version for migrations
pub const SCHEMA_VERSION: &str = "1";

/// Main table holding records
pub const RECORDS_TABLE: &str = "records";

/// Table mapping source labels to ids
pub const SOURCES_TABLE: &str = "sources";

/// Key/value metadata table
pub const METADATA_TABLE: &str = "metadata";

/// Maximum stored length of a source label
pub const SOURCE_NAME_MAX_LEN: usize = 250;

/// How long a writer waits on a locked database before failing
///
/// A source upsert can queue behind a whole batch load on the same file.
const WRITE_BUSY_TIMEOUT: Duration = Duration::from_secs(600);

/// How long a reader waits on a locked database before failing
const READ_BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// SQL to create the main records table
///
/// Only the reversed email is stored. The logical `email` column is
/// `reverse(email_rev)`, computed at query time.
const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    source_id INTEGER,
    username TEXT,
    email_rev TEXT,               -- reversed email, the indexed search column
    hash TEXT,
    password TEXT,
    extra TEXT                    -- data without a dedicated column, e.g. password hints
)
"#;

/// SQL to create the sources table
const CREATE_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    last_updated INTEGER NOT NULL  -- Unix timestamp
)
"#;

/// SQL to create metadata table
const CREATE_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    k TEXT PRIMARY KEY,
    v TEXT
)
"#;

/// Secondary indexes on the records table (name, create statement)
pub const RECORD_INDEXES: &[(&str, &str)] = &[
    (
        "idx_records_email_rev",
        "CREATE INDEX IF NOT EXISTS idx_records_email_rev ON records(email_rev)",
    ),
    (
        "idx_records_username",
        "CREATE INDEX IF NOT EXISTS idx_records_username ON records(username)",
    ),
    (
        "idx_records_source",
        "CREATE INDEX IF NOT EXISTS idx_records_source ON records(source_id)",
    ),
];

/// SQLite pragmas for bulk-load performance
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = OFF;
PRAGMA cache_size = -128000;     -- 128MB cache
PRAGMA temp_store = MEMORY;
PRAGMA mmap_size = 536870912;    -- 512MB mmap
"#;

/// Register the `reverse(text)` SQL function on a connection
///
/// SQLite has no built-in string reversal. Every connection that touches the
/// records table gets this so `email` can be derived and predicates rewritten
/// against `email_rev`.
pub fn register_functions(conn: &Connection) -> DbResult<()> {
    conn.create_scalar_function(
        "reverse",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|s| reverse(&s)))
        },
    )?;
    Ok(())
}

/// Open a store for writing (loads, upserts, maintenance)
pub fn open_for_write(path: &Path) -> DbResult<Connection> {
    let conn = Connection::open(path).map_err(|e| DbError::OpenFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    conn.busy_timeout(WRITE_BUSY_TIMEOUT)?;
    conn.execute_batch(WRITE_PRAGMAS)?;
    register_functions(&conn)?;
    Ok(conn)
}

/// Open a store read-only (search)
pub fn open_for_read(path: &Path) -> DbResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| DbError::OpenFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    conn.busy_timeout(READ_BUSY_TIMEOUT)?;
    register_functions(&conn)?;
    Ok(conn)
}

/// Create the records and metadata tables in a dump store
pub fn create_store(conn: &Connection) -> DbResult<()> {
    conn.execute(CREATE_RECORDS_TABLE, [])?;
    conn.execute(CREATE_METADATA_TABLE, [])?;
    create_indexes(conn)?;
    Ok(())
}

/// Create the sources table in a sources store
pub fn create_sources(conn: &Connection) -> DbResult<()> {
    conn.execute(CREATE_SOURCES_TABLE, [])?;
    Ok(())
}

/// Initialise a store file: tables, indexes and version metadata
///
/// Safe to run again on an initialised store.
pub fn init_store(path: &Path, with_sources: bool) -> DbResult<()> {
    let conn = open_for_write(path)?;
    create_store(&conn)?;
    if with_sources {
        create_sources(&conn)?;
    }

    if get_metadata(&conn, keys::CREATED)?.is_none() {
        set_metadata(&conn, keys::CREATED, &chrono::Local::now().to_rfc3339())?;
    }
    set_metadata(&conn, keys::SCHEMA_VERSION, SCHEMA_VERSION)?;
    set_metadata(&conn, keys::WRITER_VERSION, env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Initialise a standalone sources store
pub fn init_sources(path: &Path) -> DbResult<()> {
    let conn = open_for_write(path)?;
    create_sources(&conn)?;
    Ok(())
}

/// Create all record indexes
pub fn create_indexes(conn: &Connection) -> DbResult<()> {
    for (_, sql) in RECORD_INDEXES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Drop all record indexes so bulk inserts skip index maintenance
pub fn drop_indexes(conn: &Connection) -> DbResult<()> {
    for (name, _) in RECORD_INDEXES {
        conn.execute(&format!("DROP INDEX IF EXISTS {}", name), [])?;
    }
    Ok(())
}

/// Refresh query planner statistics
///
/// Persists in `sqlite_stat1`, unlike per-connection pragmas.
pub fn optimize_for_reads(conn: &Connection) -> DbResult<()> {
    conn.execute("ANALYZE", [])?;
    Ok(())
}

/// Check whether a table exists
pub fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Fail unless the given table exists
pub fn require_table(conn: &Connection, table: &str) -> DbResult<()> {
    if table_exists(conn, table)? {
        Ok(())
    } else {
        Err(DbError::Schema(format!(
            "table '{}' is missing - run `dumpdb init` first",
            table
        )))
    }
}

/// Store metadata
pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (k, v) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get metadata
pub fn get_metadata(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row("SELECT v FROM metadata WHERE k = ?1", [key], |row| {
        row.get(0)
    });

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys
pub mod keys {
    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Store creation time (ISO 8601)
    pub const CREATED: &str = "created";

    /// dumpdb version that last wrote the store
    pub const WRITER_VERSION: &str = "writer_version";

    /// Import status: "importing", "completed", "interrupted"
    pub const STATUS: &str = "status";

    /// Last import start (ISO 8601)
    pub const LAST_IMPORT_START: &str = "last_import_start";

    /// Last import end (ISO 8601)
    pub const LAST_IMPORT_END: &str = "last_import_end";

    /// Set to "true" once the store has been compacted
    pub const COMPRESSED: &str = "compressed";
}
