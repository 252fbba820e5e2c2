//! Bulk loading of batch files into a store
//!
//! A batch file is tab-separated, one record per line, with the columns of
//! [`BATCH_COLUMNS`]. Loading happens inside a single immediate transaction
//! with a cached prepared statement. The file is deleted only after the
//! commit succeeds; on any failure the transaction rolls back and the file
//! stays put for inspection.

use crate::db::schema::{self, RECORDS_TABLE};
use crate::error::{DbError, LoadError, LoadResult};
use crate::record::{unescape_field, BATCH_COLUMNS};
use rusqlite::{params, TransactionBehavior};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Loads a batch file into the target table
pub trait BulkLoader: Send + Sync {
    /// Load every row of `path`, remove the file, and return the row count
    fn load_file(&self, path: &Path) -> LoadResult<u64>;
}

/// Loads batch files into the `records` table of a SQLite store
#[derive(Debug, Clone)]
pub struct SqliteLoader {
    store: PathBuf,
}

impl SqliteLoader {
    /// Create a loader for an initialised store
    pub fn new(store: &Path) -> Result<Self, DbError> {
        let conn = schema::open_for_write(store)?;
        schema::require_table(&conn, RECORDS_TABLE)?;
        Ok(Self {
            store: store.to_path_buf(),
        })
    }

    /// Path of the target store
    pub fn store(&self) -> &Path {
        &self.store
    }

    fn insert_rows(&self, path: &Path) -> LoadResult<u64> {
        let db_err = |e: rusqlite::Error| LoadError::Database {
            path: path.to_path_buf(),
            source: DbError::Sqlite(e),
        };

        let file = File::open(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::with_capacity(1024 * 1024, file);

        let mut conn = schema::open_for_write(&self.store).map_err(|source| LoadError::Database {
            path: path.to_path_buf(),
            source,
        })?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let mut rows = 0u64;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO records (source_id, username, email_rev, hash, password, extra)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;

            for (idx, line) in reader.lines().enumerate() {
                let line = line.map_err(|source| LoadError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                if line.is_empty() {
                    continue;
                }

                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() != BATCH_COLUMNS.len() {
                    return Err(LoadError::MalformedRow {
                        path: path.to_path_buf(),
                        line: idx as u64 + 1,
                        expected: BATCH_COLUMNS.len(),
                        found: fields.len(),
                    });
                }

                let source_id: Option<i64> = match fields[0] {
                    "" => None,
                    raw => Some(raw.parse().map_err(|_| LoadError::InvalidSourceId {
                        path: path.to_path_buf(),
                        line: idx as u64 + 1,
                        value: raw.to_string(),
                    })?),
                };

                stmt.execute(params![
                    source_id,
                    nullable(fields[1]),
                    nullable(fields[2]),
                    nullable(fields[3]),
                    nullable(fields[4]),
                    nullable(fields[5]),
                ])
                .map_err(db_err)?;
                rows += 1;
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(rows)
    }
}

impl BulkLoader for SqliteLoader {
    fn load_file(&self, path: &Path) -> LoadResult<u64> {
        let start = Instant::now();
        let rows = self.insert_rows(path)?;

        info!(
            file = %path.display(),
            rows,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded batch file"
        );

        if let Err(e) = std::fs::remove_file(path) {
            warn!(file = %path.display(), error = %e, "Failed to remove loaded batch file");
        }
        Ok(rows)
    }
}

/// Empty batch fields are stored as NULL
fn nullable(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(unescape_field(field))
    }
}
