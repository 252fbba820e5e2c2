//! Index and storage maintenance around a bulk import
//!
//! Before streaming starts the secondary indexes are dropped so inserts only
//! touch the table itself. Once every batch is loaded they are rebuilt in one
//! pass, optionally after the store has been compacted.

use crate::db::schema::{self, keys, RECORDS_TABLE};
use crate::error::{DbError, DbResult};
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::System;
use tracing::{debug, info, warn};

/// Sort buffer used when total memory cannot be determined
pub const FALLBACK_SORT_BUFFER_BYTES: u64 = 512 * 1024 * 1024;

/// Operations on the target table that bracket an import
pub trait TableMaintenance: Send {
    /// Fail unless the target table exists and can be written
    fn check_available(&self) -> DbResult<()>;

    /// Drop secondary indexes ahead of bulk loading
    fn disable_indexes(&self) -> DbResult<()>;

    /// Recreate secondary indexes
    fn rebuild_indexes(&self, sort_buffer_bytes: u64, tmp_dir: Option<&Path>) -> DbResult<()>;

    /// Compact the store; the table must be quiescent and unindexed
    fn compress(&self, tmp_dir: Option<&Path>) -> DbResult<()>;

    /// Record the import status in the store's metadata
    fn record_status(&self, status: &str) -> DbResult<()>;
}

/// Maintenance for a SQLite store
#[derive(Debug, Clone)]
pub struct SqliteMaintenance {
    store: PathBuf,
}

impl SqliteMaintenance {
    pub fn new(store: &Path) -> Self {
        Self {
            store: store.to_path_buf(),
        }
    }

    fn connection(&self, tmp_dir: Option<&Path>) -> DbResult<rusqlite::Connection> {
        let conn = schema::open_for_write(&self.store)?;
        if let Some(dir) = tmp_dir {
            let dir = dir.to_str().ok_or_else(|| {
                DbError::Maintenance(format!("temporary directory '{}' is not UTF-8", dir.display()))
            })?;
            conn.execute_batch(&format!(
                "PRAGMA temp_store = FILE; PRAGMA temp_store_directory = '{}';",
                dir.replace('\'', "''")
            ))?;
        }
        Ok(conn)
    }
}

impl TableMaintenance for SqliteMaintenance {
    fn check_available(&self) -> DbResult<()> {
        let conn = schema::open_for_write(&self.store)?;
        schema::require_table(&conn, RECORDS_TABLE)?;
        if conn.is_readonly(rusqlite::DatabaseName::Main)? {
            return Err(DbError::Maintenance(format!(
                "store '{}' is read-only",
                self.store.display()
            )));
        }
        Ok(())
    }

    fn disable_indexes(&self) -> DbResult<()> {
        let conn = schema::open_for_write(&self.store)?;
        schema::drop_indexes(&conn)?;
        info!(store = %self.store.display(), "Disabled record indexes");
        Ok(())
    }

    fn rebuild_indexes(&self, sort_buffer_bytes: u64, tmp_dir: Option<&Path>) -> DbResult<()> {
        let start = Instant::now();
        let conn = self.connection(tmp_dir)?;

        // Negative cache_size is in KiB
        let kib = (sort_buffer_bytes / 1024).max(1);
        conn.execute_batch(&format!("PRAGMA cache_size = -{};", kib))?;
        debug!(sort_buffer_kib = kib, "Sort buffer configured");

        schema::create_indexes(&conn)?;
        schema::optimize_for_reads(&conn)?;

        info!(
            store = %self.store.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rebuilt record indexes"
        );
        Ok(())
    }

    fn compress(&self, tmp_dir: Option<&Path>) -> DbResult<()> {
        let start = Instant::now();
        let conn = self.connection(tmp_dir)?;

        conn.execute_batch("VACUUM;")
            .map_err(|e| DbError::Maintenance(format!("VACUUM failed: {}", e)))?;
        schema::set_metadata(&conn, keys::COMPRESSED, "true")?;

        info!(
            store = %self.store.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Compacted store"
        );
        Ok(())
    }

    fn record_status(&self, status: &str) -> DbResult<()> {
        let conn = schema::open_for_write(&self.store)?;
        schema::set_metadata(&conn, keys::STATUS, status)?;
        schema::set_metadata(&conn, keys::WRITER_VERSION, env!("CARGO_PKG_VERSION"))?;

        let now = chrono::Local::now().to_rfc3339();
        let key = if status == "importing" {
            keys::LAST_IMPORT_START
        } else {
            keys::LAST_IMPORT_END
        };
        schema::set_metadata(&conn, key, &now)?;
        Ok(())
    }
}

/// Sort buffer for index rebuilds: a quarter of physical memory
pub fn default_sort_buffer_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();

    match sys.total_memory() {
        0 => {
            warn!(
                fallback_mib = FALLBACK_SORT_BUFFER_BYTES / (1024 * 1024),
                "Could not detect total memory, using fallback sort buffer"
            );
            FALLBACK_SORT_BUFFER_BYTES
        }
        total => total / 4,
    }
}
