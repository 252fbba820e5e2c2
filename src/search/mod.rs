//! Concurrent search across many stores
//!
//! One predicate is run against every store at once, one scoped thread per
//! store. Rows travel over a bounded channel to the calling thread, which is
//! the only writer of the output, so records are never interleaved
//! mid-line. The order between stores is unspecified.
//!
//! ```text
//!   store A ──► thread ──┐
//!   store B ──► thread ──┼──► channel ──► formatter ──► output
//!   store C ──► thread ──┘
//! ```
//!
//! A store that fails to open or query is reported in the [`SearchReport`];
//! the other stores still run to completion.

pub mod format;
pub mod predicate;

pub use format::{JsonLinesFormatter, OutputFormat, RecordFormatter, TextFormatter};

use crate::db::interner::UNKNOWN_SOURCE;
use crate::db::{schema, SourceInterner};
use crate::error::{ConfigError, Result, SearchError};
use crossbeam_channel::{bounded, Sender};
use rusqlite::types::Value;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Rows buffered between store threads and the output
const ROW_CHANNEL_SIZE: usize = 4096;

/// Columns a search can return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    SourceId,
    /// Source label, resolved through the sources store
    Source,
    Username,
    /// Derived from `email_rev`
    Email,
    EmailRev,
    Hash,
    Password,
    Extra,
}

impl Column {
    pub const ALL: &'static [Column] = &[
        Column::Id,
        Column::SourceId,
        Column::Source,
        Column::Username,
        Column::Email,
        Column::EmailRev,
        Column::Hash,
        Column::Password,
        Column::Extra,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::SourceId => "source_id",
            Column::Source => "source",
            Column::Username => "username",
            Column::Email => "email",
            Column::EmailRev => "email_rev",
            Column::Hash => "hash",
            Column::Password => "password",
            Column::Extra => "extra",
        }
    }

    /// Select expression against the records table
    fn select_expr(self) -> &'static str {
        match self {
            Column::Email => "reverse(email_rev)",
            Column::Source => "source_id",
            other => other.name(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownColumn {
                name: wanted.to_string(),
                valid: Column::ALL.iter().map(|c| c.name()).collect::<Vec<_>>().join(", "),
            })
    }
}

/// Per-store result of a search
#[derive(Debug)]
pub struct StoreOutcome {
    pub store: String,
    pub rows: u64,
    pub error: Option<SearchError>,
    pub elapsed: Duration,
}

/// Result of a whole search
#[derive(Debug, Default)]
pub struct SearchReport {
    pub rows: u64,
    pub stores: Vec<StoreOutcome>,
    pub elapsed: Duration,
}

impl SearchReport {
    pub fn failures(&self) -> impl Iterator<Item = &StoreOutcome> {
        self.stores.iter().filter(|s| s.error.is_some())
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }
}

enum Message {
    Row(Vec<Option<String>>),
    Finished(StoreOutcome),
}

/// Runs one predicate against many stores
pub struct SearchFanout {
    interner: Option<Arc<SourceInterner>>,
}

impl SearchFanout {
    /// Fan-out without source resolution
    pub fn new() -> Self {
        Self { interner: None }
    }

    /// Fan-out that resolves the `source` column through `interner`
    pub fn with_sources(interner: Arc<SourceInterner>) -> Self {
        Self {
            interner: Some(interner),
        }
    }

    /// Search every store and write each matching record to `out`
    ///
    /// Configuration problems fail before any store is opened. Per-store
    /// failures land in the report; only an output error aborts the search.
    pub fn search(
        &self,
        stores: &[String],
        predicate: &str,
        columns: &[Column],
        formatter: &dyn RecordFormatter,
        out: &mut dyn Write,
    ) -> Result<SearchReport> {
        let sql = self.build_query(stores, predicate, columns)?;
        debug!(sql = %sql, stores = stores.len(), "Search query");

        let start = Instant::now();
        let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
        let mut report = SearchReport::default();

        let outcome: std::result::Result<(), SearchError> = thread::scope(|scope| {
            let (tx, rx) = bounded::<Message>(ROW_CHANNEL_SIZE);

            for store in stores {
                let tx = tx.clone();
                let sql = sql.as_str();
                let sources = self.interner.as_deref();
                let builder = thread::Builder::new().name(format!("search-{}", store_label(store)));
                let spawned = builder.spawn_scoped(scope, move || {
                    let started = Instant::now();
                    let (rows, error) = match Self::query_store(store, sql, columns, sources, &tx) {
                        Ok(rows) => (rows, None),
                        Err((rows, e)) => (rows, Some(e)),
                    };
                    let _ = tx.send(Message::Finished(StoreOutcome {
                        store: store.clone(),
                        rows,
                        error,
                        elapsed: started.elapsed(),
                    }));
                });
                if let Err(e) = spawned {
                    report.stores.push(StoreOutcome {
                        store: store.clone(),
                        rows: 0,
                        error: Some(SearchError::Query {
                            store: store.clone(),
                            reason: format!("failed to spawn search thread: {}", e),
                        }),
                        elapsed: Duration::ZERO,
                    });
                }
            }
            drop(tx);

            for message in rx.iter() {
                match message {
                    Message::Row(values) => {
                        // Dropping the receiver on error stops the store threads
                        formatter.write_record(&mut *out, &names, &values)?;
                        report.rows += 1;
                    }
                    Message::Finished(outcome) => report.stores.push(outcome),
                }
            }
            out.flush()?;
            Ok(())
        });
        outcome?;

        report.elapsed = start.elapsed();
        for failure in report.failures() {
            if let Some(e) = &failure.error {
                warn!(store = %failure.store, error = %e, "Store search failed");
            }
        }
        info!(
            rows = report.rows,
            stores = report.stores.len(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Search finished"
        );
        Ok(report)
    }

    fn build_query(&self, stores: &[String], predicate: &str, columns: &[Column]) -> Result<String> {
        if stores.is_empty() {
            return Err(ConfigError::NoStores.into());
        }
        if columns.is_empty() {
            return Err(ConfigError::InvalidQuery("no columns selected".to_string()).into());
        }
        if columns.contains(&Column::Source) && self.interner.is_none() {
            return Err(ConfigError::SourcesStoreRequired.into());
        }
        if predicate.trim().is_empty() {
            return Err(ConfigError::InvalidQuery("predicate is empty".to_string()).into());
        }

        let rewritten = predicate::rewrite(predicate)?;
        let select: Vec<&str> = columns.iter().map(|c| c.select_expr()).collect();
        Ok(format!(
            "SELECT {} FROM {} WHERE {}",
            select.join(", "),
            schema::RECORDS_TABLE,
            rewritten
        ))
    }

    /// Stream one store's matches into `tx`; the error carries rows sent so far
    ///
    /// `sources` is present whenever `columns` holds [`Column::Source`].
    fn query_store(
        store: &str,
        sql: &str,
        columns: &[Column],
        sources: Option<&SourceInterner>,
        tx: &Sender<Message>,
    ) -> std::result::Result<u64, (u64, SearchError)> {
        let query_err = |rows: u64, reason: String| {
            (
                rows,
                SearchError::Query {
                    store: store.to_string(),
                    reason,
                },
            )
        };

        let conn = schema::open_for_read(Path::new(store)).map_err(|e| {
            (
                0,
                SearchError::Connect {
                    store: store.to_string(),
                    reason: e.to_string(),
                },
            )
        })?;

        let mut stmt = conn.prepare(sql).map_err(|e| query_err(0, e.to_string()))?;
        let mut rows = stmt.query([]).map_err(|e| query_err(0, e.to_string()))?;
        let mut sent = 0u64;

        while let Some(row) = rows.next().map_err(|e| query_err(sent, e.to_string()))? {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let value: Value = row.get(idx).map_err(|e| query_err(sent, e.to_string()))?;
                let value = match (column, value, sources) {
                    (Column::Source, Value::Integer(id), Some(sources)) => Some(
                        sources
                            .resolve_name(id)
                            .map_err(|e| query_err(sent, e.to_string()))?,
                    ),
                    (Column::Source, Value::Null, _) => Some(UNKNOWN_SOURCE.to_string()),
                    (_, value, _) => value_to_string(value),
                };
                values.push(value);
            }

            if tx.send(Message::Row(values)).is_err() {
                // Output side gave up
                break;
            }
            sent += 1;
        }

        Ok(sent)
    }
}

impl Default for SearchFanout {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}

/// Short thread-name-friendly label for a store path
fn store_label(store: &str) -> String {
    Path::new(store)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| store.to_string())
}
