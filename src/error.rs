//! Error types for dumpdb
//!
//! This module defines the error hierarchy for the whole tool:
//! - Configuration errors (fatal before any work starts)
//! - Per-line parse errors (logged and skipped)
//! - SQLite database errors
//! - Bulk-load errors (fatal, batch file kept for retry)
//! - Per-store search errors (isolated to the failing store)
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for dumpdb
#[derive(Error, Debug)]
pub enum DumpError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Line parsing errors that escaped the pipeline (unknown parser)
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Bulk-load errors
    #[error("Bulk load error: {0}")]
    Load(#[from] LoadError),

    /// Search errors
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// I/O errors (input files, logs, batch files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Configuration and CLI errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No parser registered under this name
    #[error("Unknown parser '{name}'. Available parsers: {available}")]
    UnknownParser { name: String, available: String },

    /// Output format not recognised
    #[error("Unknown output format '{0}': expected 'text' or 'jsonl'")]
    UnknownOutputFormat(String),

    /// Column not known to the search layer
    #[error("Unknown column '{name}'. Valid columns: {valid}")]
    UnknownColumn { name: String, valid: String },

    /// `source` column requested without a sources store
    #[error("The 'source' column requires a sources store (--sources)")]
    SourcesStoreRequired,

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Store path or connection string unusable
    #[error("Invalid store '{store}': {reason}")]
    InvalidStore { store: String, reason: String },

    /// Input path missing or not a file
    #[error("Invalid input path '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    /// Empty or otherwise unusable predicate
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No stores given to search
    #[error("At least one store is required")]
    NoStores,
}

/// Errors produced while turning one input line into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Requested parser does not exist
    #[error("The requested line parser '{0}' does not exist")]
    UnknownParser(String),

    /// Line did not split into enough columns
    #[error("Incorrect number of columns")]
    ColumnCount,

    /// Email column present but without an '@'
    #[error("Email address is missing")]
    MissingEmail,

    /// Pattern-based parser did not match
    #[error("Line did not match the expected pattern")]
    NoMatch,
}

impl ParseError {
    /// Check if this error should stop the whole run
    ///
    /// Only a missing parser is fatal; anything else is a malformed line
    /// that gets written to the error log.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::UnknownParser(_))
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to open or create a database file
    #[error("Failed to open database at '{path}': {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// Schema missing or unexpected
    #[error("Database schema error: {0}")]
    Schema(String),

    /// Index maintenance failed
    #[error("Index maintenance failed: {0}")]
    Maintenance(String),
}

/// Bulk-load errors
///
/// Any of these is fatal for an ingestion run. The batch file that failed is
/// left on disk for manual recovery.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Reading the batch file failed
    #[error("Failed to read batch file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Batch line had the wrong shape
    #[error("Malformed row {line} in batch file '{path}': expected {expected} columns, found {found}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    /// First column was not a source id
    #[error("Invalid source id '{value}' on row {line} of batch file '{path}'")]
    InvalidSourceId {
        path: PathBuf,
        line: u64,
        value: String,
    },

    /// Insert or commit failed
    #[error("Failed to load batch file '{path}': {source}")]
    Database {
        path: PathBuf,
        source: DbError,
    },

    /// The load thread could not be started or died
    #[error("Bulk load worker failed: {0}")]
    Worker(String),
}

/// Per-store search errors
#[derive(Error, Debug)]
pub enum SearchError {
    /// Store could not be opened
    #[error("Failed to open store '{store}': {reason}")]
    Connect { store: String, reason: String },

    /// Query failed on a store
    #[error("Query failed on store '{store}': {reason}")]
    Query { store: String, reason: String },

    /// Writing formatted output failed
    #[error("Failed to write search output: {0}")]
    Output(#[from] std::io::Error),
}

impl SearchError {
    /// Name of the store the error belongs to, if any
    pub fn store(&self) -> Option<&str> {
        match self {
            SearchError::Connect { store, .. } | SearchError::Query { store, .. } => Some(store),
            SearchError::Output(_) => None,
        }
    }
}

/// Result type alias for DumpError
pub type Result<T> = std::result::Result<T, DumpError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for LoadError
pub type LoadResult<T> = std::result::Result<T, LoadError>;
