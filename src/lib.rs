//! dumpdb - bulk ingestion and multi-store search for credential dumps
//!
//! Takes large line-oriented dump files, plain text or gzip-compressed tar
//! archives, normalizes each line into a structured record through a named
//! parser, and bulk-loads the records into SQLite stores. Searches run one
//! predicate against many stores concurrently and stream the merged results.
//!
//! # Features
//!
//! - **Pluggable Parsers**: each dump layout is a named `fn(line, source)`;
//!   the pipeline never changes when a layout is added.
//!
//! - **Overlapped Loading**: records go to rotating batch files, and each full
//!   file is bulk-loaded on its own thread while parsing continues. At most
//!   one load runs at a time.
//!
//! - **Indexed Email Suffix Search**: only the reversed email is stored and
//!   indexed, so `email LIKE '%@domain'` becomes an index prefix scan.
//!
//! - **Source Interning**: provenance labels are stored once and referenced
//!   by id, with a bounded LRU cache in front.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Inputs: dump.txt, leak.tar.gz                               │
//! └─────────────────────────────┬────────────────────────────────┘
//!                               │ members, lines
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  IngestPipeline                                              │
//! │   parser ─► SourceInterner ─► RotatingBatchWriter            │
//! └─────────────────────────────┬────────────────────────────────┘
//!                               │ full batch file
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  LoadScheduler (single flight) ─► SqliteLoader               │
//! └─────────────────────────────┬────────────────────────────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  SQLite store(s)     │◄──── SearchFanout
//!                    └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Create a store and import an archive
//! dumpdb init leaks.db
//! dumpdb import leak.tar.gz --store leaks.db --parser email-password
//!
//! # Search two stores at once
//! dumpdb search --store leaks.db,old.db --query "email LIKE '%@example.com'" --format jsonl
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod search;
pub mod source;
pub mod writer;

pub use config::{CliArgs, ImportOptions, IngestOptions, SearchOptions};
pub use error::{DumpError, Result};
pub use parser::ParserRegistry;
pub use pipeline::{IngestPipeline, IngestSummary, LoadTarget, PipelineState};
pub use record::Record;
pub use search::{Column, OutputFormat, SearchFanout, SearchReport};
pub use writer::RotatingBatchWriter;
