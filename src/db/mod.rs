//! SQLite storage for dump records
//!
//! A store is a single SQLite file holding the `records` table. Source labels
//! live in a `sources` table, either in the same file or in a separate
//! sources store shared by several record stores.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              Ingestion pipeline                      │
//! │  - resolves source labels via SourceInterner         │
//! │  - writes batch files                                │
//! └──────────────┬────────────────────────┬──────────────┘
//!                │ batch file             │ label
//!                ▼                        ▼
//! ┌──────────────────────────┐  ┌───────────────────────┐
//! │  BulkLoader (one at a    │  │  sources table        │
//! │  time, own thread)       │  │  (upsert RETURNING)   │
//! └──────────────┬───────────┘  └───────────────────────┘
//!                ▼
//! ┌──────────────────────────────────────────────────────┐
//! │  records table, indexes dropped during the import    │
//! │  and rebuilt by TableMaintenance at the end          │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod interner;
pub mod loader;
pub mod maintenance;
pub mod schema;

pub use interner::{SourceInterner, SourceStore, SqliteSourceStore};
pub use loader::{BulkLoader, SqliteLoader};
pub use maintenance::{default_sort_buffer_bytes, SqliteMaintenance, TableMaintenance};
pub use schema::{create_sources, create_store, keys};
