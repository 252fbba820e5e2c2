//! Source label interning
//!
//! Maps free-text provenance labels (usually file or archive member paths) to
//! small integer ids stored in the `sources` table, and back again.
//!
//! Both directions are shadowed by a bounded LRU cache per process. The cache
//! is only an optimization: "one name, one id" is guaranteed by the `UNIQUE`
//! constraint on `sources.name` together with an upsert that returns the id
//! of whichever row won. Two workers resolving the same unseen name at the
//! same time both run the upsert and both get the same id back.

use crate::db::schema::{self, SOURCES_TABLE, SOURCE_NAME_MAX_LEN};
use crate::error::DbResult;
use lru::LruCache;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Entries kept per cache direction
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Returned by [`SourceInterner::resolve_name`] for ids with no row
pub const UNKNOWN_SOURCE: &str = "unknown source";

/// Backing store for the name ↔ id mapping
pub trait SourceStore: Send + Sync {
    /// Insert `name` if absent and return its id either way
    fn upsert_id(&self, name: &str) -> DbResult<i64>;

    /// Look up the name for an id
    fn lookup_name(&self, id: i64) -> DbResult<Option<String>>;
}

/// `sources` table in a SQLite database
pub struct SqliteSourceStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSourceStore {
    /// Open a sources store for reading and writing
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = schema::open_for_write(path)?;
        schema::require_table(&conn, SOURCES_TABLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open a sources store for lookups only
    pub fn open_read_only(path: &Path) -> DbResult<Self> {
        let conn = schema::open_for_read(path)?;
        schema::require_table(&conn, SOURCES_TABLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying database
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceStore for SqliteSourceStore {
    fn upsert_id(&self, name: &str) -> DbResult<i64> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO sources (name, last_updated) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET last_updated = excluded.last_updated
             RETURNING id",
        )?;
        let id = stmt.query_row(params![name, chrono::Utc::now().timestamp()], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    fn lookup_name(&self, id: i64) -> DbResult<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT name FROM sources WHERE id = ?1")?;
        let name = stmt.query_row([id], |row| row.get(0)).optional()?;
        Ok(name)
    }
}

/// Cache hit/miss counters
#[derive(Debug, Default)]
pub struct InternerStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl InternerStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Cached, thread-safe source label resolver
pub struct SourceInterner {
    store: Box<dyn SourceStore>,
    ids: Mutex<LruCache<String, i64>>,
    names: Mutex<LruCache<i64, String>>,
    stats: InternerStats,
}

impl SourceInterner {
    /// Create an interner with the default cache capacity
    pub fn new(store: Box<dyn SourceStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CACHE_CAPACITY)
    }

    /// Create an interner with `capacity` cached entries per direction
    pub fn with_capacity(store: Box<dyn SourceStore>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            ids: Mutex::new(LruCache::new(cap)),
            names: Mutex::new(LruCache::new(cap)),
            stats: InternerStats::default(),
        }
    }

    /// Open an interner over a SQLite sources store
    pub fn open(path: &Path) -> DbResult<Self> {
        Ok(Self::new(Box::new(SqliteSourceStore::open(path)?)))
    }

    /// Open a lookup-only interner over a SQLite sources store
    pub fn open_read_only(path: &Path) -> DbResult<Self> {
        Ok(Self::new(Box::new(SqliteSourceStore::open_read_only(path)?)))
    }

    /// Resolve a source label to its id, creating it if needed
    pub fn resolve_id(&self, name: &str) -> DbResult<i64> {
        let name = normalize_name(name);

        if let Some(id) = self.ids.lock().get(name).copied() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(id);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        // No lock held across the upsert: concurrent misses for the same name
        // race in the database, where the unique constraint settles them.
        let id = self.store.upsert_id(name)?;
        debug!(source = name, id, "Interned source");

        self.ids.lock().put(name.to_string(), id);
        self.names.lock().put(id, name.to_string());
        Ok(id)
    }

    /// Resolve an id back to its label
    ///
    /// Unknown ids yield [`UNKNOWN_SOURCE`] so result streaming never stops
    /// over missing provenance.
    pub fn resolve_name(&self, id: i64) -> DbResult<String> {
        if let Some(name) = self.names.lock().get(&id).cloned() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(name);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        match self.store.lookup_name(id)? {
            Some(name) => {
                self.names.lock().put(id, name.clone());
                Ok(name)
            }
            None => Ok(UNKNOWN_SOURCE.to_string()),
        }
    }

    /// Cache statistics
    pub fn stats(&self) -> &InternerStats {
        &self.stats
    }
}

/// Strip a leading `./` and cap the length to what the column stores
pub fn normalize_name(name: &str) -> &str {
    let name = name.strip_prefix("./").unwrap_or(name);
    match name.char_indices().nth(SOURCE_NAME_MAX_LEN) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// In-memory store that counts round trips
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, i64>>,
        next: AtomicI64,
        upserts: AtomicU64,
    }

    impl SourceStore for Arc<MemoryStore> {
        fn upsert_id(&self, name: &str) -> DbResult<i64> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock();
            let next = &self.next;
            Ok(*rows
                .entry(name.to_string())
                .or_insert_with(|| next.fetch_add(1, Ordering::SeqCst) + 1))
        }

        fn lookup_name(&self, id: i64) -> DbResult<Option<String>> {
            Ok(self
                .rows
                .lock()
                .iter()
                .find(|(_, v)| **v == id)
                .map(|(k, _)| k.clone()))
        }
    }

    fn sqlite_sources(dir: &Path) -> PathBuf {
        let path = dir.join("sources.db");
        let conn = schema::open_for_write(&path).unwrap();
        schema::create_sources(&conn).unwrap();
        path
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("./leak/a.txt"), "leak/a.txt");
        assert_eq!(normalize_name("leak/a.txt"), "leak/a.txt");

        let long = "x".repeat(400);
        assert_eq!(normalize_name(&long).len(), SOURCE_NAME_MAX_LEN);

        let wide = "é".repeat(300);
        assert_eq!(normalize_name(&wide).chars().count(), SOURCE_NAME_MAX_LEN);
    }

    #[test]
    fn test_cache_avoids_round_trips() {
        let store = Arc::new(MemoryStore::default());
        let interner = SourceInterner::new(Box::new(Arc::clone(&store)));

        let a = interner.resolve_id("a.txt").unwrap();
        let again = interner.resolve_id("./a.txt").unwrap();
        assert_eq!(a, again);
        assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
        assert_eq!(interner.stats().hits(), 1);

        assert_eq!(interner.resolve_name(a).unwrap(), "a.txt");
        assert_eq!(interner.resolve_name(999).unwrap(), UNKNOWN_SOURCE);
    }

    #[test]
    fn test_eviction_falls_back_to_store() {
        let store = Arc::new(MemoryStore::default());
        let interner = SourceInterner::with_capacity(Box::new(Arc::clone(&store)), 1);

        let a = interner.resolve_id("a").unwrap();
        let b = interner.resolve_id("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(interner.resolve_id("a").unwrap(), a);
        assert_eq!(store.upserts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_sqlite_upsert_is_stable() {
        let dir = tempdir().unwrap();
        let path = sqlite_sources(dir.path());

        let interner = SourceInterner::open(&path).unwrap();
        let first = interner.resolve_id("collection1.tar.gz/part1.txt").unwrap();
        let second = interner.resolve_id("collection1.tar.gz/part2.txt").unwrap();
        assert_ne!(first, second);

        // A fresh interner has a cold cache and must hit the upsert path.
        let other = SourceInterner::open(&path).unwrap();
        assert_eq!(other.resolve_id("collection1.tar.gz/part1.txt").unwrap(), first);
        assert_eq!(other.resolve_name(second).unwrap(), "collection1.tar.gz/part2.txt");
        assert_eq!(other.resolve_name(12345).unwrap(), UNKNOWN_SOURCE);
    }

    #[test]
    fn test_concurrent_first_resolution() {
        let dir = tempdir().unwrap();
        let path = sqlite_sources(dir.path());

        // Separate interners, separate connections, no shared cache.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let interner = SourceInterner::open(&path).unwrap();
                    interner.resolve_id("same-unseen-name").unwrap()
                })
            })
            .collect();

        let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let conn = Connection::open(&path).unwrap();
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sources WHERE name = 'same-unseen-name'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_shared_interner_across_threads() {
        let dir = tempdir().unwrap();
        let path = sqlite_sources(dir.path());
        let interner = Arc::new(SourceInterner::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let interner = Arc::clone(&interner);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|j| interner.resolve_id(&format!("src-{}", (i + j) % 10)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 10);
    }

    #[test]
    fn test_open_without_table_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path).unwrap();
        assert!(SqliteSourceStore::open(&path).is_err());
    }
}
