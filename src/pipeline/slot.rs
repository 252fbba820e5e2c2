//! Single-flight scheduling of bulk loads
//!
//! A bounded channel of capacity one holds a single token. Taking the token
//! acquires the load slot, and the load's permit puts it back when dropped,
//! including on panic. So at most one load runs at any instant, while the
//! producer keeps writing the next batch file until it needs the slot again.
//!
//! ```text
//!  producer ──rotate──► acquire ──► spawn "bulk-load-N" ──► load ──► release
//!                         ▲                                            │
//!                         └──────────────── token ◄────────────────────┘
//! ```
//!
//! The first error of a background load is kept and returned from the next
//! acquire, or from [`LoadScheduler::join`].

use crate::db::BulkLoader;
use crate::error::{LoadError, LoadResult};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

struct Inner {
    loader: Arc<dyn BulkLoader>,
    token_tx: Sender<()>,
    token_rx: Receiver<()>,

    /// First background load failure, not yet reported
    failure: Mutex<Option<LoadError>>,

    /// Every spawned load thread, joined at the end
    handles: Mutex<Vec<JoinHandle<()>>>,

    next_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    files_loaded: AtomicU64,
    rows_loaded: AtomicU64,
}

/// Returns the token when dropped
struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        // Capacity one and a single outstanding token: never blocks
        let _ = self.inner.token_tx.send(());
    }
}

/// Schedules bulk loads so that at most one runs at a time
#[derive(Clone)]
pub struct LoadScheduler {
    inner: Arc<Inner>,
}

impl LoadScheduler {
    pub fn new(loader: Arc<dyn BulkLoader>) -> Self {
        let (token_tx, token_rx) = bounded(1);
        // Pre-seeded so the first acquire succeeds
        let _ = token_tx.send(());

        Self {
            inner: Arc::new(Inner {
                loader,
                token_tx,
                token_rx,
                failure: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                files_loaded: AtomicU64::new(0),
                rows_loaded: AtomicU64::new(0),
            }),
        }
    }

    /// Block until the slot is free, surfacing any earlier load failure
    fn acquire(&self) -> LoadResult<Permit> {
        self.inner
            .token_rx
            .recv()
            .map_err(|_| LoadError::Worker("load slot closed".to_string()))?;
        let permit = Permit {
            inner: Arc::clone(&self.inner),
        };

        if let Some(err) = self.inner.failure.lock().take() {
            return Err(err);
        }
        Ok(permit)
    }

    /// Wait for the slot, then load `path` on a new named thread
    pub fn spawn(&self, path: PathBuf) -> LoadResult<()> {
        let permit = self.acquire()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let this = self.clone();

        let handle = thread::Builder::new()
            .name(format!("bulk-load-{}", id))
            .spawn(move || {
                if let Err(e) = this.load(&path) {
                    error!(file = %path.display(), error = %e, "Bulk load failed");
                    this.inner.failure.lock().get_or_insert(e);
                }
                drop(permit);
            })
            .map_err(|e| LoadError::Worker(format!("failed to spawn load thread: {}", e)))?;

        debug!(id, "Spawned bulk load");
        self.inner.handles.lock().push(handle);
        Ok(())
    }

    /// Wait for the slot, then load `path` on the calling thread
    pub fn load_now(&self, path: &Path) -> LoadResult<u64> {
        let permit = self.acquire()?;
        let result = self.load(path);
        drop(permit);
        result
    }

    /// Join every spawned load and return the first failure
    pub fn join(&self) -> LoadResult<()> {
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                self.inner
                    .failure
                    .lock()
                    .get_or_insert(LoadError::Worker("load thread panicked".to_string()));
            }
        }

        match self.inner.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn load(&self, path: &Path) -> LoadResult<u64> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.inner.loader.load_file(path);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Ok(rows) = result {
            self.inner.files_loaded.fetch_add(1, Ordering::Relaxed);
            self.inner.rows_loaded.fetch_add(rows, Ordering::Relaxed);
        }
        result
    }

    pub fn files_loaded(&self) -> u64 {
        self.inner.files_loaded.load(Ordering::Relaxed)
    }

    pub fn rows_loaded(&self) -> u64 {
        self.inner.rows_loaded.load(Ordering::Relaxed)
    }

    /// Highest number of loads ever observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowLoader {
        delay: Duration,
        fail_on: Option<String>,
    }

    impl BulkLoader for SlowLoader {
        fn load_file(&self, path: &Path) -> LoadResult<u64> {
            thread::sleep(self.delay);
            if self.fail_on.as_deref() == path.to_str() {
                return Err(LoadError::Worker(format!("cannot load {}", path.display())));
            }
            Ok(10)
        }
    }

    fn scheduler(fail_on: Option<&str>) -> LoadScheduler {
        LoadScheduler::new(Arc::new(SlowLoader {
            delay: Duration::from_millis(15),
            fail_on: fail_on.map(str::to_string),
        }))
    }

    #[test]
    fn test_single_flight() {
        let s = scheduler(None);
        for i in 0..6 {
            s.spawn(PathBuf::from(format!("batch_{}", i))).unwrap();
        }
        assert_eq!(s.load_now(Path::new("batch_last")).unwrap(), 10);
        s.join().unwrap();

        assert_eq!(s.max_in_flight(), 1);
        assert_eq!(s.files_loaded(), 7);
        assert_eq!(s.rows_loaded(), 70);
    }

    #[test]
    fn test_failure_surfaces_at_next_acquire() {
        let s = scheduler(Some("bad"));
        s.spawn(PathBuf::from("bad")).unwrap();

        let err = s.spawn(PathBuf::from("good")).unwrap_err();
        assert!(matches!(err, LoadError::Worker(msg) if msg.contains("bad")));

        // Reported once; the slot is usable again
        s.join().unwrap();
        assert_eq!(s.load_now(Path::new("good")).unwrap(), 10);
    }

    #[test]
    fn test_failure_surfaces_at_join() {
        let s = scheduler(Some("bad"));
        s.spawn(PathBuf::from("bad")).unwrap();
        assert!(s.join().is_err());
        assert_eq!(s.files_loaded(), 0);
    }
}
