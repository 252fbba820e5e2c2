//! Size-bounded rotating batch file writer
//!
//! Records are appended to `<prefix><seq><suffix>`. Once a file holds
//! `max_writes` records, the next write opens the following sequence number
//! first, closes the full file, and hands its path to the rotation callback.
//! Rotation is lazy, so `W` writes produce exactly `ceil(W / N)` files (one
//! file when nothing is written) and no trailing empty file.

use crate::error::{DumpError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write buffer per batch file
const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Called with the path of each batch file that just became full
pub type RotateCallback = Box<dyn FnMut(&Path) -> Result<()> + Send>;

/// Appends records to numbered batch files, rotating every `max_writes`
pub struct RotatingBatchWriter {
    prefix: String,
    suffix: String,
    max_writes: usize,

    /// Sequence number of the open file
    seq: u64,

    /// Writes into the open file
    writes: usize,

    /// Writes across all files
    total_writes: u64,

    current: BufWriter<File>,
    on_rotate: Option<RotateCallback>,
}

impl RotatingBatchWriter {
    /// Create the writer and open file number 0
    ///
    /// An existing file with the same name is truncated.
    pub fn create(prefix: impl Into<String>, suffix: impl Into<String>, max_writes: usize) -> Result<Self> {
        if max_writes == 0 {
            return Err(DumpError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "batch writer needs at least one write per file",
            )));
        }

        let prefix = prefix.into();
        let suffix = suffix.into();
        let current = open_batch(&batch_file_name(&prefix, 0, &suffix))?;

        Ok(Self {
            prefix,
            suffix,
            max_writes,
            seq: 0,
            writes: 0,
            total_writes: 0,
            current,
            on_rotate: None,
        })
    }

    /// Install the rotation callback
    pub fn on_rotate(&mut self, callback: RotateCallback) {
        self.on_rotate = Some(callback);
    }

    /// Append one encoded record
    ///
    /// A callback error is returned from the write that triggered rotation;
    /// the new file is already open at that point.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.writes >= self.max_writes {
            self.rotate()?;
        }

        self.current.write_all(buf)?;
        self.writes += 1;
        self.total_writes += 1;
        Ok(buf.len())
    }

    /// Flush buffered bytes of the open file
    pub fn flush(&mut self) -> Result<()> {
        self.current.flush()?;
        Ok(())
    }

    /// Flush and close the open file, returning its path
    pub fn finish(self) -> Result<PathBuf> {
        let path = self.current_file_name();
        let file = self
            .current
            .into_inner()
            .map_err(|e| DumpError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(path)
    }

    pub fn current_file_name(&self) -> PathBuf {
        batch_file_name(&self.prefix, self.seq, &self.suffix)
    }

    pub fn next_file_name(&self) -> PathBuf {
        batch_file_name(&self.prefix, self.seq + 1, &self.suffix)
    }

    /// Name of the file before the open one; `None` before the first rotation
    pub fn previous_file_name(&self) -> Option<PathBuf> {
        self.seq
            .checked_sub(1)
            .map(|seq| batch_file_name(&self.prefix, seq, &self.suffix))
    }

    /// Sequence number of the open file
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Records written so far
    pub fn total_writes(&self) -> u64 {
        self.total_writes
    }

    /// Every file this writer has created, in order
    pub fn file_names(&self) -> Vec<PathBuf> {
        (0..=self.seq)
            .map(|seq| batch_file_name(&self.prefix, seq, &self.suffix))
            .collect()
    }

    fn rotate(&mut self) -> Result<()> {
        let next = open_batch(&self.next_file_name())?;
        let full = std::mem::replace(&mut self.current, next);
        full.into_inner()
            .map_err(|e| DumpError::Io(e.into_error()))?
            .sync_all()?;

        self.seq += 1;
        self.writes = 0;

        let previous = batch_file_name(&self.prefix, self.seq - 1, &self.suffix);
        debug!(file = %previous.display(), seq = self.seq, "Rotated batch file");

        match self.on_rotate.as_mut() {
            Some(callback) => callback(&previous),
            None => Ok(()),
        }
    }
}

/// `<prefix><seq><suffix>`
pub fn batch_file_name(prefix: &str, seq: u64, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}{}", prefix, seq, suffix))
}

fn open_batch(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn prefix(dir: &Path) -> String {
        format!("{}/batch_", dir.display())
    }

    fn lines(path: &Path) -> usize {
        std::fs::read_to_string(path).unwrap().lines().count()
    }

    #[test]
    fn test_file_count_is_ceiling() {
        for (writes, max, expected_files) in [(0, 3, 1), (1, 3, 1), (3, 3, 1), (4, 3, 2), (7, 3, 3), (9, 3, 3)] {
            let dir = tempdir().unwrap();
            let mut writer = RotatingBatchWriter::create(prefix(dir.path()), ".txt", max).unwrap();
            for i in 0..writes {
                writer.write(format!("line {}\n", i).as_bytes()).unwrap();
            }
            assert_eq!(writer.file_names().len(), expected_files, "writes={} max={}", writes, max);
            writer.finish().unwrap();

            let on_disk = std::fs::read_dir(dir.path()).unwrap().count();
            assert_eq!(on_disk, expected_files);
        }
    }

    #[test]
    fn test_callback_sees_full_previous_file() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingBatchWriter::create(prefix(dir.path()), ".txt", 2).unwrap();

        let seen: Arc<Mutex<Vec<(PathBuf, usize)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        writer.on_rotate(Box::new(move |path: &Path| -> Result<()> {
            sink.lock().unwrap().push((path.to_path_buf(), lines(path)));
            Ok(())
        }));

        for i in 0..5 {
            writer.write(format!("{}\n", i).as_bytes()).unwrap();
        }
        let last = writer.finish().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].0.ends_with("batch_0.txt"));
        assert!(seen[1].0.ends_with("batch_1.txt"));
        assert!(seen.iter().all(|(_, n)| *n == 2));
        assert!(last.ends_with("batch_2.txt"));
        assert_eq!(lines(&last), 1);
    }

    #[test]
    fn test_names() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingBatchWriter::create(prefix(dir.path()), ".tsv", 1).unwrap();
        assert!(writer.current_file_name().ends_with("batch_0.tsv"));
        assert!(writer.next_file_name().ends_with("batch_1.tsv"));
        assert_eq!(writer.previous_file_name(), None);

        writer.write(b"a\n").unwrap();
        writer.write(b"b\n").unwrap();
        assert_eq!(writer.sequence(), 1);
        assert!(writer.previous_file_name().unwrap().ends_with("batch_0.tsv"));
        assert_eq!(writer.total_writes(), 2);
    }

    #[test]
    fn test_callback_error_propagates() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingBatchWriter::create(prefix(dir.path()), ".txt", 1).unwrap();
        writer.on_rotate(Box::new(|_: &Path| -> Result<()> { Err(DumpError::Interrupted) }));

        writer.write(b"a\n").unwrap();
        assert!(matches!(writer.write(b"b\n"), Err(DumpError::Interrupted)));
    }

    #[test]
    fn test_zero_max_writes_rejected() {
        let dir = tempdir().unwrap();
        assert!(RotatingBatchWriter::create(prefix(dir.path()), ".txt", 0).is_err());
    }
}
