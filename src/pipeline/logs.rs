//! Append-only run logs
//!
//! - error log: raw lines that failed to parse
//! - done log: member names processed to the end (drives `--resume`)
//! - skip log: member names rejected by the extension filter

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// The three log files of an ingestion run
pub struct RunLogs {
    errors: BufWriter<File>,
    done: BufWriter<File>,
    skipped: BufWriter<File>,
}

impl RunLogs {
    /// Open (or create) all logs in append mode
    pub fn open(err_log: &Path, done_log: &Path, skip_log: &Path) -> io::Result<Self> {
        Ok(Self {
            errors: BufWriter::new(open_append(err_log)?),
            done: BufWriter::new(open_append(done_log)?),
            skipped: BufWriter::new(open_append(skip_log)?),
        })
    }

    pub fn log_error_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.errors, "{}", line)
    }

    /// Record a finished member; flushed at once so an interrupted run resumes correctly
    pub fn log_done(&mut self, member: &str) -> io::Result<()> {
        writeln!(self.done, "{}", member)?;
        self.done.flush()
    }

    pub fn log_skipped(&mut self, member: &str) -> io::Result<()> {
        writeln!(self.skipped, "{}", member)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.errors.flush()?;
        self.done.flush()?;
        self.skipped.flush()
    }

    /// Member names already in a done log; a missing log is empty
    pub fn read_done(path: &Path) -> io::Result<HashSet<String>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e),
        };

        BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
            .collect()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logs_append_across_runs() {
        let dir = tempdir().unwrap();
        let (err, done, skip) = (
            dir.path().join("err.log"),
            dir.path().join("done.log"),
            dir.path().join("skip.log"),
        );

        {
            let mut logs = RunLogs::open(&err, &done, &skip).unwrap();
            logs.log_error_line("malformed-line").unwrap();
            logs.log_done("a.txt").unwrap();
            logs.log_skipped("readme.md").unwrap();
            logs.flush().unwrap();
        }
        {
            let mut logs = RunLogs::open(&err, &done, &skip).unwrap();
            logs.log_done("b.txt").unwrap();
        }

        assert_eq!(std::fs::read_to_string(&err).unwrap(), "malformed-line\n");
        assert_eq!(std::fs::read_to_string(&skip).unwrap(), "readme.md\n");

        let finished = RunLogs::read_done(&done).unwrap();
        assert_eq!(finished.len(), 2);
        assert!(finished.contains("a.txt") && finished.contains("b.txt"));
    }

    #[test]
    fn test_missing_done_log_is_empty() {
        let dir = tempdir().unwrap();
        assert!(RunLogs::read_done(&dir.path().join("none.log")).unwrap().is_empty());
    }
}
