//! Decompression-aware line source
//!
//! Turns an input path into a sequence of `(member name, lines)` pairs without
//! loading the input into memory:
//!
//! ```text
//!   dump.txt          ──► on_member("dump.txt", lines)
//!
//!   dump.tar.gz ─► gzip ─► tar ─┬─► on_member("a/one.txt", lines)
//!                               ├─  (directory, skipped)
//!                               └─► on_member("a/two.csv", lines)
//! ```
//!
//! Members are visited in archive order and each line iterator is forward-only.
//! Any I/O error aborts the whole call; whatever the callback already consumed
//! stays consumed.

use crate::error::Result;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// File name suffixes that are opened as gzip-compressed tar archives
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz"];

/// Read buffer size for input files
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Check whether a path is read as an archive rather than plain text
pub fn is_archive(path: &Path) -> bool {
    let name = path.to_string_lossy().to_ascii_lowercase();
    ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Open `path` and invoke `on_member` once per text member
///
/// Plain files are a single member named after the path itself. Archives
/// yield one member per regular file; directories, links and other entry
/// types are skipped.
pub fn read<F>(path: &Path, mut on_member: F) -> Result<()>
where
    F: FnMut(&str, &mut MemberLines<'_>) -> Result<()>,
{
    let file = File::open(path)?;

    if !is_archive(path) {
        let name = path.to_string_lossy();
        let mut lines = MemberLines::new(file);
        return on_member(&name, &mut lines);
    }

    let decoder = MultiGzDecoder::new(BufReader::with_capacity(READ_BUFFER_SIZE, file));
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let entry = entry?;

        if !entry.header().entry_type().is_file() {
            debug!(
                archive = %path.display(),
                entry_type = ?entry.header().entry_type(),
                "Skipping non-regular archive entry"
            );
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        let mut lines = MemberLines::new(entry);
        on_member(&name, &mut lines)?;
    }

    Ok(())
}

/// Forward-only iterator over the lines of one member
///
/// Lines are split on `\n`; a trailing `\r` is dropped and invalid UTF-8 is
/// replaced rather than treated as an error, since dumps are rarely clean.
pub struct MemberLines<'a> {
    reader: BufReader<Box<dyn Read + 'a>>,
    buf: Vec<u8>,
    lines_read: u64,
}

impl<'a> MemberLines<'a> {
    /// Wrap any reader
    pub fn new<R: Read + 'a>(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, Box::new(reader)),
            buf: Vec::with_capacity(256),
            lines_read: 0,
        }
    }

    /// Number of lines yielded so far
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl Iterator for MemberLines<'_> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                self.lines_read += 1;
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    fn collect(path: &Path) -> Vec<(String, Vec<String>)> {
        let mut members = Vec::new();
        read(path, |name, lines| {
            let lines = lines.collect::<io::Result<Vec<_>>>()?;
            members.push((name.to_string(), lines));
            Ok(())
        })
        .unwrap();
        members
    }

    #[test]
    fn test_archive_detection() {
        assert!(is_archive(Path::new("dump.tar.gz")));
        assert!(is_archive(Path::new("DUMP.TGZ")));
        assert!(!is_archive(Path::new("dump.txt")));
        assert!(!is_archive(Path::new("dump.gz")));
    }

    #[test]
    fn test_plain_text_member() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "one\r\ntwo\n\nthree").unwrap();

        let members = collect(&path);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, path.to_string_lossy());
        assert_eq!(members[0].1, vec!["one", "two", "", "three"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.txt");
        std::fs::write(&path, b"ok\nbad\xffbyte\n").unwrap();

        let members = collect(&path);
        assert_eq!(members[0].1[0], "ok");
        assert!(members[0].1[1].starts_with("bad"));
        assert!(members[0].1[1].ends_with("byte"));
    }

    #[test]
    fn test_tar_gz_members() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.tar.gz");

        let gz = GzEncoder::new(File::create(&path).unwrap(), Compression::fast());
        let mut builder = tar::Builder::new(gz);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "inner/", io::empty()).unwrap();

        for (name, body) in [("inner/a.txt", "a1\na2\n"), ("inner/b.csv", "b1\n")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();

        let members = collect(&path);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "inner/a.txt");
        assert_eq!(members[0].1, vec!["a1", "a2"]);
        assert_eq!(members[1].0, "inner/b.csv");
        assert_eq!(members[1].1, vec!["b1"]);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let result = read(&dir.path().join("nope.txt"), |_, _| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn test_callback_error_stops_iteration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "x\n").unwrap();

        let result = read(&path, |_, _| Err(crate::error::DumpError::Interrupted));
        assert!(matches!(result, Err(crate::error::DumpError::Interrupted)));
    }
}
