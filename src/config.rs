//! Configuration types for dumpdb
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - `[filesPrefix]` placeholder expansion for log and batch file names

use crate::error::ConfigError;
use crate::search::{Column, OutputFormat};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Batch size limits (lines per batch file)
pub const MIN_BATCH_LINES: usize = 1;
pub const MAX_BATCH_LINES: usize = 100_000_000;

/// Default lines per batch file
pub const DEFAULT_BATCH_LINES: usize = 4_000_000;

/// Placeholder replaced by the run's files prefix
pub const FILES_PREFIX_PLACEHOLDER: &str = "[filesPrefix]";

/// Timestamp format of the default files prefix
const FILES_PREFIX_FORMAT: &str = "%Y-%m-%d_%H%M_%S";

/// Extensions accepted when none are given
const DEFAULT_EXTENSIONS: &str = "txt,csv";

/// Bulk-ingest credential dumps into SQLite stores and search them
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dumpdb",
    version,
    about = "Bulk-ingest credential dumps into SQLite stores and search them",
    long_about = "Parses line-oriented dump files (plain text or .tar.gz archives) with a named \
                  parser, writes records to rotating batch files and bulk-loads them into a \
                  SQLite store while parsing continues.\n\n\
                  Searches run one query against many stores concurrently.",
    after_help = "EXAMPLES:\n    \
        dumpdb init leaks.db\n    \
        dumpdb import dump.tar.gz --store leaks.db --parser email-password\n    \
        dumpdb search --store leaks.db --store old.db --query \"email = 'a@b.com'\"\n    \
        dumpdb process combo.txt --parser collections --batch-lines 1000000"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the records table (and sources table) in one or more stores
    Init {
        /// Store files to initialise
        #[arg(value_name = "STORE", required = true)]
        stores: Vec<PathBuf>,

        /// Separate sources store; by default each store holds its own
        #[arg(long, env = "DDB_SOURCES", value_name = "FILE")]
        sources: Option<PathBuf>,
    },

    /// Parse inputs into batch files without loading them
    Process {
        /// Input files or .tar.gz archives
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        ingest: IngestArgs,
    },

    /// Parse inputs and bulk-load them into a store
    Import {
        /// Input files or .tar.gz archives
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Target store
        #[arg(short = 's', long, env = "DDB_STORE", value_name = "FILE")]
        store: PathBuf,

        /// Sources store (defaults to the target store)
        #[arg(long, env = "DDB_SOURCES", value_name = "FILE")]
        sources: Option<PathBuf>,

        /// Compact the store before rebuilding indexes
        #[arg(long)]
        compress: bool,

        /// Directory for temporary files during index rebuild and compaction
        #[arg(long, env = "DDB_TMP_DIR", value_name = "DIR")]
        tmp_dir: Option<PathBuf>,

        /// Sort buffer for the index rebuild in MiB (default: a quarter of RAM)
        #[arg(long, value_name = "MIB")]
        sort_buffer_mb: Option<u64>,

        #[command(flatten)]
        ingest: IngestArgs,
    },

    /// Run one query against many stores concurrently
    Search {
        /// Stores to search (repeat or comma-separate)
        #[arg(
            short = 's',
            long = "store",
            env = "DDB_STORES",
            value_name = "FILE",
            value_delimiter = ',',
            required = true
        )]
        stores: Vec<String>,

        /// Filter predicate, e.g. "email = 'a@b.com'"
        #[arg(short = 'Q', long, value_name = "PREDICATE")]
        query: String,

        /// Columns to output
        #[arg(
            short = 'c',
            long,
            value_delimiter = ',',
            default_value = "username,email,hash,password,extra"
        )]
        columns: Vec<String>,

        /// Sources store, required for the 'source' column
        #[arg(long, env = "DDB_SOURCES", value_name = "FILE")]
        sources: Option<PathBuf>,

        /// Output format: text or jsonl
        #[arg(short = 'f', long, default_value = "text")]
        format: String,
    },

    /// List the registered line parsers
    Parsers,
}

/// Options shared by `process` and `import`
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Line parser to use
    #[arg(short = 'p', long, env = "DDB_PARSER", value_name = "NAME")]
    pub parser: String,

    /// Lines per batch file
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_LINES, value_name = "NUM")]
    pub batch_lines: usize,

    /// Prefix for batch and log files (default: current timestamp)
    #[arg(long, value_name = "PREFIX")]
    pub files_prefix: Option<String>,

    /// Batch file name prefix; the sequence number follows it
    #[arg(long, default_value = "[filesPrefix]_", value_name = "PREFIX")]
    pub batch_prefix: String,

    /// Batch file name suffix
    #[arg(long, default_value = ".txt", value_name = "SUFFIX")]
    pub batch_suffix: String,

    /// Log of lines that failed to parse
    #[arg(long, default_value = "[filesPrefix]_err.log", value_name = "FILE")]
    pub err_log: String,

    /// Log of fully processed members
    #[arg(long, default_value = "[filesPrefix]_done.log", value_name = "FILE")]
    pub done_log: String,

    /// Log of members skipped for their extension
    #[arg(long, default_value = "[filesPrefix]_skip.log", value_name = "FILE")]
    pub skip_log: String,

    /// Accepted member extensions (comma-separated, empty accepts all)
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_EXTENSIONS)]
    pub extensions: Vec<String>,

    /// Skip members already listed in the done log
    #[arg(long)]
    pub resume: bool,
}

/// Validated options for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Input files, in order
    pub inputs: Vec<PathBuf>,

    /// Parser name
    pub parser: String,

    /// Records per batch file
    pub batch_lines: usize,

    pub batch_prefix: String,
    pub batch_suffix: String,

    pub err_log: PathBuf,
    pub done_log: PathBuf,
    pub skip_log: PathBuf,

    /// Lowercase extensions without the leading dot; empty accepts all
    pub extensions: Vec<String>,

    pub resume: bool,

    /// Show progress indicator
    pub show_progress: bool,
}

impl IngestOptions {
    /// Create and validate options from CLI arguments
    pub fn from_args(inputs: Vec<PathBuf>, args: &IngestArgs, quiet: bool) -> Result<Self, ConfigError> {
        if !(MIN_BATCH_LINES..=MAX_BATCH_LINES).contains(&args.batch_lines) {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_lines,
                min: MIN_BATCH_LINES,
                max: MAX_BATCH_LINES,
            });
        }

        for input in &inputs {
            if !input.is_file() {
                return Err(ConfigError::InvalidInput {
                    path: input.clone(),
                    reason: "not a readable file".to_string(),
                });
            }
        }

        let prefix = args
            .files_prefix
            .clone()
            .unwrap_or_else(default_files_prefix);

        Ok(Self {
            inputs,
            parser: args.parser.clone(),
            batch_lines: args.batch_lines,
            batch_prefix: expand_prefix(&args.batch_prefix, &prefix),
            batch_suffix: args.batch_suffix.clone(),
            err_log: PathBuf::from(expand_prefix(&args.err_log, &prefix)),
            done_log: PathBuf::from(expand_prefix(&args.done_log, &prefix)),
            skip_log: PathBuf::from(expand_prefix(&args.skip_log, &prefix)),
            extensions: normalize_extensions(&args.extensions),
            resume: args.resume,
            show_progress: !quiet,
        })
    }

    /// Options for a run with every log and batch file under `prefix`
    ///
    /// Accepts all extensions. Used by tests and embedders that bypass the CLI.
    pub fn with_prefix(inputs: Vec<PathBuf>, parser: &str, prefix: &str) -> Self {
        Self {
            inputs,
            parser: parser.to_string(),
            batch_lines: DEFAULT_BATCH_LINES,
            batch_prefix: format!("{}_", prefix),
            batch_suffix: ".txt".to_string(),
            err_log: PathBuf::from(format!("{}_err.log", prefix)),
            done_log: PathBuf::from(format!("{}_done.log", prefix)),
            skip_log: PathBuf::from(format!("{}_skip.log", prefix)),
            extensions: Vec::new(),
            resume: false,
            show_progress: false,
        }
    }

    /// Check whether a member name has an accepted extension
    pub fn accepts(&self, member: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = Path::new(member)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext {
            Some(ext) => self.extensions.iter().any(|accepted| *accepted == ext),
            None => false,
        }
    }
}

/// Validated options for `import`
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub ingest: IngestOptions,

    /// Target store
    pub store: PathBuf,

    /// Sources store (the target store unless given)
    pub sources: PathBuf,

    pub compress: bool,
    pub tmp_dir: Option<PathBuf>,

    /// Explicit sort buffer; detected from memory when unset
    pub sort_buffer_bytes: Option<u64>,
}

impl ImportOptions {
    pub fn new(
        ingest: IngestOptions,
        store: PathBuf,
        sources: Option<PathBuf>,
        compress: bool,
        tmp_dir: Option<PathBuf>,
        sort_buffer_mb: Option<u64>,
    ) -> Result<Self, ConfigError> {
        if !store.is_file() {
            return Err(ConfigError::InvalidStore {
                store: store.display().to_string(),
                reason: "store does not exist - run `dumpdb init` first".to_string(),
            });
        }

        if let Some(dir) = &tmp_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidInput {
                    path: dir.clone(),
                    reason: "temporary directory does not exist".to_string(),
                });
            }
        }

        Ok(Self {
            ingest,
            sources: sources.unwrap_or_else(|| store.clone()),
            store,
            compress,
            tmp_dir,
            sort_buffer_bytes: sort_buffer_mb.map(|mb| mb.max(1) * 1024 * 1024),
        })
    }
}

/// Validated options for `search`
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub stores: Vec<String>,
    pub query: String,
    pub columns: Vec<Column>,
    pub sources: Option<PathBuf>,
    pub format: OutputFormat,
}

impl SearchOptions {
    pub fn new(
        stores: Vec<String>,
        query: String,
        columns: &[String],
        sources: Option<PathBuf>,
        format: &str,
    ) -> Result<Self, ConfigError> {
        if stores.is_empty() {
            return Err(ConfigError::NoStores);
        }
        if let Some(empty) = stores.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidStore {
                store: empty.clone(),
                reason: "empty store name".to_string(),
            });
        }
        if query.trim().is_empty() {
            return Err(ConfigError::InvalidQuery("predicate is empty".to_string()));
        }

        let columns = columns
            .iter()
            .map(|c| c.parse::<Column>())
            .collect::<Result<Vec<_>, _>>()?;
        if columns.contains(&Column::Source) && sources.is_none() {
            return Err(ConfigError::SourcesStoreRequired);
        }

        Ok(Self {
            stores,
            query,
            columns,
            sources,
            format: format.parse()?,
        })
    }
}

/// Current local time formatted as a files prefix
pub fn default_files_prefix() -> String {
    chrono::Local::now().format(FILES_PREFIX_FORMAT).to_string()
}

/// Replace every `[filesPrefix]` in `template`
pub fn expand_prefix(template: &str, prefix: &str) -> String {
    template.replace(FILES_PREFIX_PLACEHOLDER, prefix)
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ingest_args() -> IngestArgs {
        IngestArgs {
            parser: "email-password".into(),
            batch_lines: 10,
            files_prefix: Some("run1".into()),
            batch_prefix: "[filesPrefix]_".into(),
            batch_suffix: ".txt".into(),
            err_log: "[filesPrefix]_err.log".into(),
            done_log: "[filesPrefix]_done.log".into(),
            skip_log: "[filesPrefix]_skip.log".into(),
            extensions: vec!["TXT".into(), ".csv".into(), "".into()],
            resume: false,
        }
    }

    #[test]
    fn test_expand_prefix() {
        assert_eq!(expand_prefix("[filesPrefix]_err.log", "x"), "x_err.log");
        assert_eq!(expand_prefix("plain.log", "x"), "plain.log");
    }

    #[test]
    fn test_default_prefix_shape() {
        let prefix = default_files_prefix();
        // 2024-01-31_1205_09
        assert_eq!(prefix.len(), 18);
        assert_eq!(&prefix[10..11], "_");
    }

    #[test]
    fn test_ingest_options_from_args() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("dump.txt");
        std::fs::write(&input, "a@b.c:x\n").unwrap();

        let opts = IngestOptions::from_args(vec![input], &ingest_args(), false).unwrap();
        assert_eq!(opts.batch_prefix, "run1_");
        assert_eq!(opts.err_log, PathBuf::from("run1_err.log"));
        assert_eq!(opts.extensions, vec!["txt".to_string(), "csv".to_string()]);
        assert!(opts.show_progress);

        assert!(opts.accepts("a/b/file.TXT"));
        assert!(opts.accepts("combo.csv"));
        assert!(!opts.accepts("readme.md"));
        assert!(!opts.accepts("noext"));
    }

    #[test]
    fn test_batch_lines_bounds() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("dump.txt");
        std::fs::write(&input, "").unwrap();

        let mut args = ingest_args();
        args.batch_lines = 0;
        assert!(matches!(
            IngestOptions::from_args(vec![input.clone()], &args, true),
            Err(ConfigError::InvalidBatchSize { .. })
        ));

        args.batch_lines = MAX_BATCH_LINES + 1;
        assert!(IngestOptions::from_args(vec![input], &args, true).is_err());
    }

    #[test]
    fn test_missing_input_rejected() {
        let err = IngestOptions::from_args(vec![PathBuf::from("/no/such/file.txt")], &ingest_args(), true)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInput { .. }));
    }

    #[test]
    fn test_import_defaults_sources_to_store() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("s.db");
        std::fs::write(&store, "").unwrap();
        let ingest = IngestOptions::with_prefix(vec![], "email-password", "p");

        let opts = ImportOptions::new(ingest.clone(), store.clone(), None, false, None, Some(64)).unwrap();
        assert_eq!(opts.sources, store);
        assert_eq!(opts.sort_buffer_bytes, Some(64 * 1024 * 1024));

        assert!(ImportOptions::new(ingest, dir.path().join("missing.db"), None, false, None, None).is_err());
    }

    #[test]
    fn test_search_options_validation() {
        let cols = |c: &[&str]| c.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let opts = SearchOptions::new(
            vec!["a.db".into()],
            "email = 'x'".into(),
            &cols(&["email", "password"]),
            None,
            "jsonl",
        )
        .unwrap();
        assert_eq!(opts.columns, vec![Column::Email, Column::Password]);
        assert_eq!(opts.format, OutputFormat::JsonLines);

        assert_eq!(
            SearchOptions::new(vec![], "x".into(), &cols(&["email"]), None, "text").unwrap_err(),
            ConfigError::NoStores
        );
        assert_eq!(
            SearchOptions::new(vec!["a.db".into()], "x".into(), &cols(&["source"]), None, "text")
                .unwrap_err(),
            ConfigError::SourcesStoreRequired
        );
        assert!(matches!(
            SearchOptions::new(vec!["a.db".into()], "x".into(), &cols(&["nope"]), None, "text"),
            Err(ConfigError::UnknownColumn { .. })
        ));
        assert!(matches!(
            SearchOptions::new(vec!["a.db".into()], "x".into(), &cols(&["email"]), None, "xml"),
            Err(ConfigError::UnknownOutputFormat(_))
        ));
        assert!(matches!(
            SearchOptions::new(vec!["a.db".into()], "  ".into(), &cols(&["email"]), None, "text"),
            Err(ConfigError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_cli_parses_import() {
        let args = CliArgs::parse_from([
            "dumpdb", "import", "a.txt", "b.tgz", "--store", "s.db", "--parser", "adobe", "--resume",
        ]);
        match args.command {
            Command::Import { inputs, store, ingest, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(store, PathBuf::from("s.db"));
                assert_eq!(ingest.parser, "adobe");
                assert_eq!(ingest.batch_lines, DEFAULT_BATCH_LINES);
                assert!(ingest.resume);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_search_store_list() {
        let args = CliArgs::parse_from([
            "dumpdb", "search", "--store", "a.db,b.db", "--store", "c.db", "--query", "email = 'x'",
        ]);
        match args.command {
            Command::Search { stores, columns, .. } => {
                assert_eq!(stores, vec!["a.db", "b.db", "c.db"]);
                assert_eq!(columns.len(), 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
