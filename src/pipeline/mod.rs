//! Ingestion pipeline
//!
//! Streams every input through the chosen parser into rotating batch files.
//! In `import` mode each full batch file is bulk-loaded on its own thread
//! while parsing continues, with at most one load in flight.
//!
//! ```text
//!  Idle ─► IndexesDisabled ─► Streaming ─► FinalFlush ─► IndexesRestored ─► Done
//!                                 │
//!                                 └─(shutdown flag)─► Interrupted
//! ```
//!
//! An interrupted run still flushes and loads what it wrote and rebuilds the
//! indexes; it reports `Interrupted` as its final state. A fatal error (log
//! I/O, bulk load, index maintenance) stops the run; outstanding loads are
//! joined and the batch files of failed loads stay on disk.

pub mod logs;
pub mod slot;

pub use logs::RunLogs;
pub use slot::LoadScheduler;

use crate::config::IngestOptions;
use crate::db::{BulkLoader, SourceInterner, TableMaintenance};
use crate::error::{DumpError, Result};
use crate::parser::{ParseFn, ParserRegistry};
use crate::source::{self, MemberLines};
use crate::writer::RotatingBatchWriter;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Store metadata status values
pub const STATUS_IMPORTING: &str = "importing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_INTERRUPTED: &str = "interrupted";

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    IndexesDisabled,
    Streaming,
    FinalFlush,
    IndexesRestored,
    Done,
    Interrupted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::IndexesDisabled => "indexes-disabled",
            PipelineState::Streaming => "streaming",
            PipelineState::FinalFlush => "final-flush",
            PipelineState::IndexesRestored => "indexes-restored",
            PipelineState::Done => "done",
            PipelineState::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Where loaded batches go, for `import`
pub struct LoadTarget {
    pub loader: Arc<dyn BulkLoader>,
    pub maintenance: Box<dyn TableMaintenance>,
    pub compress: bool,
    pub tmp_dir: Option<PathBuf>,
    pub sort_buffer_bytes: u64,
}

/// Live counters, shared with the progress display
#[derive(Debug)]
pub struct IngestProgress {
    pub lines: AtomicU64,
    pub records: AtomicU64,
    pub parse_errors: AtomicU64,
    pub blank_lines: AtomicU64,
    pub members: AtomicU64,
    pub members_skipped: AtomicU64,
    pub members_resumed: AtomicU64,
    start: Instant,
}

impl Default for IngestProgress {
    fn default() -> Self {
        Self {
            lines: AtomicU64::new(0),
            records: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            blank_lines: AtomicU64::new(0),
            members: AtomicU64::new(0),
            members_skipped: AtomicU64::new(0),
            members_resumed: AtomicU64::new(0),
            start: Instant::now(),
        }
    }
}

impl IngestProgress {
    pub fn lines_per_second(&self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.lines.load(Ordering::Relaxed) as f64 / secs
        } else {
            0.0
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub lines: u64,
    pub records: u64,
    pub parse_errors: u64,
    pub blank_lines: u64,
    pub members: u64,
    pub members_skipped: u64,
    pub members_resumed: u64,
    pub batches_loaded: u64,
    pub rows_loaded: u64,

    /// Batch files left on disk (`process` mode)
    pub batch_files: Vec<PathBuf>,

    pub duration: Duration,
    pub final_state: PipelineState,
}

impl IngestSummary {
    pub fn interrupted(&self) -> bool {
        self.final_state == PipelineState::Interrupted
    }
}

/// One ingestion run
pub struct IngestPipeline {
    options: IngestOptions,
    parse: ParseFn,
    interner: Option<Arc<SourceInterner>>,
    target: Option<LoadTarget>,
    shutdown: Arc<AtomicBool>,
    progress: Arc<IngestProgress>,
    state: PipelineState,
}

impl IngestPipeline {
    /// Pipeline that only writes batch files (`process`)
    ///
    /// The first batch column holds the source label instead of an id.
    pub fn process(options: IngestOptions, registry: &ParserRegistry) -> Result<Self> {
        Self::build(options, registry, None, None)
    }

    /// Pipeline that loads batches into a store (`import`)
    pub fn import(
        options: IngestOptions,
        registry: &ParserRegistry,
        interner: Arc<SourceInterner>,
        target: LoadTarget,
    ) -> Result<Self> {
        Self::build(options, registry, Some(interner), Some(target))
    }

    fn build(
        options: IngestOptions,
        registry: &ParserRegistry,
        interner: Option<Arc<SourceInterner>>,
        target: Option<LoadTarget>,
    ) -> Result<Self> {
        let parse = registry.resolve(&options.parser)?;
        Ok(Self {
            options,
            parse,
            interner,
            target,
            shutdown: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(IngestProgress::default()),
            state: PipelineState::Idle,
        })
    }

    /// Flag that stops the run at the next line
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn progress(&self) -> Arc<IngestProgress> {
        Arc::clone(&self.progress)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    /// Run to completion
    pub fn run(mut self) -> Result<IngestSummary> {
        let start = Instant::now();

        let done = if self.options.resume {
            let done = RunLogs::read_done(&self.options.done_log)?;
            info!(members = done.len(), log = %self.options.done_log.display(), "Resuming run");
            done
        } else {
            HashSet::new()
        };
        let mut logs = RunLogs::open(
            &self.options.err_log,
            &self.options.done_log,
            &self.options.skip_log,
        )?;

        let scheduler = match &self.target {
            Some(target) => {
                target.maintenance.check_available()?;
                target.maintenance.record_status(STATUS_IMPORTING)?;
                target.maintenance.disable_indexes()?;
                Some(LoadScheduler::new(Arc::clone(&target.loader)))
            }
            None => None,
        };
        if scheduler.is_some() {
            self.transition(PipelineState::IndexesDisabled);
        }

        let mut writer = RotatingBatchWriter::create(
            self.options.batch_prefix.clone(),
            self.options.batch_suffix.clone(),
            self.options.batch_lines,
        )?;
        if let Some(scheduler) = &scheduler {
            let scheduler = scheduler.clone();
            writer.on_rotate(Box::new(move |path: &std::path::Path| -> Result<()> {
                scheduler.spawn(path.to_path_buf())?;
                Ok(())
            }));
        }

        self.transition(PipelineState::Streaming);
        let mut interrupted = false;
        match self.stream_inputs(&mut writer, &mut logs, &done) {
            Ok(()) => {}
            Err(DumpError::Interrupted) => {
                warn!("Interrupted, finishing the current batch");
                interrupted = true;
                self.transition(PipelineState::Interrupted);
            }
            Err(e) => {
                if let Some(scheduler) = &scheduler {
                    if let Err(load_err) = scheduler.join() {
                        warn!(error = %load_err, "Outstanding load failed during shutdown");
                    }
                }
                return Err(e);
            }
        }
        logs.flush()?;

        self.transition(PipelineState::FinalFlush);
        let batch_files = writer.file_names();
        let last = writer.finish()?;

        let (batches_loaded, rows_loaded) = match &scheduler {
            Some(scheduler) => {
                let loaded = scheduler.load_now(&last);
                let joined = scheduler.join();
                loaded?;
                joined?;
                (scheduler.files_loaded(), scheduler.rows_loaded())
            }
            None => (0, 0),
        };

        if let Some(target) = &self.target {
            let tmp_dir = target.tmp_dir.as_deref();
            if target.compress {
                target.maintenance.compress(tmp_dir)?;
            }
            target
                .maintenance
                .rebuild_indexes(target.sort_buffer_bytes, tmp_dir)?;
            target.maintenance.record_status(if interrupted {
                STATUS_INTERRUPTED
            } else {
                STATUS_COMPLETED
            })?;
            self.transition(PipelineState::IndexesRestored);
        }

        self.transition(if interrupted {
            PipelineState::Interrupted
        } else {
            PipelineState::Done
        });

        let p = &self.progress;
        let summary = IngestSummary {
            lines: p.lines.load(Ordering::Relaxed),
            records: p.records.load(Ordering::Relaxed),
            parse_errors: p.parse_errors.load(Ordering::Relaxed),
            blank_lines: p.blank_lines.load(Ordering::Relaxed),
            members: p.members.load(Ordering::Relaxed),
            members_skipped: p.members_skipped.load(Ordering::Relaxed),
            members_resumed: p.members_resumed.load(Ordering::Relaxed),
            batches_loaded,
            rows_loaded,
            batch_files: if self.target.is_some() { Vec::new() } else { batch_files },
            duration: start.elapsed(),
            final_state: self.state,
        };

        info!(
            lines = summary.lines,
            records = summary.records,
            parse_errors = summary.parse_errors,
            rows_loaded = summary.rows_loaded,
            state = %summary.final_state,
            "Ingestion finished"
        );
        Ok(summary)
    }

    fn stream_inputs(
        &self,
        writer: &mut RotatingBatchWriter,
        logs: &mut RunLogs,
        done: &HashSet<String>,
    ) -> Result<()> {
        for input in &self.options.inputs {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(DumpError::Interrupted);
            }
            info!(input = %input.display(), "Reading input");
            source::read(input, |member, lines| {
                self.stream_member(member, lines, writer, logs, done)
            })?;
        }
        Ok(())
    }

    fn stream_member(
        &self,
        member: &str,
        lines: &mut MemberLines<'_>,
        writer: &mut RotatingBatchWriter,
        logs: &mut RunLogs,
        done: &HashSet<String>,
    ) -> Result<()> {
        if done.contains(member) {
            debug!(member, "Already processed, skipping");
            IngestProgress::bump(&self.progress.members_resumed);
            return Ok(());
        }
        if !self.options.accepts(member) {
            debug!(member, "Extension not accepted, skipping");
            logs.log_skipped(member)?;
            IngestProgress::bump(&self.progress.members_skipped);
            return Ok(());
        }

        for line in lines {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(DumpError::Interrupted);
            }
            let line = line?;
            IngestProgress::bump(&self.progress.lines);

            if line.is_empty() {
                IngestProgress::bump(&self.progress.blank_lines);
                continue;
            }

            match (self.parse)(&line, member) {
                Ok(mut record) => {
                    if let Some(interner) = &self.interner {
                        record.source_id = Some(interner.resolve_id(&record.source)?);
                    }
                    record.derive_email_fields();
                    writer.write(record.to_batch_line().as_bytes())?;
                    IngestProgress::bump(&self.progress.records);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    trace!(member, error = %e, "Unparseable line");
                    logs.log_error_line(&line)?;
                    IngestProgress::bump(&self.progress.parse_errors);
                }
            }
        }

        logs.log_done(member)?;
        IngestProgress::bump(&self.progress.members);
        Ok(())
    }
}
