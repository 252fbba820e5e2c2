//! dumpdb - bulk ingestion and multi-store search for credential dumps
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use dumpdb::config::{CliArgs, Command, ImportOptions, IngestArgs, IngestOptions, SearchOptions};
use dumpdb::db::{self, schema, SourceInterner, SqliteLoader, SqliteMaintenance};
use dumpdb::parser::ParserRegistry;
use dumpdb::pipeline::{IngestPipeline, IngestSummary, LoadTarget};
use dumpdb::progress::{print_header, print_search_summary, print_summary, ProgressReporter};
use dumpdb::search::SearchFanout;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match args.command {
        Command::Init { stores, sources } => run_init(&stores, sources.as_deref()),
        Command::Process { inputs, ingest } => run_process(inputs, &ingest, args.quiet),
        Command::Import {
            inputs,
            store,
            sources,
            compress,
            tmp_dir,
            sort_buffer_mb,
            ingest,
        } => {
            let ingest = IngestOptions::from_args(inputs, &ingest, args.quiet)
                .context("Invalid configuration")?;
            let options = ImportOptions::new(ingest, store, sources, compress, tmp_dir, sort_buffer_mb)
                .context("Invalid configuration")?;
            run_import(options)
        }
        Command::Search {
            stores,
            query,
            columns,
            sources,
            format,
        } => {
            let options = SearchOptions::new(stores, query, &columns, sources, &format)
                .context("Invalid configuration")?;
            run_search(options, args.quiet)
        }
        Command::Parsers => {
            for name in ParserRegistry::with_builtin().names() {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_init(stores: &[PathBuf], sources: Option<&Path>) -> Result<ExitCode> {
    if let Some(sources) = sources {
        schema::init_sources(sources)
            .with_context(|| format!("Failed to initialise sources store {}", sources.display()))?;
        info!(store = %sources.display(), "Initialised sources store");
    }

    for store in stores {
        schema::init_store(store, sources.is_none())
            .with_context(|| format!("Failed to initialise store {}", store.display()))?;
        info!(store = %store.display(), "Initialised store");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_process(inputs: Vec<PathBuf>, args: &IngestArgs, quiet: bool) -> Result<ExitCode> {
    let options = IngestOptions::from_args(inputs, args, quiet).context("Invalid configuration")?;
    let show_progress = options.show_progress;

    if show_progress {
        print_header(options.inputs.len(), &options.parser, &format!("{}*", options.batch_prefix));
    }

    let pipeline = IngestPipeline::process(options, &ParserRegistry::with_builtin())
        .context("Failed to initialise pipeline")?;
    let summary = drive(pipeline, show_progress)?;

    if show_progress {
        print_summary(&summary, None);
    }
    Ok(exit_code(&summary))
}

fn run_import(options: ImportOptions) -> Result<ExitCode> {
    let show_progress = options.ingest.show_progress;
    if show_progress {
        print_header(
            options.ingest.inputs.len(),
            &options.ingest.parser,
            &options.store.display().to_string(),
        );
    }

    let interner = SourceInterner::open(&options.sources)
        .with_context(|| format!("Failed to open sources store {}", options.sources.display()))?;
    let loader = SqliteLoader::new(&options.store)
        .with_context(|| format!("Failed to open store {}", options.store.display()))?;

    let sort_buffer_bytes = options
        .sort_buffer_bytes
        .unwrap_or_else(db::default_sort_buffer_bytes);
    info!(sort_buffer_mib = sort_buffer_bytes / (1024 * 1024), "Index rebuild sort buffer");

    let target = LoadTarget {
        loader: Arc::new(loader),
        maintenance: Box::new(SqliteMaintenance::new(&options.store)),
        compress: options.compress,
        tmp_dir: options.tmp_dir.clone(),
        sort_buffer_bytes,
    };

    let pipeline = IngestPipeline::import(
        options.ingest,
        &ParserRegistry::with_builtin(),
        Arc::new(interner),
        target,
    )
    .context("Failed to initialise pipeline")?;
    let summary = drive(pipeline, show_progress)?;

    if show_progress {
        print_summary(&summary, Some(&options.store));
    }
    Ok(exit_code(&summary))
}

/// Run a pipeline with signal handling and progress display
fn drive(pipeline: IngestPipeline, show_progress: bool) -> Result<IngestSummary> {
    install_interrupt_handler(pipeline.shutdown_flag())?;

    let mut progress = show_progress.then(ProgressReporter::new);
    if let Some(p) = progress.as_mut() {
        p.set_status("Reading inputs...");
        p.watch(pipeline.progress());
    }

    let result = pipeline.run();

    if let Some(p) = progress.as_mut() {
        match &result {
            Ok(summary) if summary.interrupted() => p.finish("Ingestion interrupted"),
            Ok(_) => p.finish("Ingestion completed"),
            Err(_) => p.finish_and_clear(),
        }
    }

    let summary = result.context("Ingestion failed")?;
    if summary.interrupted() {
        warn!("Ingestion was interrupted before completion");
    }
    if summary.parse_errors > 0 {
        info!(errors = summary.parse_errors, "Ingestion completed with unparseable lines");
    }
    Ok(summary)
}

fn run_search(options: SearchOptions, quiet: bool) -> Result<ExitCode> {
    let fanout = match &options.sources {
        Some(sources) => {
            let interner = SourceInterner::open_read_only(sources)
                .with_context(|| format!("Failed to open sources store {}", sources.display()))?;
            SearchFanout::with_sources(Arc::new(interner))
        }
        None => SearchFanout::new(),
    };

    let formatter = options.format.formatter();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let report = fanout
        .search(
            &options.stores,
            &options.query,
            &options.columns,
            formatter.as_ref(),
            &mut out,
        )
        .context("Search failed")?;
    drop(out);

    if !quiet {
        print_search_summary(&report);
    }

    if report.failed() > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn install_interrupt_handler(shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    // Setup signal handler for graceful shutdown
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing the current batch...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;
    Ok(())
}

fn exit_code(summary: &IngestSummary) -> ExitCode {
    if summary.interrupted() {
        // Conventional 128 + SIGINT
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("dumpdb=debug,warn")
    } else {
        EnvFilter::new("dumpdb=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
