//! Progress reporting for ingestion and search
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::pipeline::{IngestProgress, IngestSummary};
use crate::search::SearchReport;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the spinner message is refreshed from the counters
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Progress reporter that displays ingestion status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,

    /// Stop signal for the refresh thread
    stop: Arc<AtomicBool>,

    refresher: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            stop: Arc::new(AtomicBool::new(false)),
            refresher: None,
        }
    }

    /// Refresh the message from `progress` until finished
    pub fn watch(&mut self, progress: Arc<IngestProgress>) {
        let bar = self.bar.clone();
        let stop = Arc::clone(&self.stop);

        let spawned = thread::Builder::new()
            .name("progress".into())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    bar.set_message(ingest_message(&progress));
                    thread::sleep(REFRESH_INTERVAL);
                }
            });
        // Without a refresh thread the spinner still ticks
        self.refresher = spawned.ok();
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&mut self, message: &str) {
        self.stop_refresher();
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&mut self) {
        self.stop_refresher();
        self.bar.finish_and_clear();
    }

    fn stop_refresher(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.refresher.take() {
            let _ = handle.join();
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop_refresher();
    }
}

fn ingest_message(progress: &IngestProgress) -> String {
    format!(
        "Lines: {} | Records: {} | Errors: {} | Members: {} | Rate: {:.0}/s",
        format_number(progress.lines.load(Ordering::Relaxed)),
        format_number(progress.records.load(Ordering::Relaxed)),
        format_number(progress.parse_errors.load(Ordering::Relaxed)),
        format_number(progress.members.load(Ordering::Relaxed)),
        progress.lines_per_second(),
    )
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of an ingestion run
pub fn print_summary(summary: &IngestSummary, store: Option<&Path>) {
    let duration_secs = summary.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        summary.lines as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    if summary.interrupted() {
        println!("{}", style("Ingestion Interrupted").yellow().bold());
    } else {
        println!("{}", style("Ingestion Complete").green().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Members:").bold(), format_number(summary.members));
    if summary.members_skipped > 0 || summary.members_resumed > 0 {
        println!(
            "  {} {} skipped, {} already done",
            style("Not read:").bold(),
            format_number(summary.members_skipped),
            format_number(summary.members_resumed)
        );
    }
    println!("  {} {}", style("Lines:").bold(), format_number(summary.lines));
    println!("  {} {}", style("Records:").bold(), format_number(summary.records));
    println!(
        "  {} {:.1}s ({:.0} lines/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if summary.parse_errors > 0 {
        println!(
            "  {} {}",
            style("Parse errors:").yellow().bold(),
            format_number(summary.parse_errors)
        );
    }

    match store {
        Some(store) => {
            println!(
                "  {} {} rows in {} batches",
                style("Loaded:").bold(),
                format_number(summary.rows_loaded),
                format_number(summary.batches_loaded)
            );
            // Show store path with size if available
            match std::fs::metadata(store) {
                Ok(meta) => println!(
                    "  {} {} ({})",
                    style("Store:").bold(),
                    store.display(),
                    format_size(meta.len(), BINARY)
                ),
                Err(_) => println!("  {} {}", style("Store:").bold(), store.display()),
            }
        }
        None => {
            println!(
                "  {} {}",
                style("Batch files:").bold(),
                format_number(summary.batch_files.len() as u64)
            );
            if let (Some(first), Some(last)) = (summary.batch_files.first(), summary.batch_files.last()) {
                println!("    {} .. {}", first.display(), last.display());
            }
        }
    }
    println!();
}

/// Print a summary of a search to stderr, keeping stdout for results
pub fn print_search_summary(report: &SearchReport) {
    eprintln!();
    eprintln!(
        "{} {} records from {} stores in {:.2}s",
        style("Search:").bold(),
        format_number(report.rows),
        report.stores.len(),
        report.elapsed.as_secs_f64()
    );
    for failure in report.failures() {
        if let Some(e) = &failure.error {
            eprintln!("  {} {}", style("Failed:").red().bold(), e);
        }
    }
}

/// Print a header at the start of a run
pub fn print_header(inputs: usize, parser: &str, output: &str) {
    println!();
    println!(
        "{} {}",
        style("dumpdb").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Inputs:").bold(), inputs);
    println!("  {} {}", style("Parser:").bold(), parser);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_ingest_message() {
        let progress = IngestProgress::default();
        progress.lines.store(12345, Ordering::Relaxed);
        progress.records.store(12000, Ordering::Relaxed);
        let msg = ingest_message(&progress);
        assert!(msg.starts_with("Lines: 12,345 | Records: 12,000 | Errors: 0"));
    }
}
