//! Progress reporting for crawl and build workers
//!
//! Provides real-time progress display using indicatif spinners.

use crate::worker::{WorkerProgress, WorkerStats};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner that displays worker counters
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let spinner = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(spinner);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &WorkerProgress) {
        let secs = progress.elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            progress.directories as f64 / secs
        } else {
            0.0
        };

        self.bar.set_message(format!(
            "Dirs: {} | Files: {} | Queued: {} | Rate: {:.0}/s | Busy: {} | Retried: {} | Dead: {}",
            style(format_number(progress.directories)).cyan(),
            style(format_number(progress.files)).green(),
            style(format_number(progress.children)).blue(),
            rate,
            progress.busy,
            if progress.abandoned > 0 {
                style(progress.abandoned).yellow().to_string()
            } else {
                style(progress.abandoned).dim().to_string()
            },
            if progress.dead_lettered > 0 {
                style(progress.dead_lettered).red().to_string()
            } else {
                style(progress.dead_lettered).dim().to_string()
            },
        ));
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of a finished worker run
pub fn print_summary(title: &str, stats: &WorkerStats) {
    let secs = stats.duration.as_secs_f64();
    let rate = if secs > 0.0 {
        stats.directories as f64 / secs
    } else {
        0.0
    };

    println!();
    println!("{}", style(title).green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(stats.directories)
    );
    println!("  {} {}", style("Files:").bold(), format_number(stats.files));
    println!(
        "  {} {}",
        style("Items enqueued:").bold(),
        format_number(stats.children)
    );
    println!(
        "  {} {} ({} completed)",
        style("Messages:").bold(),
        format_number(stats.received),
        format_number(stats.completed)
    );
    if stats.abandoned > 0 {
        println!(
            "  {} {}",
            style("Retried:").bold(),
            style(stats.abandoned).yellow()
        );
    }
    if stats.dead_lettered > 0 {
        println!(
            "  {} {}",
            style("Dead-lettered:").bold(),
            style(stats.dead_lettered).red()
        );
    }
    if stats.errors > 0 {
        println!("  {} {}", style("Errors:").bold(), style(stats.errors).red());
    }
    println!(
        "  {} {:.1}s ({:.0} dirs/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
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
    }
}
