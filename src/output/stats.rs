//! Post-run crawl statistics
//!
//! This module holds the summary a finished crawl hands back and the
//! function that prints it for the CLI.

use crate::proxy::ProxyStats;
use crate::state::SkipReason;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Why the coordinator stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// Queue drained, no worker busy, grace period elapsed
    #[default]
    Completed,

    /// No progress for the configured number of status checks
    Stalled,

    /// Cancelled from outside, e.g. Ctrl-C
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Stalled => f.write_str("stalled"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Summary of a finished crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub start_url: String,
    pub domain: String,
    pub stop_reason: StopReason,

    /// URLs claimed by a worker, sorted
    pub visited: Vec<String>,
    pub scraped: usize,
    pub failed: usize,
    pub skipped: HashMap<SkipReason, usize>,

    /// File URLs that matched the download criteria, sorted
    pub discovered_files: Vec<String>,
    pub downloaded_files: Vec<PathBuf>,
    pub download_failures: usize,

    pub proxies: ProxyStats,
    /// Rate limiter delay when the crawl ended
    pub final_delay: Duration,
    pub elapsed: Duration,
}

impl CrawlSummary {
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Prints the summary to stdout
///
/// # Arguments
///
/// * `summary` - The summary to display
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Target:");
    println!("  Start URL: {}", summary.start_url);
    println!("  Domain: {}", summary.domain);
    println!(
        "  Finished: {} after {:.1}s",
        summary.stop_reason,
        summary.elapsed.as_secs_f64()
    );
    println!();

    println!("Pages:");
    println!("  Visited: {}", summary.visited_count());
    println!("  Scraped: {}", summary.scraped);
    println!("  Failed: {}", summary.failed);
    println!("  Skipped: {}", summary.skipped_total());
    for reason in SkipReason::ALL {
        if let Some(count) = summary.skipped.get(&reason).filter(|c| **c > 0) {
            println!("    {}: {}", reason, count);
        }
    }
    println!();

    println!("Files:");
    println!("  Discovered: {}", summary.discovered_files.len());
    println!("  Downloaded: {}", summary.downloaded_files.len());
    if summary.download_failures > 0 {
        println!("  Failed downloads: {}", summary.download_failures);
    }
    println!();

    if summary.proxies.total > 0 {
        println!("Proxies:");
        println!(
            "  Working: {} / Failed: {} / Total: {}",
            summary.proxies.working, summary.proxies.failed, summary.proxies.total
        );
        println!();
    }

    println!(
        "Final request delay: {:.2}s",
        summary.final_delay.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut skipped = HashMap::new();
        skipped.insert(SkipReason::AlreadyVisited, 4);
        skipped.insert(SkipReason::OutOfScope, 2);

        let summary = CrawlSummary {
            visited: vec!["https://example.com/".to_string()],
            skipped,
            ..CrawlSummary::default()
        };

        assert_eq!(summary.visited_count(), 1);
        assert_eq!(summary.skipped_total(), 6);
        assert_eq!(summary.stop_reason, StopReason::Completed);
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::Stalled.to_string(), "stalled");
        assert_eq!(StopReason::Cancelled.to_string(), "cancelled");
    }
}
