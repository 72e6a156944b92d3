//! Output module for crawl results
//!
//! This module handles:
//! - The summary returned by a finished crawl
//! - Printing that summary for the command line

pub mod stats;

pub use stats::{print_summary, CrawlSummary, StopReason};
