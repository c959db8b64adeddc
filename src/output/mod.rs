//! Output module for crawl reports
//!
//! This module handles:
//! - Loading archive, queue and ledger statistics
//! - Printing statistics and the failure ledger for the CLI

pub mod stats;

pub use stats::{load_statistics, print_failures, print_statistics, CrawlStatistics};
