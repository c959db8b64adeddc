//! Crawler module for fetching and processing forum pages
//!
//! This module contains the core crawling logic, including:
//! - The shared request budget (connection cap and request rate)
//! - HTTP fetching with retry logic
//! - HTML parsing helpers and pagination expansion
//! - Overall crawl coordination over the durable task queue

mod budget;
mod coordinator;
mod error;
mod fetcher;
mod pagination;
mod parser;
mod retry;

pub use budget::{BudgetPermit, RequestBudget};
pub use coordinator::{Coordinator, CrawlPhase, CrawlSummary, RECENT_PAGE_SIZE};
pub use error::{CrawlError, FailureCategory, FetchError};
pub use fetcher::{build_http_client, FetchedBytes, HttpFetcher};
pub use pagination::{
    expand_pagination, max_advertised_offset, pagination_offsets, MAX_PAGES, PAGE_SIZE,
};
pub use parser::{
    parse_selector, resolve_link, select_first_in, select_in, text_of, Document, SelectorError,
};
pub use retry::RetryPolicy;

use crate::config::Config;
use crate::storage::SqliteStorage;
use crate::LurkerError;
use std::path::Path;
use std::sync::Arc;

/// Runs one crawl phase against the configured database
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open (or create) the database
/// 2. Release claims left by an interrupted run
/// 3. Seed the queue for `phase`
/// 4. Work the queue until it drains, Ctrl-C or the run deadline
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, recorded with the run
/// * `phase` - Which part of the forum to crawl
pub async fn crawl(
    config: Config,
    config_hash: String,
    phase: CrawlPhase,
) -> Result<CrawlSummary, LurkerError> {
    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?
        .with_dedup_window(config.crawler.dedup_window());
    let coordinator = Coordinator::new(config, config_hash, Arc::new(storage))?;
    coordinator.run(phase).await
}
