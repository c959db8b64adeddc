//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! archive and queue statistics from the storage layer.

use crate::identity::PageKind;
use crate::storage::{
    EntityCounts, EntityRepository, FailureRecord, RunRecord, StorageResult, TaskStore,
};
use std::collections::HashMap;

/// Archive and queue statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Rows per entity table
    pub entities: EntityCounts,

    /// Pending tasks per kind
    pub pending_by_kind: HashMap<PageKind, u64>,

    /// Entries in the done ledger
    pub tasks_done: u64,

    /// Entries in the failure ledger
    pub tasks_failed: u64,

    /// Failure counts per category
    pub failure_summary: HashMap<String, u64>,

    /// Most recent crawl run, if any
    pub latest_run: Option<RunRecord>,
}

impl CrawlStatistics {
    /// Total pending tasks across all kinds
    pub fn pending_total(&self) -> u64 {
        self.pending_by_kind.values().sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The database holding the queue and the forum entities
pub fn load_statistics<S>(storage: &S) -> StorageResult<CrawlStatistics>
where
    S: TaskStore + EntityRepository,
{
    Ok(CrawlStatistics {
        entities: storage.entity_counts()?,
        pending_by_kind: storage.pending_by_kind()?,
        tasks_done: storage.count_done()?,
        tasks_failed: storage.count_failed()?,
        failure_summary: storage.failure_summary()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Archive:");
    println!("  Boards: {}", stats.entities.boards);
    println!("  Topics: {}", stats.entities.topics);
    println!("  Posts: {}", stats.entities.posts);
    println!("  Accounts: {}", stats.entities.accounts);
    println!(
        "  Assets: {} ({} downloaded)",
        stats.entities.assets, stats.entities.assets_fetched
    );
    println!();

    println!("Queue:");
    println!("  Pending: {}", stats.pending_total());
    let mut pending: Vec<_> = stats.pending_by_kind.iter().collect();
    pending.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (kind, count) in pending {
        println!("    {}: {}", kind, count);
    }
    println!("  Done: {}", stats.tasks_done);
    println!("  Failed: {}", stats.tasks_failed);
    println!();

    if !stats.failure_summary.is_empty() {
        println!("Failure Summary:");
        let mut failures: Vec<_> = stats.failure_summary.iter().collect();
        failures.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

        for (category, count) in failures {
            println!("  {}: {}", category, count);
        }
        println!();
    }

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  Run ID: {} ({})", run.id, run.phase);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!(
                "  Tasks: {} done, {} failed",
                run.tasks_done, run.tasks_failed
            );
        }
        None => println!("No crawl runs recorded yet."),
    }

    let settled = stats.tasks_done + stats.tasks_failed;
    let success_rate = if settled > 0 {
        (stats.tasks_done as f64 / settled as f64) * 100.0
    } else {
        0.0
    };
    println!();
    println!(
        "Success Rate: {:.1}% ({} / {} tasks completed)",
        success_rate, stats.tasks_done, settled
    );
}

/// Prints the given failure ledger entries, newest first
pub fn print_failures(failures: &[FailureRecord]) {
    if failures.is_empty() {
        println!("No failures recorded.");
        return;
    }

    println!("=== Recent Failures ({}) ===\n", failures.len());
    for failure in failures {
        println!(
            "[{}] {} {} ({})",
            failure.failed_at, failure.kind, failure.url, failure.category
        );
        println!("    {}", failure.message);
    }
}
