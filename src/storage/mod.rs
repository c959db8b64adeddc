//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The durable task queue with its done and failure ledgers
//! - Board, topic, post, account and asset upserts
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{EntityRepository, StorageError, StorageResult, TaskStore};

use crate::identity::{parse_as, PageIdentity, PageKind};
use crate::{IdentityResult, LurkerError};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, LurkerError> {
    SqliteStorage::new(path)
}

/// Formats a timestamp for storage
///
/// The fixed microsecond precision keeps lexical order equal to time order,
/// which the claim ordering and dedup window queries rely on.
pub fn db_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A pending or claimed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: i64,
    pub kind: PageKind,
    pub url: String,
    pub entity_id: Option<i64>,
    pub locked_at: Option<String>,
    pub created_at: String,
}

impl TaskRecord {
    /// Rebuilds the page identity this task was enqueued for
    pub fn identity(&self) -> IdentityResult<PageIdentity> {
        parse_as(self.kind, &self.url)
    }
}

/// An entry of the done ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoneRecord {
    pub id: i64,
    pub task_id: i64,
    pub kind: PageKind,
    pub url: String,
    pub entity_id: Option<i64>,
    pub done_at: String,
}

/// An entry of the failure ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub id: i64,
    pub task_id: i64,
    pub kind: PageKind,
    pub url: String,
    pub entity_id: Option<i64>,
    pub category: String,
    pub message: String,
    pub failed_at: String,
}

/// Terminal result of handling one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done(DoneRecord),
    Failed(FailureRecord),
}

/// What `enqueue` did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending task was inserted with this id
    Inserted(i64),
    /// A task with the same canonical URL is already pending or claimed
    AlreadyPending,
    /// The URL was completed within the dedup window
    RecentlyDone,
}

impl EnqueueOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// A binary resource row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub path: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub sha256: Option<String>,
    pub fetched_at: Option<String>,
}

impl AssetRecord {
    pub fn is_fetched(&self) -> bool {
        self.fetched_at.is_some()
    }
}

/// Content metadata written once an asset has been downloaded
#[derive(Debug, Clone)]
pub struct AssetContent<'a> {
    pub path: Option<String>,
    pub mime_type: String,
    pub sha256: String,
    pub bytes: &'a [u8],
    /// Whether to keep the bytes in the `content` column
    pub store_blob: bool,
}

/// Row counts for the domain tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub boards: u64,
    pub topics: u64,
    pub posts: u64,
    pub accounts: u64,
    pub assets: u64,
    pub assets_fetched: u64,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub phase: String,
    pub status: RunStatus,
    pub tasks_done: u64,
    pub tasks_failed: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    TimedOut,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "timed_out" => Some(Self::TimedOut),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
