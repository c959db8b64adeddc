//! Storage traits and error types
//!
//! The crawl core only sees these two traits; `SqliteStorage` implements both
//! and is shared between workers behind an `Arc`.

use crate::identity::{PageIdentity, PageKind};
use crate::state::TaskState;
use crate::storage::{
    AssetContent, AssetRecord, DoneRecord, EnqueueOutcome, EntityCounts, FailureRecord,
    RunRecord, RunStatus, TaskRecord,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: i64,
        from: TaskState,
        to: TaskState,
    },

    #[error("Asset not found: {0}")]
    AssetNotFound(i64),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Unknown page kind in database: {0}")]
    UnknownKind(String),

    #[error("Unknown run status in database: {0}")]
    UnknownRunStatus(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable crawl queue with done and failure ledgers
///
/// Implementations must be safe to share between workers: every method takes
/// `&self` and performs its read-modify-write atomically.
pub trait TaskStore: Send + Sync {
    // ===== Queue =====

    /// Adds a task for `identity` unless it is already pending
    ///
    /// A URL completed within the dedup window is skipped as well, unless
    /// `force` is set.
    fn enqueue(
        &self,
        identity: &PageIdentity,
        entity_id: Option<i64>,
        force: bool,
    ) -> StorageResult<EnqueueOutcome>;

    /// Atomically claims the oldest unclaimed task of one of `kinds`
    fn claim(&self, kinds: &[PageKind]) -> StorageResult<Option<TaskRecord>>;

    /// Counts pending tasks of `kinds`, claimed or not
    fn size(&self, kinds: &[PageKind]) -> StorageResult<u64>;

    /// Moves a claimed task to the done ledger
    fn mark_done(&self, task: &TaskRecord) -> StorageResult<DoneRecord>;

    /// Moves a claimed task to the failure ledger
    fn mark_failed(
        &self,
        task: &TaskRecord,
        category: &str,
        message: &str,
    ) -> StorageResult<FailureRecord>;

    /// Makes every claimed task claimable again, returning how many were released
    fn release_claims(&self) -> StorageResult<u64>;

    /// Deletes every pending task, returning how many were removed
    fn clear_pending(&self) -> StorageResult<u64>;

    // ===== Ledger queries =====

    /// Pending task counts per kind
    fn pending_by_kind(&self) -> StorageResult<HashMap<PageKind, u64>>;

    /// Most recent failures, newest first
    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<FailureRecord>>;

    /// Failure counts per category
    fn failure_summary(&self) -> StorageResult<HashMap<String, u64>>;

    fn count_done(&self) -> StorageResult<u64>;

    fn count_failed(&self) -> StorageResult<u64>;

    // ===== Run Management =====

    /// Creates a new crawl run
    fn create_run(&self, config_hash: &str, phase: &str) -> StorageResult<i64>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Records the final status and task counts of a run
    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        tasks_done: u64,
        tasks_failed: u64,
    ) -> StorageResult<()>;
}

/// Persistence contract for forum entities
///
/// Upserts are keyed by the external `oid` and return the surrogate id. They
/// are idempotent: repeating one with the same arguments changes nothing.
pub trait EntityRepository: Send + Sync {
    fn upsert_board(
        &self,
        oid: &str,
        name: &str,
        url: &str,
        description: Option<&str>,
        parent_oid: Option<&str>,
    ) -> StorageResult<i64>;

    fn upsert_topic(
        &self,
        oid: &str,
        url: &str,
        title: &str,
        author_id: Option<i64>,
        board_id: i64,
        created_at: Option<&str>,
    ) -> StorageResult<i64>;

    fn upsert_post(
        &self,
        oid: &str,
        content: &str,
        url: &str,
        author_id: Option<i64>,
        topic_id: i64,
        created_at: Option<&str>,
    ) -> StorageResult<i64>;

    fn upsert_account(
        &self,
        oid: &str,
        name: &str,
        url: &str,
        avatar_asset_id: Option<i64>,
    ) -> StorageResult<i64>;

    /// Sets the author of a topic that was first seen without one
    fn set_topic_author(&self, topic_id: i64, author_id: i64) -> StorageResult<()>;

    fn exists_board(&self, oid: &str) -> StorageResult<bool>;

    fn exists_topic(&self, oid: &str) -> StorageResult<bool>;

    fn find_board_id(&self, oid: &str) -> StorageResult<Option<i64>>;

    fn find_topic_id(&self, oid: &str) -> StorageResult<Option<i64>>;

    /// Links an asset to a post; linking twice is a no-op
    fn link_post_asset(&self, post_id: i64, asset_id: i64) -> StorageResult<()>;

    // ===== Assets =====

    /// Inserts a placeholder row for `url` or returns the existing one
    fn insert_asset(&self, name: &str, url: &str) -> StorageResult<AssetRecord>;

    fn find_asset_by_url(&self, url: &str) -> StorageResult<Option<AssetRecord>>;

    fn get_asset(&self, asset_id: i64) -> StorageResult<AssetRecord>;

    /// Stores downloaded content metadata (and optionally the bytes)
    fn update_asset_content(
        &self,
        asset_id: i64,
        content: &AssetContent<'_>,
    ) -> StorageResult<AssetRecord>;

    /// Reads back the bytes kept in the database, if any
    fn asset_blob(&self, asset_id: i64) -> StorageResult<Option<Vec<u8>>>;

    // ===== Statistics =====

    fn entity_counts(&self) -> StorageResult<EntityCounts>;
}
