//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `TaskStore` and
//! `EntityRepository` traits. A single connection sits behind a mutex; the lock
//! is only held for one statement or one short transaction.

use crate::identity::{PageIdentity, PageKind};
use crate::state::TaskState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{EntityRepository, StorageError, StorageResult, TaskStore};
use crate::storage::{
    db_timestamp, AssetContent, AssetRecord, DoneRecord, EnqueueOutcome, EntityCounts,
    FailureRecord, RunRecord, RunStatus, TaskRecord,
};
use crate::LurkerError;
use chrono::{Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Default recency window for the done-ledger dedup check
const DEFAULT_DEDUP_WINDOW_SECS: i64 = 3600;

const TASK_COLUMNS: &str = "id, kind, url, entity_id, locked_at, created_at";
const FAILURE_COLUMNS: &str = "id, task_id, kind, url, entity_id, category, message, failed_at";
const ASSET_COLUMNS: &str = "id, name, url, path, mime_type, size, sha256, fetched_at";
const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, phase, status, tasks_done, tasks_failed";

impl FromSql for PageKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        PageKind::from_db_string(s)
            .ok_or_else(|| FromSqlError::Other(Box::new(StorageError::UnknownKind(s.to_string()))))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        RunStatus::from_db_string(s).ok_or_else(|| {
            FromSqlError::Other(Box::new(StorageError::UnknownRunStatus(s.to_string())))
        })
    }
}

impl ToSql for PageKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_db_string()))
    }
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    dedup_window: Duration,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(LurkerError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, LurkerError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, LurkerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
        }
    }

    /// Sets how long a completed URL is skipped by non-forced enqueues
    pub fn with_dedup_window(mut self, window: std::time::Duration) -> Self {
        self.dedup_window = Duration::from_std(window)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS));
        self
    }

    /// Empties the queue, both ledgers and every archived entity
    ///
    /// Run history is kept. Asset files written to disk are left in place.
    /// Returns the number of rows removed.
    pub fn clear_all(&self) -> StorageResult<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut removed = 0;
        for table in [
            "tasks",
            "tasks_done",
            "tasks_failed",
            "post_attachments",
            "posts",
            "topics",
            "boards",
            "accounts",
            "assets",
        ] {
            removed += tx.execute(&format!("DELETE FROM {}", table), [])? as u64;
        }
        tx.commit()?;

        tracing::warn!("Cleared {} rows from the queue, ledgers and archive", removed);
        Ok(removed)
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Builds `?start, ?start+1, ...` for an `IN (...)` list
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        url: row.get(2)?,
        entity_id: row.get(3)?,
        locked_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<FailureRecord> {
    Ok(FailureRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        kind: row.get(2)?,
        url: row.get(3)?,
        entity_id: row.get(4)?,
        category: row.get(5)?,
        message: row.get(6)?,
        failed_at: row.get(7)?,
    })
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        path: row.get(3)?,
        mime_type: row.get(4)?,
        size: row.get(5)?,
        sha256: row.get(6)?,
        fetched_at: row.get(7)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        phase: row.get(4)?,
        status: row.get(5)?,
        tasks_done: row.get::<_, i64>(6)? as u64,
        tasks_failed: row.get::<_, i64>(7)? as u64,
    })
}

/// Removes a claimed task from the pending table on its way to a ledger
fn take_claimed(tx: &Transaction<'_>, task_id: i64, next: TaskState) -> StorageResult<()> {
    let locked_at: Option<Option<String>> = tx
        .query_row(
            "SELECT locked_at FROM tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(locked_at) = locked_at else {
        return Err(StorageError::TaskNotFound(task_id));
    };

    let current = TaskState::from_lock(locked_at.is_some());
    if !current.can_transition_to(next) {
        return Err(StorageError::InvalidTransition {
            task_id,
            from: current,
            to: next,
        });
    }

    tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
    Ok(())
}

fn count(conn: &Connection, sql: &str) -> StorageResult<u64> {
    let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count as u64)
}

impl TaskStore for SqliteStorage {
    // ===== Queue =====

    fn enqueue(
        &self,
        identity: &PageIdentity,
        entity_id: Option<i64>,
        force: bool,
    ) -> StorageResult<EnqueueOutcome> {
        let url = identity.canonical_url.as_str();
        let now = Utc::now();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let pending: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE url = ?1)",
            params![url],
            |row| row.get(0),
        )?;
        if pending {
            tracing::debug!("Already queued: {}", url);
            return Ok(EnqueueOutcome::AlreadyPending);
        }

        if !force {
            let cutoff = db_timestamp(now - self.dedup_window);
            let recent: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM tasks_done WHERE url = ?1 AND done_at > ?2)",
                params![url, cutoff],
                |row| row.get(0),
            )?;
            if recent {
                tracing::debug!("Recently done, skipping: {}", url);
                return Ok(EnqueueOutcome::RecentlyDone);
            }
        }

        let inserted: Option<i64> = tx
            .query_row(
                "INSERT INTO tasks (kind, url, entity_id, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(url) DO NOTHING
                 RETURNING id",
                params![identity.kind, url, entity_id, db_timestamp(now)],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;

        match inserted {
            Some(id) => {
                tracing::info!("Queued {} task {}: {}", identity.kind, id, url);
                Ok(EnqueueOutcome::Inserted(id))
            }
            None => Ok(EnqueueOutcome::AlreadyPending),
        }
    }

    fn claim(&self, kinds: &[PageKind]) -> StorageResult<Option<TaskRecord>> {
        if kinds.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "UPDATE tasks SET locked_at = ?1
             WHERE id = (
                 SELECT id FROM tasks
                 WHERE locked_at IS NULL AND kind IN ({})
                 ORDER BY created_at, id
                 LIMIT 1
             )
             AND locked_at IS NULL
             RETURNING {}",
            placeholders(2, kinds.len()),
            TASK_COLUMNS
        );

        let now = db_timestamp(Utc::now());
        let mut values: Vec<&dyn ToSql> = vec![&now];
        values.extend(kinds.iter().map(|k| k as &dyn ToSql));

        let conn = self.conn()?;
        let task = conn
            .query_row(&sql, params_from_iter(values), task_from_row)
            .optional()?;

        if let Some(task) = &task {
            tracing::debug!("Claimed {} task {}: {}", task.kind, task.id, task.url);
        }
        Ok(task)
    }

    fn size(&self, kinds: &[PageKind]) -> StorageResult<u64> {
        if kinds.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "SELECT COUNT(*) FROM tasks WHERE kind IN ({})",
            placeholders(1, kinds.len())
        );
        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(kinds.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn mark_done(&self, task: &TaskRecord) -> StorageResult<DoneRecord> {
        let done_at = db_timestamp(Utc::now());

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        take_claimed(&tx, task.id, TaskState::Done)?;
        tx.execute(
            "INSERT INTO tasks_done (task_id, kind, url, entity_id, done_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task.id, task.kind, task.url, task.entity_id, done_at],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!("Done {} task {}: {}", task.kind, task.id, task.url);

        Ok(DoneRecord {
            id,
            task_id: task.id,
            kind: task.kind,
            url: task.url.clone(),
            entity_id: task.entity_id,
            done_at,
        })
    }

    fn mark_failed(
        &self,
        task: &TaskRecord,
        category: &str,
        message: &str,
    ) -> StorageResult<FailureRecord> {
        let failed_at = db_timestamp(Utc::now());

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        take_claimed(&tx, task.id, TaskState::Failed)?;
        tx.execute(
            "INSERT INTO tasks_failed (task_id, kind, url, entity_id, category, message, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.id,
                task.kind,
                task.url,
                task.entity_id,
                category,
                message,
                failed_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(FailureRecord {
            id,
            task_id: task.id,
            kind: task.kind,
            url: task.url.clone(),
            entity_id: task.entity_id,
            category: category.to_string(),
            message: message.to_string(),
            failed_at,
        })
    }

    fn release_claims(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let released = conn.execute(
            "UPDATE tasks SET locked_at = NULL WHERE locked_at IS NOT NULL",
            [],
        )?;
        Ok(released as u64)
    }

    fn clear_pending(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM tasks", [])?;
        Ok(removed as u64)
    }

    // ===== Ledger queries =====

    fn pending_by_kind(&self) -> StorageResult<HashMap<PageKind, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM tasks GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, PageKind>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (kind, count) = row?;
            counts.insert(kind, count as u64);
        }
        Ok(counts)
    }

    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<FailureRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks_failed ORDER BY failed_at DESC, id DESC LIMIT ?1",
            FAILURE_COLUMNS
        ))?;
        let failures = stmt
            .query_map(params![limit as i64], failure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }

    fn failure_summary(&self) -> StorageResult<HashMap<String, u64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT category, COUNT(*) FROM tasks_failed GROUP BY category")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut summary = HashMap::new();
        for row in rows {
            let (category, count) = row?;
            summary.insert(category, count as u64);
        }
        Ok(summary)
    }

    fn count_done(&self) -> StorageResult<u64> {
        count(&*self.conn()?, "SELECT COUNT(*) FROM tasks_done")
    }

    fn count_failed(&self) -> StorageResult<u64> {
        count(&*self.conn()?, "SELECT COUNT(*) FROM tasks_failed")
    }

    // ===== Run Management =====

    fn create_run(&self, config_hash: &str, phase: &str) -> StorageResult<i64> {
        let now = db_timestamp(Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, phase, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, config_hash, phase, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        tasks_done: u64,
        tasks_failed: u64,
    ) -> StorageResult<()> {
        let now = db_timestamp(Utc::now());
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, tasks_done = ?3, tasks_failed = ?4
             WHERE id = ?5",
            params![
                status.to_db_string(),
                now,
                tasks_done as i64,
                tasks_failed as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }
}

impl EntityRepository for SqliteStorage {
    fn upsert_board(
        &self,
        oid: &str,
        name: &str,
        url: &str,
        description: Option<&str>,
        parent_oid: Option<&str>,
    ) -> StorageResult<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO boards (oid, name, url, description, parent_id)
             VALUES (?1, ?2, ?3, ?4, (SELECT id FROM boards WHERE oid = ?5))
             ON CONFLICT(oid) DO UPDATE SET
                 name = excluded.name,
                 url = excluded.url,
                 description = COALESCE(excluded.description, boards.description),
                 parent_id = COALESCE(excluded.parent_id, boards.parent_id)
             RETURNING id",
            params![oid, name, url, description, parent_oid],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn upsert_topic(
        &self,
        oid: &str,
        url: &str,
        title: &str,
        author_id: Option<i64>,
        board_id: i64,
        created_at: Option<&str>,
    ) -> StorageResult<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO topics (oid, url, title, author_id, board_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(oid) DO UPDATE SET
                 url = excluded.url,
                 title = excluded.title,
                 author_id = COALESCE(excluded.author_id, topics.author_id),
                 board_id = excluded.board_id,
                 created_at = COALESCE(excluded.created_at, topics.created_at)
             RETURNING id",
            params![oid, url, title, author_id, board_id, created_at],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn upsert_post(
        &self,
        oid: &str,
        content: &str,
        url: &str,
        author_id: Option<i64>,
        topic_id: i64,
        created_at: Option<&str>,
    ) -> StorageResult<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO posts (oid, content, url, author_id, topic_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(oid) DO UPDATE SET
                 content = excluded.content,
                 url = excluded.url,
                 author_id = COALESCE(excluded.author_id, posts.author_id),
                 topic_id = excluded.topic_id,
                 created_at = COALESCE(excluded.created_at, posts.created_at)
             RETURNING id",
            params![oid, content, url, author_id, topic_id, created_at],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn upsert_account(
        &self,
        oid: &str,
        name: &str,
        url: &str,
        avatar_asset_id: Option<i64>,
    ) -> StorageResult<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO accounts (oid, name, url, avatar_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(oid) DO UPDATE SET
                 name = excluded.name,
                 url = excluded.url,
                 avatar_id = COALESCE(excluded.avatar_id, accounts.avatar_id)
             RETURNING id",
            params![oid, name, url, avatar_asset_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn set_topic_author(&self, topic_id: i64, author_id: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE topics SET author_id = ?2 WHERE id = ?1",
            params![topic_id, author_id],
        )?;
        Ok(())
    }

    fn exists_board(&self, oid: &str) -> StorageResult<bool> {
        Ok(self.find_board_id(oid)?.is_some())
    }

    fn exists_topic(&self, oid: &str) -> StorageResult<bool> {
        Ok(self.find_topic_id(oid)?.is_some())
    }

    fn find_board_id(&self, oid: &str) -> StorageResult<Option<i64>> {
        let conn = self.conn()?;
        let id = conn
            .query_row("SELECT id FROM boards WHERE oid = ?1", params![oid], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    fn find_topic_id(&self, oid: &str) -> StorageResult<Option<i64>> {
        let conn = self.conn()?;
        let id = conn
            .query_row("SELECT id FROM topics WHERE oid = ?1", params![oid], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    fn link_post_asset(&self, post_id: i64, asset_id: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO post_attachments (post_id, asset_id) VALUES (?1, ?2)
             ON CONFLICT(post_id, asset_id) DO NOTHING",
            params![post_id, asset_id],
        )?;
        Ok(())
    }

    // ===== Assets =====

    fn insert_asset(&self, name: &str, url: &str) -> StorageResult<AssetRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO assets (name, url) VALUES (?1, ?2) ON CONFLICT(url) DO NOTHING",
            params![name, url],
        )?;
        let asset = conn.query_row(
            &format!("SELECT {} FROM assets WHERE url = ?1", ASSET_COLUMNS),
            params![url],
            asset_from_row,
        )?;
        Ok(asset)
    }

    fn find_asset_by_url(&self, url: &str) -> StorageResult<Option<AssetRecord>> {
        let conn = self.conn()?;
        let asset = conn
            .query_row(
                &format!("SELECT {} FROM assets WHERE url = ?1", ASSET_COLUMNS),
                params![url],
                asset_from_row,
            )
            .optional()?;
        Ok(asset)
    }

    fn get_asset(&self, asset_id: i64) -> StorageResult<AssetRecord> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM assets WHERE id = ?1", ASSET_COLUMNS),
            params![asset_id],
            asset_from_row,
        )
        .optional()?
        .ok_or(StorageError::AssetNotFound(asset_id))
    }

    fn update_asset_content(
        &self,
        asset_id: i64,
        content: &AssetContent<'_>,
    ) -> StorageResult<AssetRecord> {
        let blob = content.store_blob.then_some(content.bytes);
        let updated = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE assets SET path = ?2, mime_type = ?3, size = ?4, sha256 = ?5,
                     content = ?6, fetched_at = ?7
                 WHERE id = ?1",
                params![
                    asset_id,
                    content.path,
                    content.mime_type,
                    content.bytes.len() as i64,
                    content.sha256,
                    blob,
                    db_timestamp(Utc::now())
                ],
            )?
        };
        if updated == 0 {
            return Err(StorageError::AssetNotFound(asset_id));
        }
        self.get_asset(asset_id)
    }

    fn asset_blob(&self, asset_id: i64) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT content FROM assets WHERE id = ?1",
            params![asset_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StorageError::AssetNotFound(asset_id))
    }

    // ===== Statistics =====

    fn entity_counts(&self) -> StorageResult<EntityCounts> {
        let conn = self.conn()?;
        Ok(EntityCounts {
            boards: count(&conn, "SELECT COUNT(*) FROM boards")?,
            topics: count(&conn, "SELECT COUNT(*) FROM topics")?,
            posts: count(&conn, "SELECT COUNT(*) FROM posts")?,
            accounts: count(&conn, "SELECT COUNT(*) FROM accounts")?,
            assets: count(&conn, "SELECT COUNT(*) FROM assets")?,
            assets_fetched: count(
                &conn,
                "SELECT COUNT(*) FROM assets WHERE fetched_at IS NOT NULL",
            )?,
        })
    }
}
