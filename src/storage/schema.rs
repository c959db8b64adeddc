//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Lurker database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    phase TEXT NOT NULL,
    status TEXT NOT NULL,
    tasks_done INTEGER NOT NULL DEFAULT 0,
    tasks_failed INTEGER NOT NULL DEFAULT 0
);

-- Pending and claimed work; one row per canonical URL
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    entity_id INTEGER,
    locked_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(kind, locked_at, created_at);

-- Append-only ledger of completed tasks
CREATE TABLE IF NOT EXISTS tasks_done (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    url TEXT NOT NULL,
    entity_id INTEGER,
    done_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_done_url ON tasks_done(url, done_at);

-- Append-only ledger of failed tasks
CREATE TABLE IF NOT EXISTS tasks_failed (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    url TEXT NOT NULL,
    entity_id INTEGER,
    category TEXT NOT NULL,
    message TEXT NOT NULL,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_failed_url ON tasks_failed(url, failed_at);
CREATE INDEX IF NOT EXISTS idx_tasks_failed_category ON tasks_failed(category);

-- Binary resources, unique by source URL
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    path TEXT,
    mime_type TEXT,
    size INTEGER,
    sha256 TEXT,
    content BLOB,
    fetched_at TEXT
);

CREATE TABLE IF NOT EXISTS boards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    description TEXT,
    parent_id INTEGER REFERENCES boards(id)
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    avatar_id INTEGER REFERENCES assets(id)
);

CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    author_id INTEGER REFERENCES accounts(id),
    board_id INTEGER NOT NULL REFERENCES boards(id),
    created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_topics_board ON topics(board_id);

CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    url TEXT NOT NULL,
    author_id INTEGER REFERENCES accounts(id),
    topic_id INTEGER NOT NULL REFERENCES topics(id),
    created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_posts_topic ON posts(topic_id);

CREATE TABLE IF NOT EXISTS post_attachments (
    post_id INTEGER NOT NULL REFERENCES posts(id),
    asset_id INTEGER NOT NULL REFERENCES assets(id),
    PRIMARY KEY (post_id, asset_id)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Gets the current schema version
pub fn get_schema_version() -> u32 {
    1
}
