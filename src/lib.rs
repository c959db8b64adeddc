//! Lurker: a forum archiver built around a durable crawl queue
//!
//! This crate walks a forum (index → boards → topics → posts), stores boards,
//! topics, posts, accounts and attachments in SQLite, and schedules every page
//! fetch through a persistent task queue so interrupted or repeated crawls
//! converge instead of duplicating work.

pub mod assets;
pub mod config;
pub mod crawler;
pub mod identity;
pub mod output;
pub mod processor;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Lurker operations
#[derive(Debug, Error)]
pub enum LurkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Page identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::WorkerState,
        to: state::WorkerState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while parsing or rewriting page identities
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Failed to parse URL '{url}': {message}")]
    Parse { url: String, message: String },

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("URL {url} is not a valid {expected} page")]
    InvalidIdentity { expected: String, url: String },

    #[error("Offset must not be negative, got {0}")]
    NegativeOffset(i64),
}

/// Result type alias for Lurker operations
pub type Result<T> = std::result::Result<T, LurkerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for identity operations
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

// Re-export commonly used types
pub use config::Config;
pub use identity::{classify, normalize, PageIdentity, PageKind};
pub use state::{TaskState, WorkerState};
