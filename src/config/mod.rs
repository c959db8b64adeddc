//! Configuration module for Lurker
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use lurker::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("lurker.toml")).unwrap();
//! println!("Crawler will use {} workers", config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AssetsConfig, Config, CrawlerConfig, ForumConfig, StorageConfig, UserAgentConfig,
    MIN_REQUESTS_PER_SECOND,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
