use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Lurker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub forum: ForumConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
}

/// Slowest accepted request rate (one request every 1000 seconds)
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of concurrent workers claiming tasks
    pub workers: u32,

    /// Maximum number of simultaneous HTTP requests
    #[serde(rename = "http-connections")]
    pub http_connections: u32,

    /// Target request rate across all workers
    #[serde(rename = "requests-per-second")]
    pub requests_per_second: f64,

    /// How long a worker waits for a free connection before giving up (seconds)
    #[serde(rename = "acquire-timeout-secs")]
    pub acquire_timeout_secs: u64,

    /// Sleep after an empty claim (milliseconds)
    #[serde(rename = "idle-interval-ms")]
    pub idle_interval_ms: u64,

    /// Delay before the confirming termination check (milliseconds)
    #[serde(rename = "grace-interval-ms")]
    pub grace_interval_ms: u64,

    /// Consecutive empty observations required before stopping
    #[serde(rename = "empty-observations")]
    pub empty_observations: u32,

    /// Completed URLs are not re-queued within this window unless forced (seconds)
    #[serde(rename = "dedup-window-secs")]
    pub dedup_window_secs: u64,

    /// Overall run deadline in seconds; 0 disables it
    #[serde(rename = "max-run-secs")]
    pub max_run_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            http_connections: 8,
            requests_per_second: 5.0,
            acquire_timeout_secs: 300,
            idle_interval_ms: 200,
            grace_interval_ms: 1000,
            empty_observations: 3,
            dedup_window_secs: 3600,
            max_run_secs: 0,
        }
    }
}

impl CrawlerConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.grace_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// Returns the run deadline, if one is configured
    pub fn max_run(&self) -> Option<Duration> {
        (self.max_run_secs > 0).then(|| Duration::from_secs(self.max_run_secs))
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Target forum configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForumConfig {
    /// Forum front page listing the root boards
    #[serde(rename = "index-url")]
    pub index_url: String,

    /// Recent posts page; defaults to `<index-url>?action=recent`
    #[serde(rename = "recent-url", default)]
    pub recent_url: Option<String>,

    /// Number of recent posts pages to seed
    #[serde(rename = "recent-pages", default = "default_recent_pages")]
    pub recent_pages: u32,
}

fn default_recent_pages() -> u32 {
    10
}

impl ForumConfig {
    /// Returns the configured recent posts URL or the SMF default
    pub fn recent_url(&self) -> String {
        match &self.recent_url {
            Some(url) => url.clone(),
            None => {
                let base = self.index_url.split('?').next().unwrap_or(&self.index_url);
                format!("{}?action=recent", base)
            }
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./lurker.db".to_string(),
        }
    }
}

/// Downloaded asset storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Keep asset bytes in the database
    #[serde(rename = "store-in-database")]
    pub store_in_database: bool,

    /// Write asset bytes to content-addressed files
    #[serde(rename = "store-on-filesystem")]
    pub store_on_filesystem: bool,

    /// Root directory for asset files
    pub directory: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            store_in_database: true,
            store_on_filesystem: false,
            directory: "./assets".to_string(),
        }
    }
}
