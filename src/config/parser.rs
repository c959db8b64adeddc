use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is stored with each run to tell which settings produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[forum]
index-url = "https://forum.example.org/index.php"
"#;

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[crawler]
workers = 4
http-connections = 2
requests-per-second = 1.5
acquire-timeout-secs = 30
idle-interval-ms = 50
grace-interval-ms = 500
empty-observations = 5
dedup-window-secs = 60
max-run-secs = 600

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[forum]
index-url = "https://forum.example.org/index.php"
recent-url = "https://forum.example.org/index.php?action=recent"
recent-pages = 3

[storage]
database-path = "./test.db"

[assets]
store-in-database = false
store-on-filesystem = true
directory = "./files"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.workers, 4);
        assert_eq!(config.crawler.http_connections, 2);
        assert_eq!(config.crawler.empty_observations, 5);
        assert_eq!(
            config.crawler.max_run(),
            Some(std::time::Duration::from_secs(600))
        );
        assert_eq!(config.user_agent.crawler_name, "TestCrawler");
        assert_eq!(config.forum.recent_pages, 3);
        assert_eq!(config.storage.database_path, "./test.db");
        assert!(config.assets.store_on_filesystem);
        assert!(!config.assets.store_in_database);
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.crawler.workers, 16);
        assert_eq!(config.crawler.http_connections, 8);
        assert_eq!(config.crawler.acquire_timeout_secs, 300);
        assert_eq!(config.crawler.empty_observations, 3);
        assert_eq!(config.crawler.max_run(), None);
        assert_eq!(config.forum.recent_pages, 10);
        assert_eq!(
            config.forum.recent_url(),
            "https://forum.example.org/index.php?action=recent"
        );
        assert_eq!(config.storage.database_path, "./lurker.db");
        assert!(config.assets.store_in_database);
    }

    #[test]
    fn test_user_agent_header() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.user_agent.header_value(),
            "TestCrawler/1.0 (+https://example.com/about; admin@example.com)"
        );
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_forum_section() {
        let content = MINIMAL.replace("[forum]", "[other]");
        assert!(matches!(parse_config(&content), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = format!("{}\n[crawler]\nworkers = 0\n", MINIMAL);
        let result = parse_config(&content);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config(MINIMAL);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.crawler.workers, 16);
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
    }
}
