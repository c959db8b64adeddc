use crate::config::types::{
    AssetsConfig, Config, CrawlerConfig, ForumConfig, UserAgentConfig, MIN_REQUESTS_PER_SECOND,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_forum_config(&config.forum)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    validate_assets_config(&config.assets)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.http_connections < 1 || config.http_connections > 100 {
        return Err(ConfigError::Validation(format!(
            "http_connections must be between 1 and 100, got {}",
            config.http_connections
        )));
    }

    if !config.requests_per_second.is_finite()
        || config.requests_per_second < MIN_REQUESTS_PER_SECOND
    {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be a number >= {}, got {}",
            MIN_REQUESTS_PER_SECOND, config.requests_per_second
        )));
    }

    if config.acquire_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "acquire_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.idle_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "idle_interval_ms must be >= 1".to_string(),
        ));
    }

    if config.empty_observations < 1 {
        return Err(ConfigError::Validation(
            "empty_observations must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates the forum entry points
fn validate_forum_config(config: &ForumConfig) -> Result<(), ConfigError> {
    validate_http_url("index_url", &config.index_url)?;
    validate_http_url("recent_url", &config.recent_url())?;
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use HTTP or HTTPS",
            field, value
        )));
    }

    Ok(())
}

/// Validates asset storage targets
fn validate_assets_config(config: &AssetsConfig) -> Result<(), ConfigError> {
    if !config.store_in_database && !config.store_on_filesystem {
        return Err(ConfigError::Validation(
            "at least one of store_in_database and store_on_filesystem must be enabled"
                .to_string(),
        ));
    }

    if config.store_on_filesystem && config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "assets directory cannot be empty when store_on_filesystem is enabled".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
