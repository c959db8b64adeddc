use crate::assets::AssetPipeline;
use crate::config::{AssetsConfig, UserAgentConfig};
use crate::crawler::{build_http_client, Document, HttpFetcher, RequestBudget, RetryPolicy};
use crate::processor::CrawlContext;
use crate::storage::SqliteStorage;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub(crate) fn test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestCrawler".to_string(),
        crawler_version: "1.0".to_string(),
        contact_url: "https://example.com/about".to_string(),
        contact_email: "admin@example.com".to_string(),
    }
}

/// Fetcher with millisecond retry waits
pub(crate) fn quick_fetcher() -> Arc<HttpFetcher> {
    let client = build_http_client(&test_user_agent()).unwrap();
    let budget = Arc::new(RequestBudget::new(4, 1000.0, Duration::from_secs(1)));
    let retry = RetryPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(2),
        Duration::from_millis(20),
    );
    Arc::new(HttpFetcher::with_retry_policies(
        client,
        budget,
        retry.clone(),
        retry,
    ))
}

/// Context over a fresh in-memory database
pub(crate) fn memory_context() -> (CrawlContext, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let assets = Arc::new(AssetPipeline::new(
        storage.clone(),
        storage.clone(),
        quick_fetcher(),
        AssetsConfig::default(),
    ));
    let ctx = CrawlContext::new(storage.clone(), storage.clone(), assets);
    (ctx, storage)
}

pub(crate) fn document(url: &str, body: &str) -> Document {
    Document::parse(body, Url::parse(url).unwrap())
}
