//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests for forum pages and binary assets
//! - Connection and rate budgeting per attempt
//! - Retry logic for transient failures
//! - Error classification

use crate::config::UserAgentConfig;
use crate::crawler::{FetchError, RequestBudget, RetryPolicy};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// Downloaded binary content
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    /// Raw `Content-Type` header, if the server sent one
    pub content_type: Option<String>,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use lurker::config::UserAgentConfig;
/// use lurker::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "Lurker".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages and assets through the shared request budget
///
/// | Condition | Documents | Assets |
/// |-----------|-----------|--------|
/// | Network error | retry | retry |
/// | HTTP 5xx / 429 | retry | retry |
/// | Other 4xx | `Fatal` | retry |
/// | Budget timeout | `BudgetExhausted` | `BudgetExhausted` |
///
/// Retries follow [`RetryPolicy::documents`] and [`RetryPolicy::assets`]
/// unless overridden.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    budget: Arc<RequestBudget>,
    document_retry: RetryPolicy,
    asset_retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, budget: Arc<RequestBudget>) -> Self {
        Self::with_retry_policies(
            client,
            budget,
            RetryPolicy::documents(),
            RetryPolicy::assets(),
        )
    }

    pub fn with_retry_policies(
        client: Client,
        budget: Arc<RequestBudget>,
        document_retry: RetryPolicy,
        asset_retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            budget,
            document_retry,
            asset_retry,
        }
    }

    /// Fetches an HTML page and returns its body
    pub async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        self.document_retry
            .run(url, || self.get_document(url))
            .await
    }

    /// Fetches a binary resource
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedBytes, FetchError> {
        self.asset_retry.run(url, || self.get_bytes(url)).await
    }

    async fn get_document(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self.budget.acquire().await?;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| network_error(url, e))
    }

    async fn get_bytes(&self, url: &str) -> Result<FetchedBytes, FetchError> {
        let _permit = self.budget.acquire().await?;
        tracing::debug!("GET {} (asset)", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        let status = response.status();
        if !(200..400).contains(&status.as_u16()) {
            return Err(FetchError::Transient(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| network_error(url, e))?;

        Ok(FetchedBytes {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn network_error(url: &str, error: reqwest::Error) -> FetchError {
    let kind = if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    FetchError::Transient(format!("{} for {}: {}", kind, url, error))
}
