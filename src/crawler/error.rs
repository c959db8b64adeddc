//! Fetch and task failure types
//!
//! Every task that does not finish cleanly ends up in the failure ledger with
//! one of the categories below, so `lurker failures` can group them.

use crate::assets::AssetError;
use crate::identity::PageKind;
use crate::processor::ProcessError;
use crate::storage::StorageError;
use crate::IdentityError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the HTTP fetcher
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure or retryable status; the retry policy may try again
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    /// Status that will not change on retry (404, 403, ...)
    #[error("HTTP {status} for {url}")]
    Fatal { status: u16, url: String },

    /// No connection slot became available in time
    #[error("No HTTP connection available after {0:?}")]
    BudgetExhausted(Duration),

    #[error("Giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl FetchError {
    /// Returns true if the retry policy should try again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Transient(_) | Self::RetriesExhausted { .. } => FailureCategory::TransientNetwork,
            Self::Fatal { .. } => FailureCategory::FatalHttp,
            Self::BudgetExhausted(_) => FailureCategory::ResourceExhausted,
        }
    }
}

/// Failure categories recorded in the failure ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    TransientNetwork,
    FatalHttp,
    MalformedPage,
    ResourceExhausted,
    InvalidIdentity,
    Storage,
    Io,
    Unexpected,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::FatalHttp => "fatal_http",
            Self::MalformedPage => "malformed_page",
            Self::ResourceExhausted => "resource_exhausted",
            Self::InvalidIdentity => "invalid_identity",
            Self::Storage => "storage",
            Self::Io => "io",
            Self::Unexpected => "unexpected",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::TransientNetwork,
            Self::FatalHttp,
            Self::MalformedPage,
            Self::ResourceExhausted,
            Self::InvalidIdentity,
            Self::Storage,
            Self::Io,
            Self::Unexpected,
        ]
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a single task failed
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Invalid task URL: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("No processor registered for {0} pages")]
    NoProcessor(PageKind),

    #[error("Processor panicked: {0}")]
    Unexpected(String),
}

impl CrawlError {
    /// Maps the error to the category stored in the failure ledger
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Process(e) => e.category(),
            Self::Identity(_) => FailureCategory::InvalidIdentity,
            Self::Storage(_) => FailureCategory::Storage,
            Self::Asset(e) => e.category(),
            Self::NoProcessor(_) | Self::Unexpected(_) => FailureCategory::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_categories() {
        assert_eq!(
            FetchError::Transient("reset".into()).category(),
            FailureCategory::TransientNetwork
        );
        assert_eq!(
            FetchError::Fatal {
                status: 404,
                url: "u".into()
            }
            .category(),
            FailureCategory::FatalHttp
        );
        assert_eq!(
            FetchError::BudgetExhausted(Duration::from_secs(300)).category(),
            FailureCategory::ResourceExhausted
        );
        assert_eq!(
            FetchError::RetriesExhausted {
                url: "u".into(),
                attempts: 4,
                last_error: "HTTP 503".into()
            }
            .category(),
            FailureCategory::TransientNetwork
        );
    }

    #[test]
    fn test_crawl_error_categories() {
        let malformed: CrawlError = ProcessError::MalformedPage("no posts".into()).into();
        assert_eq!(malformed.category(), FailureCategory::MalformedPage);

        let identity: CrawlError = IdentityError::NegativeOffset(-1).into();
        assert_eq!(identity.category(), FailureCategory::InvalidIdentity);

        let panic = CrawlError::Unexpected("boom".into());
        assert_eq!(panic.category().as_str(), "unexpected");
    }

    #[test]
    fn test_category_names_are_unique() {
        let mut names: Vec<_> = FailureCategory::all().iter().map(|c| c.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), FailureCategory::all().len());
    }
}
