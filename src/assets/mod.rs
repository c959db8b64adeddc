//! Asset pipeline: registration and download of binary resources
//!
//! Processors only *register* assets (avatars, inline images). Registration
//! creates a placeholder row and an ASSET task; the download happens later
//! when a worker claims that task. Downloaded bytes go to the database, to a
//! content-addressed directory, or both.

use crate::config::AssetsConfig;
use crate::crawler::{FailureCategory, FetchError, HttpFetcher};
use crate::identity::PageIdentity;
use crate::storage::{AssetContent, AssetRecord, EntityRepository, StorageError, TaskRecord, TaskStore};
use crate::IdentityError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Content type assumed when the server sends none
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Errors raised while registering or downloading an asset
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Invalid asset URL: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to write asset file: {0}")]
    Io(#[from] std::io::Error),

    #[error("No asset registered for {0}")]
    NotRegistered(String),
}

impl AssetError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Identity(_) => FailureCategory::InvalidIdentity,
            Self::Storage(_) | Self::NotRegistered(_) => FailureCategory::Storage,
            Self::Fetch(e) => e.category(),
            Self::Io(_) => FailureCategory::Io,
        }
    }
}

/// Deduplicating asset registry plus downloader
pub struct AssetPipeline {
    tasks: Arc<dyn TaskStore>,
    entities: Arc<dyn EntityRepository>,
    fetcher: Arc<HttpFetcher>,
    config: AssetsConfig,
    /// canonical URL -> asset id, for assets already handled by this process
    known: Mutex<HashMap<String, i64>>,
}

impl AssetPipeline {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        entities: Arc<dyn EntityRepository>,
        fetcher: Arc<HttpFetcher>,
        config: AssetsConfig,
    ) -> Self {
        Self {
            tasks,
            entities,
            fetcher,
            config,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the id of the asset at `url`, scheduling a download if needed
    ///
    /// - new URL: placeholder row plus ASSET task
    /// - known but not downloaded yet: the download is enqueued again
    /// - downloaded: just the id
    pub fn register_asset(&self, name: &str, url: &str) -> Result<i64, AssetError> {
        let identity = PageIdentity::asset(url)?;
        let canonical = identity.canonical_url.as_str();

        if let Some(id) = self.cached(canonical) {
            return Ok(id);
        }

        let asset = match self.entities.find_asset_by_url(canonical)? {
            Some(asset) => asset,
            None => {
                let asset = self.entities.insert_asset(name, canonical)?;
                tracing::debug!("Registered asset {} ({}): {}", asset.id, name, canonical);
                asset
            }
        };

        if !asset.is_fetched() {
            self.tasks.enqueue(&identity, Some(asset.id), false)?;
        }

        self.remember(canonical, asset.id);
        Ok(asset.id)
    }

    /// Downloads the asset behind an ASSET task and stores it
    pub async fn fetch_asset(&self, task: &TaskRecord) -> Result<AssetRecord, AssetError> {
        let asset_id = match task.entity_id {
            Some(id) => id,
            None => self
                .entities
                .find_asset_by_url(&task.url)?
                .map(|asset| asset.id)
                .ok_or_else(|| AssetError::NotRegistered(task.url.clone()))?,
        };

        let fetched = self.fetcher.fetch_bytes(&task.url).await?;
        let mime_type = mime_type_of(fetched.content_type.as_deref());
        let sha256 = hex::encode(Sha256::digest(&fetched.bytes));

        let path = if self.config.store_on_filesystem {
            let path = content_path(
                Path::new(&self.config.directory),
                &sha256,
                extension_for(&mime_type),
            );
            write_file(&path, &fetched.bytes).await?;
            Some(path.to_string_lossy().into_owned())
        } else {
            None
        };

        let record = self.entities.update_asset_content(
            asset_id,
            &AssetContent {
                path,
                mime_type,
                sha256,
                bytes: &fetched.bytes,
                store_blob: self.config.store_in_database,
            },
        )?;

        tracing::info!(
            "Stored asset {} ({} bytes, {})",
            record.id,
            fetched.bytes.len(),
            record.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
        );
        Ok(record)
    }

    fn cached(&self, url: &str) -> Option<i64> {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .copied()
    }

    fn remember(&self, url: &str, id: i64) {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.to_string(), id);
    }
}

/// Strips parameters from a `Content-Type` header, defaulting when absent
pub fn mime_type_of(content_type: Option<&str>) -> String {
    content_type
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

/// File extension for a MIME type: its subtype, e.g. `image/png` -> `png`
pub fn extension_for(mime_type: &str) -> String {
    let subtype: String = mime_type
        .split_once('/')
        .map(|(_, sub)| sub)
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
        .collect();

    if subtype.is_empty() {
        "bin".to_string()
    } else {
        subtype
    }
}

/// `<dir>/<sha[0..2]>/<sha>.<ext>`
pub fn content_path(directory: &Path, sha256: &str, extension: String) -> PathBuf {
    let prefix = sha256.get(..2).unwrap_or(sha256);
    directory
        .join(prefix)
        .join(format!("{}.{}", sha256, extension))
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PageKind;
    use crate::processor::test_support::quick_fetcher as fetcher;
    use crate::storage::SqliteStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline(config: AssetsConfig) -> (AssetPipeline, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let pipeline = AssetPipeline::new(storage.clone(), storage.clone(), fetcher(), config);
        (pipeline, storage)
    }

    #[test]
    fn test_mime_and_extension() {
        assert_eq!(mime_type_of(Some("image/PNG; charset=binary")), "image/png");
        assert_eq!(mime_type_of(None), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type_of(Some("  ")), DEFAULT_MIME_TYPE);
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/svg+xml"), "svg+xml");
        assert_eq!(extension_for(DEFAULT_MIME_TYPE), "octet-stream");
        assert_eq!(extension_for("garbage"), "bin");
    }

    #[test]
    fn test_content_path_layout() {
        let sha = "ab".repeat(32);
        let path = content_path(Path::new("/data/assets"), &sha, "png".to_string());
        assert_eq!(
            path,
            PathBuf::from(format!("/data/assets/ab/{}.png", sha))
        );
    }

    #[test]
    fn test_register_is_deduplicated() {
        let (pipeline, storage) = pipeline(AssetsConfig::default());

        let first = pipeline
            .register_asset("avatar/7", "https://cdn.example.org/a.png#frag")
            .unwrap();
        let second = pipeline
            .register_asset("avatar/7", "https://cdn.example.org/a.png")
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.size(&[PageKind::Asset]).unwrap(), 1);
        assert_eq!(storage.entity_counts().unwrap().assets, 1);
    }

    #[test]
    fn test_unfetched_asset_is_requeued_after_restart() {
        let (pipeline, storage) = pipeline(AssetsConfig::default());
        let id = pipeline
            .register_asset("avatar/7", "https://cdn.example.org/a.png")
            .unwrap();
        storage.clear_pending().unwrap();

        // a fresh pipeline has an empty cache, like a new process
        let again = AssetPipeline::new(
            storage.clone(),
            storage.clone(),
            fetcher(),
            AssetsConfig::default(),
        );
        assert_eq!(
            again
                .register_asset("avatar/7", "https://cdn.example.org/a.png")
                .unwrap(),
            id
        );
        assert_eq!(storage.size(&[PageKind::Asset]).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_stores_blob_and_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/cat.gif"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/gif")
                    .set_body_bytes(b"GIF89a".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = AssetsConfig {
            store_in_database: true,
            store_on_filesystem: true,
            directory: dir.path().to_string_lossy().into_owned(),
        };
        let (pipeline, storage) = pipeline(config);

        let url = format!("{}/img/cat.gif", server.uri());
        let id = pipeline.register_asset("topic/1/post-2/0", &url).unwrap();
        let task = storage.claim(&[PageKind::Asset]).unwrap().unwrap();

        let record = pipeline.fetch_asset(&task).await.unwrap();
        assert_eq!(record.id, id);
        assert!(record.is_fetched());
        assert_eq!(record.mime_type.as_deref(), Some("image/gif"));
        assert_eq!(record.size, Some(6));

        let sha = hex::encode(Sha256::digest(b"GIF89a"));
        assert_eq!(record.sha256.as_deref(), Some(sha.as_str()));
        let file = dir.path().join(&sha[..2]).join(format!("{}.gif", sha));
        assert_eq!(std::fs::read(&file).unwrap(), b"GIF89a");
        assert_eq!(record.path, Some(file.to_string_lossy().into_owned()));
        assert_eq!(storage.asset_blob(id).unwrap(), Some(b"GIF89a".to_vec()));

        // once fetched, registering again has no side effects
        storage.mark_done(&task).unwrap();
        let fresh = AssetPipeline::new(
            storage.clone(),
            storage.clone(),
            fetcher(),
            AssetsConfig::default(),
        );
        assert_eq!(fresh.register_asset("x", &url).unwrap(), id);
        assert_eq!(storage.size(&[PageKind::Asset]).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (pipeline, storage) = pipeline(AssetsConfig::default());
        pipeline
            .register_asset("avatar/1", &format!("{}/missing.png", server.uri()))
            .unwrap();
        let task = storage.claim(&[PageKind::Asset]).unwrap().unwrap();

        let err = pipeline.fetch_asset(&task).await.unwrap_err();
        assert_eq!(err.category(), FailureCategory::TransientNetwork);
    }
}
