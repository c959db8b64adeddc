//! Page processors: turn fetched forum pages into entities and new tasks
//!
//! A processor is picked by page kind through [`ProcessorRegistry`]. It reads
//! the parsed [`Document`] and performs all of its side effects through
//! [`CrawlContext`]: entity upserts, enqueues and asset registration. The
//! processors shipped here understand Simple Machines Forum markup.

mod board;
mod index;
#[cfg(test)]
pub(crate) mod test_support;
mod topic;

pub use board::BoardProcessor;
pub use index::IndexProcessor;
pub use topic::TopicProcessor;

use crate::assets::{AssetError, AssetPipeline};
use crate::crawler::{Document, FailureCategory, SelectorError};
use crate::identity::{PageIdentity, PageKind};
use crate::storage::{EnqueueOutcome, EntityRepository, StorageError, TaskStore};
use crate::IdentityError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while processing a page
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The page lacks markup the processor depends on
    #[error("Malformed page: {0}")]
    MalformedPage(String),

    /// The page belongs to a board or topic that was never recorded
    #[error("Unknown {kind} {oid}")]
    MissingParent { kind: PageKind, oid: String },

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Invalid link: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl ProcessError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::MalformedPage(_) | Self::MissingParent { .. } => FailureCategory::MalformedPage,
            Self::Selector(_) => FailureCategory::Unexpected,
            Self::Identity(_) => FailureCategory::InvalidIdentity,
            Self::Storage(_) => FailureCategory::Storage,
            Self::Asset(e) => e.category(),
        }
    }
}

/// Handles one kind of page
///
/// Implementations hold no per-page state; the same instance is shared by
/// every worker.
pub trait PageProcessor: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    fn process(
        &self,
        identity: &PageIdentity,
        document: &Document,
        ctx: &CrawlContext,
    ) -> Result<(), ProcessError>;
}

/// Everything a processor may touch
pub struct CrawlContext {
    tasks: Arc<dyn TaskStore>,
    entities: Arc<dyn EntityRepository>,
    assets: Arc<AssetPipeline>,
}

impl CrawlContext {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        entities: Arc<dyn EntityRepository>,
        assets: Arc<AssetPipeline>,
    ) -> Self {
        Self {
            tasks,
            entities,
            assets,
        }
    }

    pub fn entities(&self) -> &dyn EntityRepository {
        self.entities.as_ref()
    }

    pub fn assets(&self) -> &AssetPipeline {
        &self.assets
    }

    /// Schedules a fetch of `identity`
    pub fn enqueue(
        &self,
        identity: &PageIdentity,
        entity_id: Option<i64>,
        force: bool,
    ) -> Result<EnqueueOutcome, ProcessError> {
        Ok(self.tasks.enqueue(identity, entity_id, force)?)
    }

    /// Registers a binary resource and returns its asset id
    pub fn register_asset(&self, name: &str, url: &str) -> Result<i64, ProcessError> {
        Ok(self.assets.register_asset(name, url)?)
    }
}

/// Maps page kinds to their processors
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<PageKind, Arc<dyn PageProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the SMF processors for index, board and topic pages
    pub fn smf() -> Self {
        let mut registry = Self::new();
        registry.register(PageKind::Index, Arc::new(IndexProcessor));
        registry.register(PageKind::Board, Arc::new(BoardProcessor));
        registry.register(PageKind::Topic, Arc::new(TopicProcessor));
        registry
    }

    /// Sets the processor for `kind`, replacing any previous one
    pub fn register(&mut self, kind: PageKind, processor: Arc<dyn PageProcessor>) {
        self.processors.insert(kind, processor);
    }

    pub fn get(&self, kind: PageKind) -> Option<Arc<dyn PageProcessor>> {
        self.processors.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<PageKind> {
        let mut kinds: Vec<_> = self.processors.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smf_registry_covers_document_kinds() {
        let registry = ProcessorRegistry::smf();
        assert_eq!(
            registry.kinds(),
            vec![PageKind::Index, PageKind::Board, PageKind::Topic]
        );
        assert_eq!(registry.get(PageKind::Topic).unwrap().name(), "topic");
        assert!(registry.get(PageKind::Asset).is_none());
    }

    #[test]
    fn test_process_error_categories() {
        assert_eq!(
            ProcessError::MalformedPage("no posts".into()).category(),
            FailureCategory::MalformedPage
        );
        assert_eq!(
            ProcessError::MissingParent {
                kind: PageKind::Board,
                oid: "5".into()
            }
            .category(),
            FailureCategory::MalformedPage
        );
        assert_eq!(
            ProcessError::Storage(StorageError::LockPoisoned).category(),
            FailureCategory::Storage
        );
    }

    #[test]
    fn test_context_enqueue_goes_to_store() {
        let (ctx, store) = test_support::memory_context();
        let board = crate::classify("https://forum.example.org/index.php?board=2.0").unwrap();

        assert!(ctx.enqueue(&board, Some(9), false).unwrap().is_inserted());
        assert_eq!(
            ctx.enqueue(&board, Some(9), false).unwrap(),
            EnqueueOutcome::AlreadyPending
        );
        assert_eq!(store.size(&[PageKind::Board]).unwrap(), 1);
    }
}
