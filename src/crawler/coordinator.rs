//! Crawler coordinator - main crawl orchestration logic
//!
//! This module runs one crawl phase:
//! - Releasing claims left over by an interrupted run
//! - Seeding the queue for the phase
//! - Running a pool of workers that claim, fetch, process and settle tasks
//! - Detecting quiescence, Ctrl-C and the run deadline
//! - Recording the run and its task counts

use crate::assets::AssetPipeline;
use crate::config::{Config, ForumConfig};
use crate::crawler::{
    build_http_client, expand_pagination, CrawlError, Document, HttpFetcher, RequestBudget,
};
use crate::identity::{classify, normalize_url, PageIdentity, PageKind};
use crate::processor::{CrawlContext, PageProcessor, ProcessError, ProcessorRegistry};
use crate::state::WorkerState;
use crate::storage::{
    EntityRepository, RunStatus, SqliteStorage, StorageError, TaskOutcome, TaskRecord, TaskStore,
};
use crate::{IdentityResult, LurkerError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Posts per recent posts page
pub const RECENT_PAGE_SIZE: i64 = 10;

/// Which part of the forum a run works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    /// Forum index and every board listing
    Index,
    /// Recent posts pages, queueing recently active topics
    Recent,
    /// Topics and assets already in the queue
    Content,
    /// Everything, starting from the forum index
    Full,
}

impl CrawlPhase {
    /// Task kinds the workers claim during this phase
    pub fn kinds(&self) -> &'static [PageKind] {
        match self {
            Self::Index => &[PageKind::Index, PageKind::Board],
            Self::Recent => &[PageKind::Index],
            Self::Content => &[PageKind::Topic, PageKind::Asset],
            Self::Full => &[
                PageKind::Index,
                PageKind::Board,
                PageKind::Topic,
                PageKind::Asset,
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Recent => "recent",
            Self::Content => "content",
            Self::Full => "full",
        }
    }

    /// Pages enqueued (with `force`) when the phase starts
    pub fn seeds(&self, forum: &ForumConfig) -> IdentityResult<Vec<PageIdentity>> {
        match self {
            Self::Index | Self::Full => Ok(vec![classify(&forum.index_url)?]),
            Self::Recent => {
                let first = classify(&forum.recent_url())?;
                (0..i64::from(forum.recent_pages))
                    .map(|page| first.with_offset(page * RECENT_PAGE_SIZE))
                    .collect()
            }
            Self::Content => Ok(Vec::new()),
        }
    }
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub run_id: i64,
    pub phase: CrawlPhase,
    pub status: RunStatus,
    pub tasks_done: u64,
    pub tasks_failed: u64,
    pub elapsed: Duration,
}

/// Counters shared by the workers and the driver of one run
#[derive(Debug, Default)]
struct RunProgress {
    /// Workers between "about to claim" and "task settled"
    in_flight: AtomicUsize,
    done: AtomicU64,
    failed: AtomicU64,
    /// Set by the driver; workers stop claiming
    stop: AtomicBool,
    /// Set by a worker that could not settle a task
    aborted: AtomicBool,
}

/// Main crawler coordinator structure
///
/// Cheap to clone: every worker gets its own handle on the shared parts.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    tasks: Arc<dyn TaskStore>,
    fetcher: Arc<HttpFetcher>,
    assets: Arc<AssetPipeline>,
    registry: Arc<ProcessorRegistry>,
    context: Arc<CrawlContext>,
}

impl Coordinator {
    /// Creates a coordinator with the SMF processors over `storage`
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file, recorded with the run
    /// * `storage` - The database holding the queue and the forum entities
    pub fn new(
        config: Config,
        config_hash: String,
        storage: Arc<SqliteStorage>,
    ) -> Result<Self, LurkerError> {
        let client = build_http_client(&config.user_agent)?;
        let budget = Arc::new(RequestBudget::from_config(&config.crawler));
        let fetcher = Arc::new(HttpFetcher::new(client, budget));

        Ok(Self::with_parts(
            config,
            config_hash,
            storage.clone(),
            storage,
            fetcher,
            ProcessorRegistry::smf(),
        ))
    }

    /// Creates a coordinator from explicit parts
    pub fn with_parts(
        config: Config,
        config_hash: String,
        tasks: Arc<dyn TaskStore>,
        entities: Arc<dyn EntityRepository>,
        fetcher: Arc<HttpFetcher>,
        registry: ProcessorRegistry,
    ) -> Self {
        let assets = Arc::new(AssetPipeline::new(
            Arc::clone(&tasks),
            Arc::clone(&entities),
            Arc::clone(&fetcher),
            config.assets.clone(),
        ));
        let context = Arc::new(CrawlContext::new(
            Arc::clone(&tasks),
            entities,
            Arc::clone(&assets),
        ));

        Self {
            config: Arc::new(config),
            config_hash,
            tasks,
            fetcher,
            assets,
            registry: Arc::new(registry),
            context,
        }
    }

    /// Enqueues the seeds of `phase`, returning how many were inserted
    pub fn seed(&self, phase: CrawlPhase) -> Result<usize, LurkerError> {
        let mut inserted = 0;
        for seed in phase.seeds(&self.config.forum)? {
            if self.tasks.enqueue(&seed, None, true)?.is_inserted() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Runs `phase` until the queue drains, Ctrl-C or the run deadline
    pub async fn run(&self, phase: CrawlPhase) -> Result<CrawlSummary, LurkerError> {
        let started = Instant::now();

        let released = self.tasks.release_claims()?;
        if released > 0 {
            tracing::warn!("Released {} tasks claimed by an earlier run", released);
        }

        let run_id = self.tasks.create_run(&self.config_hash, phase.name())?;
        tracing::info!(
            "Starting {} crawl (run {}, {} workers)",
            phase.name(),
            run_id,
            self.config.crawler.workers
        );

        let progress = Arc::new(RunProgress::default());
        let outcome = match self.seed(phase) {
            Ok(seeded) => {
                tracing::info!("Seeded {} tasks", seeded);
                self.drive(phase, &progress).await
            }
            Err(e) => Err(e),
        };

        let tasks_done = progress.done.load(Ordering::SeqCst);
        let tasks_failed = progress.failed.load(Ordering::SeqCst);
        let status = match &outcome {
            Ok(status) => *status,
            Err(_) => RunStatus::Failed,
        };
        self.tasks
            .finish_run(run_id, status, tasks_done, tasks_failed)?;
        let status = outcome?;

        let elapsed = started.elapsed();
        tracing::info!(
            "Run {} {}: {} tasks done, {} failed in {:?}",
            run_id,
            status.to_db_string(),
            tasks_done,
            tasks_failed,
            elapsed
        );

        Ok(CrawlSummary {
            run_id,
            phase,
            status,
            tasks_done,
            tasks_failed,
            elapsed,
        })
    }

    async fn drive(
        &self,
        phase: CrawlPhase,
        progress: &Arc<RunProgress>,
    ) -> Result<RunStatus, LurkerError> {
        let kinds = phase.kinds();
        let mut workers = JoinSet::new();
        for worker in 0..self.config.crawler.workers.max(1) as usize {
            let this = self.clone();
            let progress = Arc::clone(progress);
            workers.spawn(async move { this.worker_loop(worker, kinds, progress).await });
        }

        let outcome = self.wait_for_end(kinds, progress).await;

        progress.stop.store(true, Ordering::SeqCst);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
        outcome
    }

    async fn wait_for_end(
        &self,
        kinds: &[PageKind],
        progress: &RunProgress,
    ) -> Result<RunStatus, LurkerError> {
        let deadline = self.config.crawler.max_run();
        let timeout = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        let quiescence = self.wait_for_quiescence(kinds, progress);
        tokio::pin!(quiescence);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut listen_for_signal = true;

        loop {
            tokio::select! {
                result = &mut quiescence => {
                    result?;
                    return Ok(RunStatus::Completed);
                }
                signal = &mut ctrl_c, if listen_for_signal => match signal {
                    Ok(()) => {
                        tracing::warn!("Interrupted, waiting for in-flight tasks");
                        return Ok(RunStatus::Interrupted);
                    }
                    Err(e) => {
                        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                        listen_for_signal = false;
                    }
                },
                _ = &mut timeout => {
                    tracing::warn!("Run deadline reached, waiting for in-flight tasks");
                    return Ok(RunStatus::TimedOut);
                }
            }
        }
    }

    /// Resolves once no task of `kinds` is pending or being worked on
    ///
    /// Requires `empty_observations` consecutive empty observations, then a
    /// confirming one after the grace interval.
    async fn wait_for_quiescence(
        &self,
        kinds: &[PageKind],
        progress: &RunProgress,
    ) -> Result<(), StorageError> {
        let idle = self.config.crawler.idle_interval();
        let grace = self.config.crawler.grace_interval();
        let required = self.config.crawler.empty_observations.max(1);
        let mut empty = 0;

        loop {
            tokio::time::sleep(idle).await;

            if progress.aborted.load(Ordering::SeqCst) {
                return Err(StorageError::Database(
                    "a worker could not record a task outcome".to_string(),
                ));
            }

            if !self.is_quiescent(kinds, progress)? {
                empty = 0;
                continue;
            }

            empty += 1;
            if empty < required {
                continue;
            }

            tokio::time::sleep(grace).await;
            if self.is_quiescent(kinds, progress)? {
                return Ok(());
            }
            tracing::debug!("New work appeared during the grace interval");
            empty = 0;
        }
    }

    fn is_quiescent(&self, kinds: &[PageKind], progress: &RunProgress) -> Result<bool, StorageError> {
        // pending first: a worker enqueues follow-ups before it leaves in-flight
        let pending = self.tasks.size(kinds)?;
        Ok(pending == 0 && progress.in_flight.load(Ordering::SeqCst) == 0)
    }

    async fn worker_loop(
        &self,
        worker: usize,
        kinds: &'static [PageKind],
        progress: Arc<RunProgress>,
    ) {
        let idle = self.config.crawler.idle_interval();
        let mut state = WorkerState::Idle;

        while !progress.stop.load(Ordering::SeqCst) {
            progress.in_flight.fetch_add(1, Ordering::SeqCst);
            advance(worker, &mut state, WorkerState::Claiming);

            let task = match self.tasks.claim(kinds) {
                Ok(Some(task)) => task,
                Ok(None) => {
                    advance(worker, &mut state, WorkerState::Idle);
                    progress.in_flight.fetch_sub(1, Ordering::SeqCst);
                    tokio::time::sleep(idle).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Worker {}: claim failed: {}", worker, e);
                    advance(worker, &mut state, WorkerState::Idle);
                    progress.in_flight.fetch_sub(1, Ordering::SeqCst);
                    tokio::time::sleep(idle).await;
                    continue;
                }
            };

            match self.handle_task(worker, &mut state, task).await {
                Some(TaskOutcome::Done(_)) => {
                    let done = progress.done.fetch_add(1, Ordering::SeqCst) + 1;
                    if done % 50 == 0 {
                        tracing::info!(
                            "Progress: {} tasks done, {} failed",
                            done,
                            progress.failed.load(Ordering::SeqCst)
                        );
                    }
                }
                Some(TaskOutcome::Failed(_)) => {
                    progress.failed.fetch_add(1, Ordering::SeqCst);
                }
                None => {
                    progress.aborted.store(true, Ordering::SeqCst);
                }
            }

            advance(worker, &mut state, WorkerState::Idle);
            progress.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Runs one task and moves it to the done or failure ledger
    ///
    /// Returns `None` only if neither ledger could be written.
    async fn handle_task(
        &self,
        worker: usize,
        state: &mut WorkerState,
        task: TaskRecord,
    ) -> Option<TaskOutcome> {
        let error = match self.execute(worker, state, &task).await {
            Ok(()) => {
                advance(worker, state, WorkerState::Persisting);
                match self.tasks.mark_done(&task) {
                    Ok(record) => return Some(TaskOutcome::Done(record)),
                    Err(e) => CrawlError::Storage(e),
                }
            }
            Err(e) => e,
        };

        advance(worker, state, WorkerState::Failed);
        let category = error.category();
        tracing::warn!(
            "Task {} ({}) failed [{}]: {}",
            task.id,
            task.url,
            category,
            error
        );

        match self
            .tasks
            .mark_failed(&task, category.as_str(), &error.to_string())
        {
            Ok(record) => Some(TaskOutcome::Failed(record)),
            Err(e) => {
                tracing::error!(
                    "Worker {}: could not record failure of task {}: {}",
                    worker,
                    task.id,
                    e
                );
                None
            }
        }
    }

    async fn execute(
        &self,
        worker: usize,
        state: &mut WorkerState,
        task: &TaskRecord,
    ) -> Result<(), CrawlError> {
        advance(worker, state, WorkerState::Fetching);

        if task.kind == PageKind::Asset {
            self.assets.fetch_asset(task).await?;
            advance(worker, state, WorkerState::Processing);
            return Ok(());
        }

        let identity = task.identity()?;
        let processor = self
            .registry
            .get(task.kind)
            .ok_or(CrawlError::NoProcessor(task.kind))?;

        let body = self.fetcher.fetch_document(&identity.canonical_url).await?;
        advance(worker, state, WorkerState::Processing);

        self.process_document(&identity, task.entity_id, &body, processor.as_ref())
    }

    /// Parses and processes a page, turning a processor panic into an error
    fn process_document(
        &self,
        identity: &PageIdentity,
        entity_id: Option<i64>,
        body: &str,
        processor: &dyn PageProcessor,
    ) -> Result<(), CrawlError> {
        let document = Document::parse(body, normalize_url(&identity.canonical_url)?);
        let context = self.context.as_ref();

        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), ProcessError> {
            processor.process(identity, &document, context)?;
            expand_pagination(identity, entity_id, &document, context)?;
            Ok(())
        }));

        match result {
            Ok(outcome) => outcome.map_err(CrawlError::from),
            Err(payload) => Err(CrawlError::Unexpected(format!(
                "{} processor: {}",
                processor.name(),
                panic_message(payload.as_ref())
            ))),
        }
    }
}

fn advance(worker: usize, state: &mut WorkerState, next: WorkerState) {
    match state.transition(next) {
        Ok(next) => {
            tracing::trace!("Worker {}: {} -> {}", worker, state, next);
            *state = next;
        }
        Err(e) => tracing::error!("Worker {}: {}", worker, e),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::processor::test_support::quick_fetcher;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(index_url: &str) -> Config {
        parse_config(&format!(
            r#"
[crawler]
workers = 3
idle-interval-ms = 10
grace-interval-ms = 30
empty-observations = 2

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[forum]
index-url = "{}"
recent-pages = 3
"#,
            index_url
        ))
        .unwrap()
    }

    fn coordinator(config: Config, registry: ProcessorRegistry) -> (Coordinator, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let coordinator = Coordinator::with_parts(
            config,
            "test-hash".to_string(),
            storage.clone(),
            storage.clone(),
            quick_fetcher(),
            registry,
        );
        (coordinator, storage)
    }

    struct PanickingProcessor;

    impl PageProcessor for PanickingProcessor {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn process(
            &self,
            _identity: &PageIdentity,
            _document: &Document,
            _ctx: &CrawlContext,
        ) -> Result<(), ProcessError> {
            panic!("selector exploded")
        }
    }

    #[test]
    fn test_phase_kinds() {
        assert_eq!(CrawlPhase::Recent.kinds(), &[PageKind::Index]);
        assert!(CrawlPhase::Content.kinds().contains(&PageKind::Asset));
        assert!(!CrawlPhase::Index.kinds().contains(&PageKind::Topic));
        assert!(!CrawlPhase::Full.kinds().contains(&PageKind::Post));
    }

    #[test]
    fn test_recent_seeds() {
        let config = test_config("https://forum.example.org/index.php");
        let seeds = CrawlPhase::Recent.seeds(&config.forum).unwrap();

        let urls: Vec<_> = seeds.iter().map(|s| s.canonical_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://forum.example.org/index.php?action=recent",
                "https://forum.example.org/index.php?action=recent;start=10",
                "https://forum.example.org/index.php?action=recent;start=20",
            ]
        );
        assert!(CrawlPhase::Content.seeds(&config.forum).unwrap().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_empty_content_phase_completes() {
        let (coordinator, storage) = coordinator(
            test_config("https://forum.example.org/index.php"),
            ProcessorRegistry::smf(),
        );

        let summary = coordinator.run(CrawlPhase::Content).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.tasks_done, 0);

        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.phase, "content");
        assert_eq!(run.config_hash, "test-hash");
    }

    #[tokio::test]
    async fn test_processor_panic_is_recorded_as_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let mut registry = ProcessorRegistry::new();
        registry.register(PageKind::Index, Arc::new(PanickingProcessor));
        let (coordinator, storage) = coordinator(
            test_config(&format!("{}/index.php", server.uri())),
            registry,
        );

        let summary = coordinator.run(CrawlPhase::Index).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.tasks_failed, 1);

        let failures = storage.recent_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].category, "unexpected");
        assert!(failures[0].message.contains("selector exploded"));
    }

    #[tokio::test]
    async fn test_stale_claims_are_released() {
        let (coordinator, storage) = coordinator(
            test_config("https://forum.example.org/index.php"),
            ProcessorRegistry::smf(),
        );
        let stale = PageIdentity::asset("http://127.0.0.1:9/never.png").unwrap();
        storage.enqueue(&stale, None, false).unwrap();
        storage.claim(&[PageKind::Asset]).unwrap().unwrap();

        // the released task is claimed again and fails without a registered asset
        let summary = coordinator.run(CrawlPhase::Content).await.unwrap();
        assert_eq!(summary.tasks_failed, 1);
        assert_eq!(storage.size(&[PageKind::Asset]).unwrap(), 0);
        assert_eq!(storage.failure_summary().unwrap().get("storage"), Some(&1));
    }
}
