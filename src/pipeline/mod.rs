//! Concurrent retrieval pipeline: listing, detail fan-out, aggregation.
//!
//! # Overview
//!
//! ```text
//! Paginator ──parent GUIDs──▶ input queue ──▶ WorkerPool (P tasks)
//!                                                 │ widgets + P completions
//!                                                 ▼
//!        listed dashboards ─────────────────▶ Aggregator ──▶ sorted result map
//! ```
//!
//! The listing finishes before the fan-out starts, so every page a widget can
//! reference is already in the map the aggregator owns. The map is written by
//! the aggregator task alone and is only returned after its final sort pass.
//!
//! # Example
//!
//! ```no_run
//! use dashboard_export_core::graphql::{ApiKey, ClientSettings, DEFAULT_ENDPOINT};
//! use dashboard_export_core::pipeline::{PipelineConfig, run_pipeline};
//! use dashboard_export_core::ExportKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientSettings::new(DEFAULT_ENDPOINT, ApiKey::new("NRAK-..."));
//! let config = PipelineConfig::new(1234567, ExportKind::Dashboards, client);
//! let output = run_pipeline(&config).await?;
//! println!("{} dashboards, {} widgets", output.dashboards.len(), output.stats.widgets_merged());
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod paginator;
mod worker;

pub use aggregator::{Aggregator, MergeOutcome};
pub use paginator::{Listing, Paginator, classify_entity};
pub use worker::{
    DEFAULT_WORKERS, DetailOutcome, MAX_WORKERS, MIN_WORKERS, WorkerMessage, WorkerPool,
    decompose_detail,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, instrument, warn};

use crate::graphql::{ClientSettings, GraphQlClient, GraphQlError};
use crate::model::{Dashboard, ExportKind};

/// Error type for pipeline operations.
///
/// Per-item failures never appear here; they are logged and counted in
/// [`PipelineStats`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid worker count provided.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkerCount {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The GraphQL client could not be constructed.
    #[error("GraphQL client error: {0}")]
    Client(#[from] GraphQlError),

    /// A pipeline stage task panicked or was cancelled.
    #[error("{stage} task failed: {source}")]
    Task {
        stage: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },

    /// The run exceeded its configured deadline.
    #[error("pipeline run exceeded {timeout:?}")]
    RunTimeout { timeout: Duration },
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub account_id: u64,
    pub kind: ExportKind,
    /// Worker pool size `P`.
    pub workers: usize,
    /// Deadline for the whole run; `None` waits indefinitely.
    pub run_timeout: Option<Duration>,
    pub client: ClientSettings,
}

impl PipelineConfig {
    /// Config with the default worker count and no run deadline.
    #[must_use]
    pub fn new(account_id: u64, kind: ExportKind, client: ClientSettings) -> Self {
        Self {
            account_id,
            kind,
            workers: DEFAULT_WORKERS,
            run_timeout: None,
            client,
        }
    }
}

/// Counters for a pipeline run.
///
/// Uses atomic counters so the paginator, workers and aggregator can update
/// them from their own tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pages: AtomicUsize,
    parents: AtomicUsize,
    details: AtomicUsize,
    widgets_emitted: AtomicUsize,
    widgets_merged: AtomicUsize,
    orphans: AtomicUsize,
    not_found: AtomicUsize,
    upstream_errors: AtomicUsize,
    parse_failures: AtomicUsize,
}

impl PipelineStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing requests issued.
    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    /// Parent GUIDs handed to the worker pool.
    #[must_use]
    pub fn parents_listed(&self) -> usize {
        self.parents.load(Ordering::SeqCst)
    }

    /// Detail requests issued by workers.
    #[must_use]
    pub fn details_fetched(&self) -> usize {
        self.details.load(Ordering::SeqCst)
    }

    /// Widgets pushed to the output queue.
    #[must_use]
    pub fn widgets_emitted(&self) -> usize {
        self.widgets_emitted.load(Ordering::SeqCst)
    }

    /// Widgets stored in the result map.
    #[must_use]
    pub fn widgets_merged(&self) -> usize {
        self.widgets_merged.load(Ordering::SeqCst)
    }

    /// Widgets dropped because their page was not listed.
    #[must_use]
    pub fn orphans(&self) -> usize {
        self.orphans.load(Ordering::SeqCst)
    }

    /// Parents skipped because the upstream reported "Not Found".
    #[must_use]
    pub fn not_found(&self) -> usize {
        self.not_found.load(Ordering::SeqCst)
    }

    /// Parents skipped because of any other upstream error.
    #[must_use]
    pub fn upstream_errors(&self) -> usize {
        self.upstream_errors.load(Ordering::SeqCst)
    }

    /// Response bodies that failed to decode.
    #[must_use]
    pub fn parse_failures(&self) -> usize {
        self.parse_failures.load(Ordering::SeqCst)
    }

    fn increment_pages(&self) {
        self.pages.fetch_add(1, Ordering::SeqCst);
    }

    fn add_parents(&self, count: usize) {
        self.parents.fetch_add(count, Ordering::SeqCst);
    }

    fn increment_details(&self) {
        self.details.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_widgets_emitted(&self) {
        self.widgets_emitted.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_merged(&self) {
        self.widgets_merged.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_orphans(&self) {
        self.orphans.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_upstream_errors(&self) {
        self.upstream_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_parse_failures(&self) {
        self.parse_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Final, fully aggregated result of a run.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Stored entities keyed by GUID; widget ids are sorted ascending.
    pub dashboards: BTreeMap<String, Dashboard>,
    pub stats: Arc<PipelineStats>,
}

/// Runs listing, detail fan-out and aggregation for one account.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidWorkerCount`] or [`PipelineError::Client`]
/// before any request is made, [`PipelineError::Task`] if the paginator or
/// aggregator task dies, and [`PipelineError::RunTimeout`] when the
/// configured deadline passes. Every stage task still running at the
/// deadline is aborted before the error is returned.
///
/// Individual entity failures do NOT cause this function to error.
#[instrument(skip(config), fields(account_id = config.account_id, kind = %config.kind, workers = config.workers))]
pub async fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    let client = GraphQlClient::new(&config.client)?;
    let pool = WorkerPool::new(client.clone(), config.workers)?;
    let paginator = Paginator::new(client, config.kind, config.account_id);
    let stats = Arc::new(PipelineStats::new());

    let run = execute(paginator, pool, Arc::clone(&stats));
    let dashboards = match config.run_timeout {
        Some(timeout) => tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| {
                warn!(?timeout, "run deadline passed, stages cancelled");
                PipelineError::RunTimeout { timeout }
            })??,
        None => run.await?,
    };

    info!(
        pages = stats.pages_fetched(),
        parents = stats.parents_listed(),
        dashboards = dashboards.len(),
        emitted = stats.widgets_emitted(),
        widgets = stats.widgets_merged(),
        orphans = stats.orphans(),
        not_found = stats.not_found(),
        upstream_errors = stats.upstream_errors(),
        parse_failures = stats.parse_failures(),
        "pipeline complete"
    );

    Ok(PipelineOutput { dashboards, stats })
}

/// Abort handles for every spawned stage.
///
/// Dropping the set aborts whatever is still running, so a run cut short by
/// the deadline leaves no task polling the upstream.
#[derive(Debug, Default)]
struct StageTasks(Vec<AbortHandle>);

impl StageTasks {
    fn track<T>(&mut self, handle: JoinHandle<T>) -> JoinHandle<T> {
        self.0.push(handle.abort_handle());
        handle
    }
}

impl Drop for StageTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn execute(
    paginator: Paginator,
    pool: WorkerPool,
    stats: Arc<PipelineStats>,
) -> Result<BTreeMap<String, Dashboard>, PipelineError> {
    let mut tasks = StageTasks::default();

    let listing = {
        let stats = Arc::clone(&stats);
        tasks
            .track(tokio::spawn(async move { paginator.run(&stats).await }))
            .await
            .map_err(|source| PipelineError::Task {
                stage: "paginator",
                source,
            })?
    };

    let workers = pool.workers();
    let capacity = listing.parent_guids.len() + workers;
    let (input_tx, input_rx) = mpsc::channel::<String>(capacity);
    let (output_tx, output_rx) = mpsc::channel::<WorkerMessage>(capacity);

    // Dropping input_tx after the last GUID closes the queue for the workers.
    let parent_guids = listing.parent_guids;
    let feeder = tasks.track(tokio::spawn(async move {
        for guid in parent_guids {
            if input_tx.send(guid).await.is_err() {
                break;
            }
        }
    }));

    let aggregator = {
        let stats = Arc::clone(&stats);
        let aggregator = Aggregator::new(listing.dashboards, workers);
        tasks.track(tokio::spawn(async move { aggregator.run(output_rx, &stats).await }))
    };

    let handles: Vec<_> = pool
        .spawn(&Arc::new(Mutex::new(input_rx)), output_tx, &stats)
        .into_iter()
        .map(|handle| tasks.track(handle))
        .collect();

    if let Err(e) = feeder.await {
        warn!(error = %e, "input feeder task failed");
    }
    for result in join_all(handles).await {
        // A panicked worker never reports completion; the aggregator copes.
        if let Err(e) = result {
            warn!(error = %e, "detail worker panicked");
        }
    }

    aggregator.await.map_err(|source| PipelineError::Task {
        stage: "aggregator",
        source,
    })
}
