//! Bounded worker pool for dashboard detail fetches.
//!
//! Every worker pulls parent GUIDs from a shared input queue, fetches the
//! dashboard detail through the retrying client, decomposes it into widgets
//! and pushes them to the output queue. Workers never touch the result map.
//!
//! # Termination
//!
//! The input queue is closed by dropping its last sender once every GUID is
//! loaded. A worker that sees the closed, drained queue sends exactly one
//! [`WorkerMessage::Finished`] and exits, so the aggregator can count `P`
//! completions instead of relying on a reserved "empty" value.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{PipelineError, PipelineStats};
use crate::graphql::payload::{DashboardDetailData, GraphQlPayload, GraphQlResponse, RawWidget};
use crate::graphql::{GraphQlClient, NOT_FOUND_MESSAGE};
use crate::model::Widget;

/// Minimum allowed worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
pub const MAX_WORKERS: usize = 64;

/// Default worker count if not specified.
pub const DEFAULT_WORKERS: usize = 10;

/// Shared receiving end of the input queue.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<String>>>;

/// Items flowing from workers to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// A widget with at least one query, tagged with its owning page.
    Widget(Widget),
    /// The worker has drained the input queue and will send nothing more.
    Finished { worker: usize },
}

/// How one detail response decomposed.
#[derive(Debug, PartialEq, Eq)]
pub enum DetailOutcome {
    /// Widgets to emit; may be empty.
    Widgets(Vec<Widget>),
    /// The dashboard was deleted or is inaccessible.
    NotFound,
    /// Any other upstream error; the item is skipped.
    UpstreamError(Vec<String>),
}

/// Fixed-size set of concurrent detail fetchers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    client: GraphQlClient,
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool of `workers` fetchers sharing clones of `client`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidWorkerCount`] if the value is outside
    /// the valid range (1-64).
    pub fn new(client: GraphQlClient, workers: usize) -> Result<Self, PipelineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(PipelineError::InvalidWorkerCount { value: workers });
        }
        Ok(Self { client, workers })
    }

    /// Returns the configured pool size.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns every worker. The caller's `output` sender is consumed so the
    /// output queue closes once all workers have exited.
    pub fn spawn(
        &self,
        input: &SharedReceiver,
        output: mpsc::Sender<WorkerMessage>,
        stats: &Arc<PipelineStats>,
    ) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, "starting dashboard detail workers");
        (0..self.workers)
            .map(|worker| {
                let client = self.client.clone();
                let input = Arc::clone(input);
                let output = output.clone();
                let stats = Arc::clone(stats);
                tokio::spawn(async move {
                    run_worker(worker, &client, &input, &output, &stats).await;
                })
            })
            .collect()
    }
}

#[instrument(skip(client, input, output, stats))]
async fn run_worker(
    worker: usize,
    client: &GraphQlClient,
    input: &SharedReceiver,
    output: &mpsc::Sender<WorkerMessage>,
    stats: &PipelineStats,
) {
    loop {
        let next = input.lock().await.recv().await;
        let Some(guid) = next else {
            break;
        };

        let body = client
            .fetch_graphql(&GraphQlPayload::dashboard_detail(guid.as_str()))
            .await;
        stats.increment_details();

        let response = match GraphQlResponse::<DashboardDetailData>::from_slice(&body) {
            Ok(response) => response,
            Err(e) => {
                warn!(%guid, error = %e, "unparseable dashboard detail, skipping");
                stats.increment_parse_failures();
                continue;
            }
        };

        match decompose_detail(response) {
            DetailOutcome::Widgets(widgets) => {
                for widget in widgets {
                    stats.increment_widgets_emitted();
                    if output.send(WorkerMessage::Widget(widget)).await.is_err() {
                        warn!("output queue closed, worker stopping early");
                        return;
                    }
                }
            }
            DetailOutcome::NotFound => {
                debug!(%guid, "dashboard not found, skipping");
                stats.increment_not_found();
            }
            DetailOutcome::UpstreamError(messages) => {
                warn!(%guid, errors = ?messages, "dashboard detail query reported errors, skipping");
                stats.increment_upstream_errors();
            }
        }
    }

    debug!("input queue drained");
    // The aggregator may already be gone if the run is being torn down.
    let _ = output.send(WorkerMessage::Finished { worker }).await;
}

/// Classifies upstream errors and flattens pages into widgets.
///
/// Only the first reported error decides between a silent "Not Found" skip
/// and a logged skip. Widgets without queries are dropped here, so they never
/// reach the output queue.
#[must_use]
pub fn decompose_detail(response: GraphQlResponse<DashboardDetailData>) -> DetailOutcome {
    if let Some(first) = response.errors.first() {
        if first.message == NOT_FOUND_MESSAGE {
            return DetailOutcome::NotFound;
        }
        return DetailOutcome::UpstreamError(
            response.errors.into_iter().map(|e| e.message).collect(),
        );
    }

    let mut widgets = Vec::new();
    for page in response.data.actor.entity.pages {
        debug!(page = %page.guid, widgets = page.widgets.len(), "found dashboard page");
        widgets.extend(
            page.widgets
                .into_iter()
                .filter_map(|raw| parse_widget(raw, &page.guid)),
        );
    }
    DetailOutcome::Widgets(widgets)
}

/// Converts a raw widget, dropping it when it has no queries or its id is
/// not numeric.
fn parse_widget(raw: RawWidget, page_guid: &str) -> Option<Widget> {
    let queries = raw.configuration.displayed_queries();
    if queries.is_empty() {
        return None;
    }
    let id = match raw.id.trim().parse::<i64>() {
        Ok(id) => id,
        Err(e) => {
            warn!(id = %raw.id, page = %page_guid, error = %e, "widget id is not numeric, dropping widget");
            return None;
        }
    };
    Some(Widget {
        id,
        title: raw.title,
        page_guid: page_guid.to_string(),
        queries,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn response(value: Value) -> GraphQlResponse<DashboardDetailData> {
        serde_json::from_value(value).unwrap()
    }

    fn slot(query: &str) -> Value {
        json!({"nrqlQueries": [{"accountId": 7, "query": query}]})
    }

    #[test]
    fn test_not_found_is_silent_skip() {
        let outcome = decompose_detail(response(json!({
            "data": {"actor": {"entity": null}},
            "errors": [{"message": "Not Found"}]
        })));
        assert_eq!(outcome, DetailOutcome::NotFound);
    }

    #[test]
    fn test_other_error_is_reported_skip() {
        let outcome = decompose_detail(response(json!({
            "data": null,
            "errors": [{"message": "Rate limited"}, {"message": "Not Found"}]
        })));
        assert_eq!(
            outcome,
            DetailOutcome::UpstreamError(vec!["Rate limited".to_string(), "Not Found".to_string()])
        );
    }

    #[test]
    fn test_widgets_tagged_with_page_guid_and_markdown_dropped() {
        let outcome = decompose_detail(response(json!({
            "data": {"actor": {"entity": {"name": "Ops", "pages": [
                {"guid": "page-a", "name": "A", "widgets": [
                    {"id": "11", "title": "Errors", "configuration": {"line": slot("SELECT count(*)")}},
                    {"id": "12", "title": "Notes", "configuration": {"markdown": {"text": "hi"}}}
                ]},
                {"guid": "page-b", "name": "B", "widgets": [
                    {"id": "21", "title": "Latency", "configuration": {"table": slot("SELECT average(duration)")}}
                ]}
            ]}}}
        })));

        let DetailOutcome::Widgets(widgets) = outcome else {
            panic!("expected widgets");
        };
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[0].id, 11);
        assert_eq!(widgets[0].page_guid, "page-a");
        assert_eq!(widgets[0].queries[0].account_id, 7);
        assert_eq!(widgets[1].id, 21);
        assert_eq!(widgets[1].page_guid, "page-b");
    }

    #[test]
    fn test_bar_wins_over_billboard() {
        let outcome = decompose_detail(response(json!({
            "data": {"actor": {"entity": {"pages": [
                {"guid": "page", "widgets": [
                    {"id": "5", "title": "Mixed", "configuration": {
                        "area": {"nrqlQueries": []},
                        "bar": slot("SELECT bar"),
                        "billboard": slot("SELECT billboard")
                    }}
                ]}
            ]}}}
        })));

        let DetailOutcome::Widgets(widgets) = outcome else {
            panic!("expected widgets");
        };
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].queries.len(), 1);
        assert_eq!(widgets[0].queries[0].query, "SELECT bar");
    }

    #[test]
    fn test_non_numeric_widget_id_dropped() {
        let outcome = decompose_detail(response(json!({
            "data": {"actor": {"entity": {"pages": [
                {"guid": "page", "widgets": [
                    {"id": "abc", "title": "Bad", "configuration": {"pie": slot("SELECT 1")}}
                ]}
            ]}}}
        })));
        assert_eq!(outcome, DetailOutcome::Widgets(vec![]));
    }

    #[test]
    fn test_pool_rejects_invalid_worker_counts() {
        let settings = crate::graphql::ClientSettings::new(
            "http://127.0.0.1:9/graphql",
            crate::graphql::ApiKey::new("key"),
        );
        let client = GraphQlClient::new(&settings).unwrap();

        assert!(matches!(
            WorkerPool::new(client.clone(), 0),
            Err(PipelineError::InvalidWorkerCount { value: 0 })
        ));
        assert!(matches!(
            WorkerPool::new(client.clone(), MAX_WORKERS + 1),
            Err(PipelineError::InvalidWorkerCount { .. })
        ));
        assert_eq!(WorkerPool::new(client, DEFAULT_WORKERS).unwrap().workers(), 10);
    }

    #[tokio::test]
    async fn test_workers_finish_on_closed_empty_queue() {
        let settings = crate::graphql::ClientSettings::new(
            "http://127.0.0.1:9/graphql",
            crate::graphql::ApiKey::new("key"),
        );
        let pool = WorkerPool::new(GraphQlClient::new(&settings).unwrap(), 3).unwrap();

        let (input_tx, input_rx) = mpsc::channel::<String>(3);
        drop(input_tx);
        let (output_tx, mut output_rx) = mpsc::channel(3);
        let stats = Arc::new(PipelineStats::new());

        let handles = pool.spawn(&Arc::new(Mutex::new(input_rx)), output_tx, &stats);
        for handle in handles {
            handle.await.unwrap();
        }

        let mut finished = Vec::new();
        while let Some(message) = output_rx.recv().await {
            let WorkerMessage::Finished { worker } = message else {
                panic!("unexpected message {message:?}");
            };
            finished.push(worker);
        }
        finished.sort_unstable();
        assert_eq!(finished, vec![0, 1, 2]);
        assert_eq!(stats.details_fetched(), 0);
    }
}
