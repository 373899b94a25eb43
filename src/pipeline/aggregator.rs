//! Single-writer merge of worker output into the result map.
//!
//! The aggregator is the only owner of the result map for the whole fan-out.
//! It stops after observing one [`WorkerMessage::Finished`] per worker and
//! only then sorts each dashboard's widget ids, so no caller ever sees a
//! partially merged map.

use std::collections::BTreeMap;
use std::collections::hash_map::Entry;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::PipelineStats;
use super::worker::WorkerMessage;
use crate::model::{Dashboard, Widget};

/// Result of merging one widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// A widget with the same id already existed and was replaced.
    Replaced,
    /// No dashboard with the widget's page GUID exists; the widget is dropped.
    Orphan,
}

/// Owner of the result map during and after the worker fan-out.
#[derive(Debug)]
pub struct Aggregator {
    dashboards: BTreeMap<String, Dashboard>,
    workers: usize,
}

impl Aggregator {
    /// Takes ownership of the listed dashboards for a pool of `workers`.
    #[must_use]
    pub fn new(dashboards: BTreeMap<String, Dashboard>, workers: usize) -> Self {
        Self {
            dashboards,
            workers,
        }
    }

    /// Drains `output` until every worker has finished, then sorts.
    ///
    /// If the queue closes before all completions arrive (a worker panicked)
    /// the aggregator logs it and stops instead of waiting forever.
    #[instrument(skip_all, fields(workers = self.workers))]
    pub async fn run(
        mut self,
        mut output: mpsc::Receiver<WorkerMessage>,
        stats: &PipelineStats,
    ) -> BTreeMap<String, Dashboard> {
        let mut finished = 0usize;

        while finished < self.workers {
            match output.recv().await {
                Some(WorkerMessage::Finished { worker }) => {
                    finished += 1;
                    debug!(worker, finished, "worker finished");
                }
                Some(WorkerMessage::Widget(widget)) => match self.merge(widget) {
                    MergeOutcome::Inserted | MergeOutcome::Replaced => stats.increment_merged(),
                    MergeOutcome::Orphan => stats.increment_orphans(),
                },
                None => {
                    warn!(
                        finished,
                        expected = self.workers,
                        "output queue closed before every worker finished"
                    );
                    break;
                }
            }
        }

        info!(widgets = stats.widgets_merged(), orphans = stats.orphans(), "finished merging widget details");
        self.finish()
    }

    /// Applies one widget to its owning dashboard.
    pub fn merge(&mut self, widget: Widget) -> MergeOutcome {
        let Some(dashboard) = self.dashboards.get_mut(&widget.page_guid) else {
            warn!(
                page = %widget.page_guid,
                widget = widget.id,
                "widget references unknown dashboard page, dropping"
            );
            return MergeOutcome::Orphan;
        };

        match dashboard.widgets.entry(widget.id) {
            Entry::Occupied(mut slot) => {
                debug!(page = %widget.page_guid, widget = widget.id, "duplicate widget id, replacing");
                slot.insert(widget);
                MergeOutcome::Replaced
            }
            Entry::Vacant(slot) => {
                dashboard.widget_ids.push(widget.id);
                slot.insert(widget);
                MergeOutcome::Inserted
            }
        }
    }

    /// Sorts every widget id list ascending and releases the map.
    #[must_use]
    pub fn finish(mut self) -> BTreeMap<String, Dashboard> {
        for dashboard in self.dashboards.values_mut() {
            dashboard.widget_ids.sort_unstable();
        }
        self.dashboards
    }
}
