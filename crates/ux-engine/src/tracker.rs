//! Completion Tracker: triggers aggregation once every Episode of a Run is terminal.

use std::sync::Arc;

use tracing::{debug, info, warn};
use ux_core::{Job, JobQueue, RunId, RunStatus, SharedMetrics, Store, TrackerError};

pub struct CompletionTracker {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    metrics: SharedMetrics,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, metrics: SharedMetrics) -> Self {
        CompletionTracker {
            store,
            queue,
            metrics,
        }
    }

    /// Called after an Episode of `run_id` reached a terminal status.
    ///
    /// Safe to call any number of times, concurrently and out of order.
    /// Returns true only for the call that enqueued the aggregation job.
    pub async fn on_episode_terminal(&self, run_id: RunId) -> Result<bool, TrackerError> {
        match self.trigger(run_id).await {
            Ok(triggered) => Ok(triggered),
            Err(TrackerError::DuplicateTrigger(_)) => {
                self.metrics.record_duplicate_trigger();
                debug!(%run_id, "Aggregation already triggered");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn trigger(&self, run_id: RunId) -> Result<bool, TrackerError> {
        let episodes = self.store.list_episodes(run_id).await?;
        let pending = episodes.iter().filter(|e| !e.status.is_terminal()).count();
        if pending > 0 {
            debug!(%run_id, pending, "Run still has episodes in flight");
            return Ok(false);
        }

        if !self.store.try_mark_aggregation_triggered(run_id).await? {
            return Err(TrackerError::DuplicateTrigger(run_id));
        }

        if let Err(e) = self.queue.enqueue(&Job::AggregateReport { run_id }).await {
            // A redelivered episode job must be able to trigger again.
            warn!(%run_id, error = %e, "Could not enqueue aggregation, clearing trigger");
            self.store.clear_aggregation_triggered(run_id).await?;
            return Err(e.into());
        }
        info!(%run_id, episodes = episodes.len(), "All episodes terminal, aggregation enqueued");
        Ok(true)
    }

    /// Re-enqueue aggregation for a Run whose report has not been written.
    ///
    /// Used after an aggregation failure left the Run SIMULATING. Returns false
    /// if the Run is already COMPLETED or FAILED.
    pub async fn retry_aggregation(&self, run_id: RunId) -> Result<bool, TrackerError> {
        let run = self.store.get_run(run_id).await?;
        if !matches!(run.status, RunStatus::Pending | RunStatus::Simulating) {
            debug!(%run_id, status = ?run.status, "Run not awaiting aggregation");
            return Ok(false);
        }

        if !run.aggregation_triggered {
            return self.on_episode_terminal(run_id).await;
        }

        warn!(%run_id, "Retrying aggregation");
        self.queue.enqueue(&Job::AggregateReport { run_id }).await?;
        Ok(true)
    }
}
