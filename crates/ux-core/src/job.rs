use serde::{Deserialize, Serialize};

use crate::model::{EpisodeId, RunId};

/// Named queues, one per job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    SimulateEpisode,
    SimulateAgentEpisode,
    AggregateReport,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::SimulateEpisode => "SIMULATE_EPISODE",
            QueueName::SimulateAgentEpisode => "SIMULATE_AGENT_EPISODE",
            QueueName::AggregateReport => "AGGREGATE_REPORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SIMULATE_EPISODE" => Some(QueueName::SimulateEpisode),
            "SIMULATE_AGENT_EPISODE" => Some(QueueName::SimulateAgentEpisode),
            "AGGREGATE_REPORT" => Some(QueueName::AggregateReport),
            _ => None,
        }
    }
}

/// A typed job payload. Delivery is at-least-once; handlers are idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "queue",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Job {
    SimulateEpisode {
        episode_id: EpisodeId,
        run_id: RunId,
        model: String,
        max_steps: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
    SimulateAgentEpisode {
        episode_id: EpisodeId,
        run_id: RunId,
        model: String,
        max_steps: u32,
        url: String,
        goal: String,
    },
    AggregateReport {
        run_id: RunId,
    },
}

impl Job {
    pub fn queue(&self) -> QueueName {
        match self {
            Job::SimulateEpisode { .. } => QueueName::SimulateEpisode,
            Job::SimulateAgentEpisode { .. } => QueueName::SimulateAgentEpisode,
            Job::AggregateReport { .. } => QueueName::AggregateReport,
        }
    }

    /// Deduplication key within the job's queue.
    pub fn key(&self) -> String {
        match self {
            Job::SimulateEpisode { episode_id, .. }
            | Job::SimulateAgentEpisode { episode_id, .. } => episode_id.to_string(),
            Job::AggregateReport { run_id } => run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Job::SimulateEpisode { run_id, .. }
            | Job::SimulateAgentEpisode { run_id, .. }
            | Job::AggregateReport { run_id } => *run_id,
        }
    }

    pub fn episode_id(&self) -> Option<EpisodeId> {
        match self {
            Job::SimulateEpisode { episode_id, .. }
            | Job::SimulateAgentEpisode { episode_id, .. } => Some(*episode_id),
            Job::AggregateReport { .. } => None,
        }
    }
}
