use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ActionError, ProviderError, QueueError, StoreError};
use crate::job::Job;
use crate::model::{
    Episode, EpisodeId, EpisodeStatus, Flow, FlowMode, Observation, PageState, Persona, Run,
    RunId, RunStatus, StepTrace,
};
use crate::reasoning::BrowserAction;
use crate::report::{Finding, ReportJson};

/// Everything the reasoning collaborator needs for one step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    pub run_id: RunId,
    pub episode_id: EpisodeId,
    /// Model identifier from the Run's config.
    pub model: String,
    pub mode: FlowMode,
    pub persona: Persona,
    pub step_index: u32,
    pub max_steps: u32,
    pub observation: Observation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Notes accumulated from earlier `memoryUpdate`s.
    pub memory: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    /// 1-based attempt number for this step.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// The language-model boundary. Retries are the caller's job.
#[async_trait]
pub trait Reasoner: Send + Sync + 'static {
    async fn reason(&self, input: &StepInput) -> Result<Value, ProviderError>;
}

/// Browser automation capability used by agent-mode episodes.
#[async_trait]
pub trait Automation: Send + Sync + 'static {
    /// Open a fresh session on `url` for one episode.
    async fn open(
        &self,
        episode_id: EpisodeId,
        url: &str,
    ) -> Result<Box<dyn BrowserSession>, ActionError>;
}

/// A single episode's browser.
#[async_trait]
pub trait BrowserSession: Send {
    /// Current page state without acting.
    async fn observe(&mut self) -> Result<PageState, ActionError>;

    /// Execute an action and return the resulting page state.
    async fn execute(&mut self, action: &BrowserAction) -> Result<PageState, ActionError>;

    async fn close(&mut self);
}

/// Produces the recommended fix for a Finding.
#[async_trait]
pub trait FixAdvisor: Send + Sync {
    async fn recommend(&self, finding: &Finding) -> Result<String, ProviderError>;
}

/// Enqueue side of the job queue.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;
}

/// Persistence collaborator. Every method is individually atomic.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn put_flow(&self, flow: Flow) -> Result<(), StoreError>;
    async fn get_flow(&self, id: &str) -> Result<Flow, StoreError>;

    async fn put_persona(&self, persona: Persona) -> Result<(), StoreError>;
    async fn get_persona(&self, id: &str) -> Result<Persona, StoreError>;

    /// Persist a Run together with its Episodes as one unit.
    async fn create_run(&self, run: Run, episodes: Vec<Episode>) -> Result<(), StoreError>;
    async fn get_run(&self, id: RunId) -> Result<Run, StoreError>;
    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError>;

    /// Move a Run to `to` if its current status is one of `from`.
    async fn transition_run(
        &self,
        id: RunId,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<bool, StoreError>;

    /// Compare-and-set the Run's aggregation flag from false to true.
    /// Returns false if it was already set.
    async fn try_mark_aggregation_triggered(&self, id: RunId) -> Result<bool, StoreError>;

    /// Reset the aggregation flag after the aggregation job could not be enqueued.
    async fn clear_aggregation_triggered(&self, id: RunId) -> Result<(), StoreError>;

    /// Persist the Report and its Findings.
    async fn save_report(&self, id: RunId, report: ReportJson) -> Result<(), StoreError>;
    async fn list_findings(&self, run_id: RunId) -> Result<Vec<Finding>, StoreError>;
    async fn set_recommended_fix(
        &self,
        run_id: RunId,
        finding_index: usize,
        fix: String,
    ) -> Result<(), StoreError>;

    async fn get_episode(&self, id: EpisodeId) -> Result<Episode, StoreError>;
    /// Episodes of a Run in creation order.
    async fn list_episodes(&self, run_id: RunId) -> Result<Vec<Episode>, StoreError>;

    /// Move an Episode to `to` if its current status is one of `from`.
    /// Returns false (and changes nothing) otherwise.
    async fn transition_episode(
        &self,
        id: EpisodeId,
        from: &[EpisodeStatus],
        to: EpisodeStatus,
    ) -> Result<bool, StoreError>;

    /// Append a StepTrace; `step_index` must equal the episode's step count.
    async fn append_step_trace(&self, trace: StepTrace) -> Result<(), StoreError>;
    /// StepTraces of an Episode ordered by `step_index`.
    async fn list_step_traces(&self, episode_id: EpisodeId) -> Result<Vec<StepTrace>, StoreError>;
}
