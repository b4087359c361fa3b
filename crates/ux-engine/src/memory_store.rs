use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ux_core::{
    Episode, EpisodeId, EpisodeStatus, Finding, Flow, FlowId, Persona, PersonaId, ReportJson, Run,
    RunId, RunStatus, StepTrace, Store, StoreError,
};

#[derive(Default)]
struct State {
    flows: HashMap<FlowId, Flow>,
    personas: HashMap<PersonaId, Persona>,
    runs: HashMap<RunId, Run>,
    episodes: HashMap<EpisodeId, Episode>,
    /// Episode ids per Run in creation order.
    run_episodes: HashMap<RunId, Vec<EpisodeId>>,
    traces: HashMap<EpisodeId, Vec<StepTrace>>,
    findings: HashMap<RunId, Vec<Finding>>,
}

/// In-memory store. One lock guards every entity so each call is atomic.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_flow(&self, flow: Flow) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.flows.insert(flow.id.clone(), flow);
        Ok(())
    }

    async fn get_flow(&self, id: &str) -> Result<Flow, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .flows
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("Flow", id))
    }

    async fn put_persona(&self, persona: Persona) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.personas.insert(persona.id.clone(), persona);
        Ok(())
    }

    async fn get_persona(&self, id: &str) -> Result<Persona, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .personas
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("Persona", id))
    }

    async fn create_run(&self, run: Run, episodes: Vec<Episode>) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        if state.runs.contains_key(&run.id) {
            return Err(StoreError::AlreadyExists {
                kind: "Run",
                id: run.id.to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for episode in &episodes {
            if episode.run_id != run.id {
                return Err(StoreError::Other(format!(
                    "Episode {} belongs to run {}, not {}",
                    episode.id, episode.run_id, run.id
                )));
            }
            if !seen.insert(episode.persona_id.as_str()) {
                return Err(StoreError::AlreadyExists {
                    kind: "Episode",
                    id: format!("{}/{}", run.id, episode.persona_id),
                });
            }
            if state.episodes.contains_key(&episode.id) {
                return Err(StoreError::AlreadyExists {
                    kind: "Episode",
                    id: episode.id.to_string(),
                });
            }
        }

        let ids = episodes.iter().map(|e| e.id).collect();
        for episode in episodes {
            state.traces.insert(episode.id, Vec::new());
            state.episodes.insert(episode.id, episode);
        }
        state.run_episodes.insert(run.id, ids);
        state.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Run, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.runs.get(&id).cloned().ok_or_else(|| not_found("Run", id))
    }

    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let run = state.runs.get_mut(&id).ok_or_else(|| not_found("Run", id))?;
        run.status = status;
        Ok(())
    }

    async fn transition_run(
        &self,
        id: RunId,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let run = state.runs.get_mut(&id).ok_or_else(|| not_found("Run", id))?;
        if !from.contains(&run.status) {
            return Ok(false);
        }
        run.status = to;
        Ok(true)
    }

    async fn try_mark_aggregation_triggered(&self, id: RunId) -> Result<bool, StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let run = state.runs.get_mut(&id).ok_or_else(|| not_found("Run", id))?;
        if run.aggregation_triggered {
            return Ok(false);
        }
        run.aggregation_triggered = true;
        Ok(true)
    }

    async fn clear_aggregation_triggered(&self, id: RunId) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let run = state.runs.get_mut(&id).ok_or_else(|| not_found("Run", id))?;
        run.aggregation_triggered = false;
        Ok(())
    }

    async fn save_report(&self, id: RunId, report: ReportJson) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let run = state.runs.get_mut(&id).ok_or_else(|| not_found("Run", id))?;
        let findings = report.findings.clone();
        run.report_json = Some(report);
        state.findings.insert(id, findings);
        Ok(())
    }

    async fn list_findings(&self, run_id: RunId) -> Result<Vec<Finding>, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !state.runs.contains_key(&run_id) {
            return Err(not_found("Run", run_id));
        }
        Ok(state.findings.get(&run_id).cloned().unwrap_or_default())
    }

    async fn set_recommended_fix(
        &self,
        run_id: RunId,
        finding_index: usize,
        fix: String,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let finding = state
            .findings
            .get_mut(&run_id)
            .and_then(|findings| findings.get_mut(finding_index))
            .ok_or_else(|| not_found("Finding", format!("{}#{}", run_id, finding_index)))?;
        finding.recommended_fix = Some(fix);
        Ok(())
    }

    async fn get_episode(&self, id: EpisodeId) -> Result<Episode, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .episodes
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Episode", id))
    }

    async fn list_episodes(&self, run_id: RunId) -> Result<Vec<Episode>, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let ids = state
            .run_episodes
            .get(&run_id)
            .ok_or_else(|| not_found("Run", run_id))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.episodes.get(id).cloned())
            .collect())
    }

    async fn transition_episode(
        &self,
        id: EpisodeId,
        from: &[EpisodeStatus],
        to: EpisodeStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let episode = state
            .episodes
            .get_mut(&id)
            .ok_or_else(|| not_found("Episode", id))?;
        if !from.contains(&episode.status) {
            return Ok(false);
        }
        episode.status = to;
        Ok(true)
    }

    async fn append_step_trace(&self, trace: StepTrace) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let episode_id = trace.episode_id;
        let episode = state
            .episodes
            .get_mut(&episode_id)
            .ok_or_else(|| not_found("Episode", episode_id))?;

        if trace.step_index != episode.step_count {
            return Err(StoreError::StepIndexGap {
                episode_id,
                expected: episode.step_count,
                actual: trace.step_index,
            });
        }
        episode.step_count += 1;
        state.traces.entry(episode_id).or_default().push(trace);
        Ok(())
    }

    async fn list_step_traces(&self, episode_id: EpisodeId) -> Result<Vec<StepTrace>, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .traces
            .get(&episode_id)
            .cloned()
            .ok_or_else(|| not_found("Episode", episode_id))
    }
}
