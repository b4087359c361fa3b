//! Job Dispatcher: creates a Run with one Episode per Persona and enqueues
//! one simulation job per Episode.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info};
use ux_config::UxConfig;
use ux_core::{
    DispatchError, Episode, FlowTarget, Job, JobQueue, PersonaId, Run, RunConfig, RunId, RunStatus,
    Store,
};

pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    max_steps_cap: u32,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, max_steps_cap: u32) -> Self {
        Dispatcher {
            store,
            queue,
            max_steps_cap,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, config: &UxConfig) -> Self {
        Self::new(store, queue, config.max_steps_cap())
    }

    /// Check a RunConfig and persona list before anything is written.
    pub fn validate(
        &self,
        config: &RunConfig,
        persona_ids: &[PersonaId],
    ) -> Result<(), DispatchError> {
        if config.model.trim().is_empty() {
            return Err(DispatchError::InvalidConfig("model must not be empty".to_string()));
        }
        if config.max_steps == 0 || config.max_steps > self.max_steps_cap {
            return Err(DispatchError::InvalidConfig(format!(
                "maxSteps {} is outside 1..={}",
                config.max_steps, self.max_steps_cap
            )));
        }
        if persona_ids.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "at least one persona is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for id in persona_ids {
            if !seen.insert(id.as_str()) {
                return Err(DispatchError::InvalidConfig(format!(
                    "persona '{}' listed more than once",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Create the Run and its Episodes atomically, then enqueue their jobs.
    ///
    /// Nothing is written if validation or any lookup fails. The Run becomes
    /// SIMULATING once every job is enqueued, or FAILED if an enqueue fails.
    pub async fn dispatch(
        &self,
        flow_id: &str,
        persona_ids: &[PersonaId],
        config: RunConfig,
    ) -> Result<RunId, DispatchError> {
        self.validate(&config, persona_ids)?;

        let flow = self.store.get_flow(flow_id).await?;
        for id in persona_ids {
            let persona = self.store.get_persona(id).await?;
            persona
                .validate()
                .map_err(|source| DispatchError::InvalidPersona {
                    persona_id: id.clone(),
                    source,
                })?;
        }

        let run = Run::new(&flow, config);
        let run_id = run.id;
        let episodes: Vec<Episode> = persona_ids
            .iter()
            .map(|id| Episode::new(&run, id.clone()))
            .collect();
        let jobs: Vec<Job> = episodes
            .iter()
            .map(|episode| match &flow.target {
                FlowTarget::Screenshot { .. } => Job::SimulateEpisode {
                    episode_id: episode.id,
                    run_id,
                    model: run.config.model.clone(),
                    max_steps: run.config.max_steps,
                    seed: episode.seed,
                },
                FlowTarget::Agent { url, goal } => Job::SimulateAgentEpisode {
                    episode_id: episode.id,
                    run_id,
                    model: run.config.model.clone(),
                    max_steps: run.config.max_steps,
                    url: url.clone(),
                    goal: goal.clone(),
                },
            })
            .collect();
        let mode = run.mode;

        self.store.create_run(run, episodes).await?;

        for job in &jobs {
            if let Err(e) = self.queue.enqueue(job).await {
                error!(%run_id, error = %e, "Failed to enqueue episode job");
                self.store.set_run_status(run_id, RunStatus::Failed).await?;
                return Err(e.into());
            }
        }

        // Workers may already have finished the Run.
        self.store
            .transition_run(run_id, &[RunStatus::Pending], RunStatus::Simulating)
            .await?;

        info!(%run_id, flow_id, %mode, episodes = jobs.len(), "Run dispatched");
        Ok(run_id)
    }
}
