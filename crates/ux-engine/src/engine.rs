//! Episode Step Engine.
//!
//! Drives one Episode from PENDING through RUNNING to a terminal status. Each
//! iteration observes, reasons (with bounded retries), validates, optionally
//! acts, and appends exactly one StepTrace. The loop is strictly sequential;
//! no lock is held across the reasoning or browser calls.

use std::sync::Arc;

use tracing::{debug, info, warn};
use ux_core::{
    validate_reasoning, Action, ActionError, Automation, BrowserSession, EngineError, Episode,
    EpisodeId, EpisodeStatus, Flow, FlowMode, FlowTarget, Job, Observation, PageState, Persona,
    ReasoningOutput, Reasoner, Run, RunId, SharedMetrics, StepInput, StepReasoning, StepTrace,
    Store,
};

use crate::tracker::CompletionTracker;

/// Reasoning calls per step before the Episode is FAILED.
pub const MAX_REASONING_ATTEMPTS: u32 = 3;

/// Consecutive failed browser actions before the Episode is FAILED.
pub const MAX_CONSECUTIVE_ACTION_FAILURES: u32 = 3;

/// Per-job parameters carried by an episode job.
#[derive(Debug, Clone)]
struct EpisodeTask {
    episode_id: EpisodeId,
    run_id: RunId,
    model: String,
    max_steps: u32,
    seed: Option<u64>,
    mode: FlowMode,
    target: Option<(String, String)>,
}

impl EpisodeTask {
    fn from_job(job: &Job) -> Result<Self, EngineError> {
        match job {
            Job::SimulateEpisode {
                episode_id,
                run_id,
                model,
                max_steps,
                seed,
            } => Ok(EpisodeTask {
                episode_id: *episode_id,
                run_id: *run_id,
                model: model.clone(),
                max_steps: *max_steps,
                seed: *seed,
                mode: FlowMode::Screenshot,
                target: None,
            }),
            Job::SimulateAgentEpisode {
                episode_id,
                run_id,
                model,
                max_steps,
                url,
                goal,
            } => Ok(EpisodeTask {
                episode_id: *episode_id,
                run_id: *run_id,
                model: model.clone(),
                max_steps: *max_steps,
                seed: None,
                mode: FlowMode::Agent,
                target: Some((url.clone(), goal.clone())),
            }),
            Job::AggregateReport { .. } => Err(EngineError::UnexpectedJob(job.queue().as_str())),
        }
    }
}

/// Where observations come from for one Episode.
enum Surface<'a> {
    Frames(&'a Flow),
    Browser {
        session: Box<dyn BrowserSession>,
        page: PageState,
        goal: String,
    },
}

/// Mutable per-episode state carried between steps.
#[derive(Default)]
struct EpisodeMemory {
    notes: Vec<String>,
    last_action: Option<String>,
    action_failures: u32,
}

pub struct StepEngine {
    store: Arc<dyn Store>,
    reasoner: Arc<dyn Reasoner>,
    automation: Option<Arc<dyn Automation>>,
    tracker: Arc<CompletionTracker>,
    metrics: SharedMetrics,
}

impl StepEngine {
    pub fn new(
        store: Arc<dyn Store>,
        reasoner: Arc<dyn Reasoner>,
        tracker: Arc<CompletionTracker>,
        metrics: SharedMetrics,
    ) -> Self {
        StepEngine {
            store,
            reasoner,
            automation: None,
            tracker,
            metrics,
        }
    }

    /// Attach the browser automation capability needed by agent-mode jobs.
    pub fn with_automation(mut self, automation: Arc<dyn Automation>) -> Self {
        self.automation = Some(automation);
        self
    }

    /// Process one episode job. Redelivery of a finished job is a no-op.
    pub async fn run_episode(&self, job: &Job) -> Result<EpisodeStatus, EngineError> {
        let task = EpisodeTask::from_job(job)?;
        let episode = self.store.get_episode(task.episode_id).await?;

        if episode.status.is_terminal() {
            debug!(
                episode_id = %episode.id,
                status = episode.status.as_str(),
                "Episode already terminal"
            );
            // The first delivery may have died before notifying.
            self.tracker.on_episode_terminal(episode.run_id).await?;
            return Ok(episode.status);
        }

        if episode.status == EpisodeStatus::Running {
            warn!(episode_id = %episode.id, "Episode redelivered mid-run, marking failed");
            self.finish(&episode, &[EpisodeStatus::Running], EpisodeStatus::Failed)
                .await?;
            return Ok(EpisodeStatus::Failed);
        }

        let run = self.store.get_run(task.run_id).await?;
        let flow = self.store.get_flow(&run.flow_id).await?;
        if flow.mode() != task.mode || run.mode != task.mode {
            return Err(EngineError::ModeMismatch {
                flow_id: flow.id.clone(),
                expected: task.mode.to_string(),
            });
        }
        let persona = self.store.get_persona(&episode.persona_id).await?;
        if task.mode == FlowMode::Agent && self.automation.is_none() {
            return Err(EngineError::NoAutomation(episode.id));
        }

        if !self
            .store
            .transition_episode(episode.id, &[EpisodeStatus::Pending], EpisodeStatus::Running)
            .await?
        {
            let current = self.store.get_episode(episode.id).await?;
            debug!(
                episode_id = %episode.id,
                status = current.status.as_str(),
                "Lost race to start episode"
            );
            return Ok(current.status);
        }
        info!(
            episode_id = %episode.id,
            run_id = %run.id,
            persona_id = %persona.id,
            mode = %task.mode,
            max_steps = task.max_steps,
            "Episode started"
        );

        let status = self.drive(&task, &episode, &run, &flow, &persona).await?;
        self.finish(&episode, &[EpisodeStatus::Running], status)
            .await?;
        Ok(status)
    }

    /// Mark an Episode FAILED after its job was dead-lettered.
    pub async fn fail_episode(&self, episode_id: EpisodeId) -> Result<bool, EngineError> {
        let episode = self.store.get_episode(episode_id).await?;
        self.finish(
            &episode,
            &[EpisodeStatus::Pending, EpisodeStatus::Running],
            EpisodeStatus::Failed,
        )
        .await
    }

    async fn finish(
        &self,
        episode: &Episode,
        from: &[EpisodeStatus],
        status: EpisodeStatus,
    ) -> Result<bool, EngineError> {
        let changed = self
            .store
            .transition_episode(episode.id, from, status)
            .await?;
        if changed {
            match status {
                EpisodeStatus::Completed => self.metrics.record_completed(),
                EpisodeStatus::Abandoned => self.metrics.record_abandoned(),
                EpisodeStatus::Failed => self.metrics.record_failed(),
                _ => {}
            }
            info!(episode_id = %episode.id, status = status.as_str(), "Episode finished");
        }
        self.tracker.on_episode_terminal(episode.run_id).await?;
        Ok(changed)
    }

    async fn drive(
        &self,
        task: &EpisodeTask,
        episode: &Episode,
        run: &Run,
        flow: &Flow,
        persona: &Persona,
    ) -> Result<EpisodeStatus, EngineError> {
        let (mut surface, budget) = match (&flow.target, &task.target) {
            (FlowTarget::Screenshot { frames }, _) => {
                let budget = task.max_steps.min(frames.len() as u32);
                (Surface::Frames(flow), budget)
            }
            (FlowTarget::Agent { .. }, Some((url, goal))) => {
                match self.open_browser(episode.id, url).await {
                    Ok((session, page)) => (
                        Surface::Browser {
                            session,
                            page,
                            goal: goal.clone(),
                        },
                        task.max_steps,
                    ),
                    Err(e) => {
                        warn!(episode_id = %episode.id, error = %e, "Could not open browser session");
                        self.metrics.record_action_error();
                        return Ok(EpisodeStatus::Failed);
                    }
                }
            }
            (FlowTarget::Agent { .. }, None) => {
                return Err(EngineError::ModeMismatch {
                    flow_id: flow.id.clone(),
                    expected: task.mode.to_string(),
                })
            }
        };

        let result = if budget == 0 {
            debug!(episode_id = %episode.id, "Nothing to observe, completing");
            Ok(EpisodeStatus::Completed)
        } else {
            self.steps(task, episode, run, persona, &mut surface, budget)
                .await
        };
        if let Surface::Browser { mut session, .. } = surface {
            session.close().await;
        }
        result
    }

    async fn steps(
        &self,
        task: &EpisodeTask,
        episode: &Episode,
        run: &Run,
        persona: &Persona,
        surface: &mut Surface<'_>,
        budget: u32,
    ) -> Result<EpisodeStatus, EngineError> {
        let mut memory = EpisodeMemory::default();
        let mut step_index = 0u32;
        let status = loop {
            let (observation, screenshot_path, goal) = observe(surface, step_index);
            let mut input = StepInput {
                run_id: run.id,
                episode_id: episode.id,
                model: task.model.clone(),
                mode: task.mode,
                persona: persona.clone(),
                step_index,
                max_steps: task.max_steps,
                observation: observation.clone(),
                screenshot_path: screenshot_path.clone(),
                goal,
                memory: memory.notes.clone(),
                last_action: memory.last_action.clone(),
                attempt: 1,
                seed: task.seed.or(episode.seed),
            };

            let output = match self.reason(&mut input).await {
                Ok(output) => output,
                Err(error) => {
                    warn!(episode_id = %episode.id, step_index, %error, "Reasoning failed after retries");
                    self.record(StepTrace {
                        episode_id: episode.id,
                        step_index,
                        observation,
                        reasoning: StepReasoning {
                            output: None,
                            error: Some(error),
                        },
                        scores: None,
                        screenshot_path,
                    })
                    .await?;
                    break EpisodeStatus::Failed;
                }
            };

            if let Some(note) = output.memory_update() {
                memory.notes.push(note.to_string());
            }
            memory.last_action = Some(action_label(&output));

            let mut action_error = None;
            let terminal = if output.finishes_goal() {
                Some(EpisodeStatus::Completed)
            } else if task.mode == FlowMode::Screenshot && output.likely_action() == Action::Abandon
            {
                Some(EpisodeStatus::Abandoned)
            } else {
                if let (Surface::Browser { session, page, .. }, Some(action)) =
                    (&mut *surface, output.browser_action())
                {
                    match session.execute(action).await {
                        Ok(next) => {
                            *page = next;
                            memory.action_failures = 0;
                        }
                        Err(e) => {
                            memory.action_failures += 1;
                            self.metrics.record_action_error();
                            warn!(
                                episode_id = %episode.id,
                                step_index,
                                action = action.kind(),
                                failures = memory.action_failures,
                                error = %e,
                                "Browser action failed"
                            );
                            action_error = Some(e.to_string());
                        }
                    }
                }

                if memory.action_failures >= MAX_CONSECUTIVE_ACTION_FAILURES {
                    Some(EpisodeStatus::Failed)
                } else if step_index + 1 >= budget {
                    Some(EpisodeStatus::Completed)
                } else {
                    None
                }
            };

            let scores = output.scores();
            self.record(StepTrace {
                episode_id: episode.id,
                step_index,
                observation,
                reasoning: StepReasoning {
                    output: Some(output),
                    error: action_error,
                },
                scores: Some(scores),
                screenshot_path,
            })
            .await?;

            if let Some(status) = terminal {
                break status;
            }
            step_index += 1;
        };

        Ok(status)
    }

    async fn open_browser(
        &self,
        episode_id: EpisodeId,
        url: &str,
    ) -> Result<(Box<dyn BrowserSession>, PageState), ActionError> {
        let automation = self
            .automation
            .as_ref()
            .ok_or(ActionError::SessionClosed)?;
        let mut session = automation.open(episode_id, url).await?;
        match session.observe().await {
            Ok(page) => Ok((session, page)),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Call the reasoner until the output validates, at most
    /// [`MAX_REASONING_ATTEMPTS`] times. Returns the last error otherwise.
    /// A non-transient provider error ends the retries at once.
    async fn reason(&self, input: &mut StepInput) -> Result<ReasoningOutput, String> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_REASONING_ATTEMPTS {
            input.attempt = attempt;
            let started = tokio::time::Instant::now();
            let result = self.reasoner.reason(input).await;
            self.metrics
                .record_reasoning_latency(started.elapsed())
                .await;

            match result {
                Ok(raw) => match validate_reasoning(input.mode, &raw) {
                    Ok(output) => return Ok(output),
                    Err(e) => {
                        self.metrics.record_validation_retry();
                        debug!(
                            episode_id = %input.episode_id,
                            step_index = input.step_index,
                            attempt,
                            error = %e,
                            "Reasoning output rejected"
                        );
                        last_error = e.to_string();
                    }
                },
                Err(e) => {
                    self.metrics.record_provider_error();
                    debug!(
                        episode_id = %input.episode_id,
                        step_index = input.step_index,
                        attempt,
                        transient = e.is_transient(),
                        error = %e,
                        "Reasoning call failed"
                    );
                    if !e.is_transient() {
                        return Err(e.to_string());
                    }
                    last_error = e.to_string();
                }
            }
        }

        Err(last_error)
    }

    async fn record(&self, trace: StepTrace) -> Result<(), EngineError> {
        let step_index = trace.step_index;
        let episode_id = trace.episode_id;
        self.store.append_step_trace(trace).await?;
        self.metrics.record_step();
        debug!(%episode_id, step_index, "Step recorded");
        Ok(())
    }
}

fn observe(
    surface: &Surface<'_>,
    step_index: u32,
) -> (Observation, Option<String>, Option<String>) {
    match surface {
        Surface::Frames(flow) => {
            let index = step_index as usize;
            let frame = &flow.frames()[index];
            (
                Observation::Frame {
                    frame_index: index,
                    frame_id: frame.id.clone(),
                },
                Some(frame.image_path.clone()),
                None,
            )
        }
        Surface::Browser { page, goal, .. } => (
            Observation::from_page(page),
            page.screenshot_path.clone(),
            Some(goal.clone()),
        ),
    }
}

fn action_label(output: &ReasoningOutput) -> String {
    match output.browser_action() {
        Some(action) => action.kind().to_string(),
        None => output.likely_action().as_str().to_string(),
    }
}
