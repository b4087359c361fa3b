//! Finding Aggregator.
//!
//! Turns every StepTrace of a terminal Run into a [`ReportJson`]: screens,
//! findings clustered by exact `(issue, elementRef)`, per-screen statistics,
//! per-persona rollups and a summary. The report depends only on stored
//! traces and their order, so rebuilding it yields identical bytes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};
use url::Url;
use ux_core::{
    AggregationError, Episode, EpisodeStatus, Finding, FixAdvisor, Observation, PersonaRollup,
    ReportJson, ReportSummary, RunId, RunStatus, ScreenStats, SharedMetrics, StepConfusion,
    StepTrace, Store,
};

/// Assigns stable screen indexes within one Run.
#[derive(Default)]
struct ScreenIndex {
    /// URL pathname to index, in first-occurrence order.
    paths: IndexMap<String, usize>,
    labels: BTreeMap<usize, String>,
}

impl ScreenIndex {
    fn assign(&mut self, observation: &Observation) -> usize {
        match observation {
            Observation::Frame {
                frame_index,
                frame_id,
            } => {
                self.labels
                    .entry(*frame_index)
                    .or_insert_with(|| frame_id.clone());
                *frame_index
            }
            Observation::Page { url, .. } => {
                let path = url.as_deref().map(pathname).unwrap_or_default();
                let next = self.paths.len();
                let index = *self.paths.entry(path.clone()).or_insert(next);
                self.labels.entry(index).or_insert(path);
                index
            }
        }
    }

    fn label(&self, index: usize) -> String {
        self.labels.get(&index).cloned().unwrap_or_default()
    }
}

/// Pathname of `raw`, or `raw` itself when it is not an absolute URL.
fn pathname(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw.to_string(),
    }
}

/// A Finding under construction.
struct Cluster {
    issue: String,
    element_ref: Option<String>,
    evidence: String,
    severity: f64,
    step_index: u32,
    screen_index: usize,
    frequency: u32,
    personas: BTreeSet<String>,
}

#[derive(Default)]
struct ScreenAcc {
    friction_sum: f64,
    friction_max: f64,
    dropoff_sum: f64,
    scored: u32,
    confusions: u32,
    steps: u32,
}

fn mean(sum: f64, count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub struct Aggregator {
    store: Arc<dyn Store>,
    metrics: SharedMetrics,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, metrics: SharedMetrics) -> Self {
        Aggregator { store, metrics }
    }

    /// Build, persist, and complete. A no-op for an already COMPLETED Run.
    ///
    /// On error nothing is written and the Run keeps its status.
    pub async fn aggregate(&self, run_id: RunId) -> Result<ReportJson, AggregationError> {
        let run = self.store.get_run(run_id).await?;
        if run.status == RunStatus::Completed {
            if let Some(report) = run.report_json {
                debug!(%run_id, "Run already aggregated");
                return Ok(report);
            }
        }

        let report = self.build_report(run_id).await?;
        // Serialization must succeed before anything is persisted.
        let bytes = report.to_canonical_json()?;

        self.store.save_report(run_id, report.clone()).await?;
        self.store
            .transition_run(
                run_id,
                &[RunStatus::Pending, RunStatus::Simulating],
                RunStatus::Completed,
            )
            .await?;
        self.metrics.record_aggregation();

        info!(
            %run_id,
            findings = report.findings.len(),
            screens = report.per_screen.len(),
            bytes = bytes.len(),
            "Report written"
        );
        Ok(report)
    }

    /// Compute the Report for a Run without persisting it.
    pub async fn build_report(&self, run_id: RunId) -> Result<ReportJson, AggregationError> {
        let episodes = self.store.list_episodes(run_id).await?;
        let pending = episodes.iter().filter(|e| !e.status.is_terminal()).count();
        if pending > 0 {
            return Err(AggregationError::EpisodesPending { run_id, pending });
        }

        let mut traces = Vec::with_capacity(episodes.len());
        for episode in &episodes {
            traces.push(self.store.list_step_traces(episode.id).await?);
        }

        Ok(build(&episodes, &traces))
    }

    /// The recommended fix for a Finding, computed once and cached.
    pub async fn recommended_fix(
        &self,
        run_id: RunId,
        finding_index: usize,
        advisor: &dyn FixAdvisor,
    ) -> Result<String, AggregationError> {
        let findings = self.store.list_findings(run_id).await?;
        let finding = findings
            .get(finding_index)
            .ok_or(AggregationError::UnknownFinding(finding_index))?;

        if let Some(fix) = &finding.recommended_fix {
            return Ok(fix.clone());
        }

        let fix = advisor.recommend(finding).await?;
        self.store
            .set_recommended_fix(run_id, finding_index, fix.clone())
            .await?;
        debug!(%run_id, finding_index, "Cached recommended fix");
        Ok(fix)
    }
}

/// Pure report assembly over episodes in creation order and their traces
/// in step order.
fn build(episodes: &[Episode], traces: &[Vec<StepTrace>]) -> ReportJson {
    let mut screens = ScreenIndex::default();
    let mut clusters: IndexMap<(String, Option<String>), Cluster> = IndexMap::new();
    let mut per_screen: BTreeMap<usize, ScreenAcc> = BTreeMap::new();
    let mut per_persona = Vec::with_capacity(episodes.len());

    let mut friction_sum = 0.0;
    let mut dropoff_sum = 0.0;
    let mut scored = 0u32;

    for (episode, episode_traces) in episodes.iter().zip(traces) {
        let mut ep_friction = 0.0;
        let mut ep_confidence = 0.0;
        let mut ep_scored = 0u32;
        let mut confusions = Vec::new();

        for trace in episode_traces {
            let screen_index = screens.assign(&trace.observation);
            let screen = per_screen.entry(screen_index).or_default();
            screen.steps += 1;

            if let Some(scores) = trace.scores {
                screen.friction_sum += scores.friction;
                screen.friction_max = screen.friction_max.max(scores.friction);
                screen.dropoff_sum += scores.dropoff_risk;
                screen.scored += 1;

                ep_friction += scores.friction;
                ep_confidence += scores.confidence;
                ep_scored += 1;

                friction_sum += scores.friction;
                dropoff_sum += scores.dropoff_risk;
                scored += 1;
            }

            let Some(output) = &trace.reasoning.output else {
                continue;
            };
            let friction = trace.scores.map(|s| s.friction).unwrap_or_default();
            screen.confusions += output.confusions().len() as u32;

            let mut seen_in_trace = HashSet::new();
            for confusion in output.confusions() {
                confusions.push(StepConfusion {
                    step_index: trace.step_index,
                    screen_index,
                    issue: confusion.issue.clone(),
                    evidence: confusion.evidence.clone(),
                    element_ref: confusion.element_ref.clone(),
                });

                let key = (confusion.issue.clone(), confusion.element_ref.clone());
                let first_in_trace = seen_in_trace.insert(key.clone());
                let cluster = clusters.entry(key).or_insert_with(|| Cluster {
                    issue: confusion.issue.clone(),
                    element_ref: confusion.element_ref.clone(),
                    evidence: confusion.evidence.clone(),
                    severity: friction,
                    step_index: trace.step_index,
                    screen_index,
                    frequency: 0,
                    personas: BTreeSet::new(),
                });

                if first_in_trace {
                    cluster.frequency += 1;
                    cluster.personas.insert(episode.persona_id.clone());
                }
                if friction > cluster.severity {
                    cluster.severity = friction;
                    cluster.evidence = confusion.evidence.clone();
                    cluster.step_index = trace.step_index;
                    cluster.screen_index = screen_index;
                }
            }
        }

        per_persona.push(PersonaRollup {
            episode_id: episode.id,
            persona_id: episode.persona_id.clone(),
            status: episode.status,
            avg_friction: mean(ep_friction, ep_scored),
            avg_confidence: mean(ep_confidence, ep_scored),
            step_count: episode_traces.len() as u32,
            confusions,
        });
    }

    let mut findings: Vec<Finding> = clusters
        .into_values()
        .map(|c| Finding {
            issue: c.issue,
            evidence: c.evidence,
            severity: c.severity,
            frequency: c.frequency,
            affected_personas: c.personas,
            element_ref: c.element_ref,
            step_index: Some(c.step_index),
            screen_index: Some(c.screen_index),
            recommended_fix: None,
        })
        .collect();
    // Stable: ties keep first-occurrence order.
    findings.sort_by(|a, b| b.severity.total_cmp(&a.severity));

    let per_screen = per_screen
        .into_iter()
        .map(|(index, acc)| {
            let finding_count = findings
                .iter()
                .filter(|f| f.screen_index == Some(index))
                .count() as u32;
            (
                index,
                ScreenStats {
                    screen_index: index,
                    label: screens.label(index),
                    avg_friction: mean(acc.friction_sum, acc.scored),
                    max_friction: acc.friction_max,
                    avg_dropoff_risk: mean(acc.dropoff_sum, acc.scored),
                    confusion_count: acc.confusions,
                    finding_count,
                    step_count: acc.steps,
                },
            )
        })
        .collect();

    let count = |status: EpisodeStatus| episodes.iter().filter(|e| e.status == status).count() as u32;
    let summary = ReportSummary {
        total_episodes: episodes.len() as u32,
        completed_episodes: count(EpisodeStatus::Completed),
        abandoned_episodes: count(EpisodeStatus::Abandoned),
        avg_friction: mean(friction_sum, scored),
        avg_dropoff_risk: mean(dropoff_sum, scored),
    };

    ReportJson {
        summary,
        findings,
        per_screen,
        per_persona,
    }
}
