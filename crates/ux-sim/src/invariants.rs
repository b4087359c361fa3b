use std::collections::HashSet;

use ux_core::{
    EpisodeId, EpisodeStatus, FlowMode, MetricsSnapshot, RunId, RunStatus, StepTrace, Store,
    StoreError,
};

/// A violation detected after a simulated Run.
#[derive(Debug, Clone)]
pub struct Violation {
    pub invariant: &'static str,
    pub episode_id: Option<EpisodeId>,
    pub details: String,
}

impl Violation {
    pub(crate) fn run(invariant: &'static str, details: String) -> Self {
        Violation {
            invariant,
            episode_id: None,
            details,
        }
    }

    fn episode(invariant: &'static str, episode_id: EpisodeId, details: String) -> Self {
        Violation {
            invariant,
            episode_id: Some(episode_id),
            details,
        }
    }
}

/// Check a finished Run against the properties the pipeline guarantees.
///
/// Store failures abort the check; everything else is reported as a
/// [`Violation`].
pub async fn check_run_invariants(
    store: &dyn Store,
    run_id: RunId,
) -> Result<Vec<Violation>, StoreError> {
    let mut violations = Vec::new();
    let run = store.get_run(run_id).await?;
    let episodes = store.list_episodes(run_id).await?;

    let mut traces: Vec<Vec<StepTrace>> = Vec::with_capacity(episodes.len());
    for episode in &episodes {
        let episode_traces = store.list_step_traces(episode.id).await?;

        // 1. Episodes end in a terminal status.
        if !episode.status.is_terminal() {
            violations.push(Violation::episode(
                "episode-terminal",
                episode.id,
                format!("Episode is still {}", episode.status.as_str()),
            ));
        }

        // 2. ABANDONED only comes from screenshot-mode personas.
        if episode.status == EpisodeStatus::Abandoned && run.mode == FlowMode::Agent {
            violations.push(Violation::episode(
                "abandon-screenshot-only",
                episode.id,
                "Agent-mode episode ended ABANDONED".to_string(),
            ));
        }

        // 3. Step indexes are 0..n with no gaps and match the step count.
        for (i, trace) in episode_traces.iter().enumerate() {
            if trace.step_index as usize != i {
                violations.push(Violation::episode(
                    "gapless-steps",
                    episode.id,
                    format!("Trace {} has stepIndex {}", i, trace.step_index),
                ));
                break;
            }
        }
        if episode_traces.len() != episode.step_count as usize {
            violations.push(Violation::episode(
                "step-count",
                episode.id,
                format!(
                    "stepCount {} but {} traces",
                    episode.step_count,
                    episode_traces.len()
                ),
            ));
        }

        // 4. No episode runs past maxSteps.
        if episode.step_count > run.config.max_steps {
            violations.push(Violation::episode(
                "max-steps",
                episode.id,
                format!(
                    "{} steps recorded, maxSteps is {}",
                    episode.step_count, run.config.max_steps
                ),
            ));
        }

        // 5. Scores exist exactly for validated steps and lie in [0, 1].
        for trace in &episode_traces {
            match (&trace.scores, &trace.reasoning.output) {
                (Some(scores), Some(_)) => {
                    for (name, value) in [
                        ("friction", scores.friction),
                        ("confidence", scores.confidence),
                        ("dropoffRisk", scores.dropoff_risk),
                    ] {
                        if !(0.0..=1.0).contains(&value) {
                            violations.push(Violation::episode(
                                "scores-in-range",
                                episode.id,
                                format!("Step {} {} = {}", trace.step_index, name, value),
                            ));
                        }
                    }
                }
                (None, None) => {}
                _ => violations.push(Violation::episode(
                    "scores-match-output",
                    episode.id,
                    format!("Step {} has scores without output or vice versa", trace.step_index),
                )),
            }
        }

        traces.push(episode_traces);
    }

    if violations
        .iter()
        .any(|v| v.invariant == "episode-terminal")
    {
        return Ok(violations);
    }

    // 6. Once every Episode is terminal the Run has aggregated exactly once.
    if !run.aggregation_triggered {
        violations.push(Violation::run(
            "aggregation-triggered",
            "All episodes are terminal but aggregation never triggered".to_string(),
        ));
    }
    if run.status != RunStatus::Completed {
        violations.push(Violation::run(
            "run-completed",
            format!("Run status is {:?}", run.status),
        ));
    }
    let Some(report) = run.report_json else {
        violations.push(Violation::run("report-present", "Run has no report".to_string()));
        return Ok(violations);
    };

    // 7. Summary counts agree with Episode statuses.
    let count = |status| episodes.iter().filter(|e| e.status == status).count() as u32;
    if report.summary.total_episodes != episodes.len() as u32
        || report.summary.completed_episodes != count(EpisodeStatus::Completed)
        || report.summary.abandoned_episodes != count(EpisodeStatus::Abandoned)
    {
        violations.push(Violation::run(
            "summary-counts",
            format!("Summary {:?} disagrees with episodes", report.summary),
        ));
    }

    // 8. Findings: frequency counts distinct contributing traces, severity is
    // their maximum friction, and the list is ordered by severity.
    for finding in &report.findings {
        let mut frequency = 0;
        let mut max_friction = f64::NEG_INFINITY;
        let mut personas = HashSet::new();
        for (episode, episode_traces) in episodes.iter().zip(&traces) {
            for trace in episode_traces {
                let Some(output) = &trace.reasoning.output else {
                    continue;
                };
                let reported = output
                    .confusions()
                    .iter()
                    .any(|c| c.issue == finding.issue && c.element_ref == finding.element_ref);
                if reported {
                    frequency += 1;
                    personas.insert(episode.persona_id.as_str());
                    let friction = trace.scores.as_ref().map_or(0.0, |s| s.friction);
                    max_friction = max_friction.max(friction);
                }
            }
        }

        if finding.frequency != frequency || frequency == 0 {
            violations.push(Violation::run(
                "finding-frequency",
                format!(
                    "'{}' has frequency {} but {} traces report it",
                    finding.issue, finding.frequency, frequency
                ),
            ));
        }
        if finding.affected_personas.len() != personas.len()
            || finding.frequency < finding.affected_personas.len() as u32
        {
            violations.push(Violation::run(
                "finding-personas",
                format!(
                    "'{}' lists {} personas, traces show {}",
                    finding.issue,
                    finding.affected_personas.len(),
                    personas.len()
                ),
            ));
        }
        if finding.severity != max_friction {
            violations.push(Violation::run(
                "finding-severity",
                format!(
                    "'{}' severity {} but max friction {}",
                    finding.issue, finding.severity, max_friction
                ),
            ));
        }
    }
    if report
        .findings
        .windows(2)
        .any(|w| w[0].severity < w[1].severity)
    {
        violations.push(Violation::run(
            "findings-ordered",
            "Findings are not sorted by severity".to_string(),
        ));
    }

    let stored = store.list_findings(run_id).await?;
    if stored.len() != report.findings.len() {
        violations.push(Violation::run(
            "stored-findings",
            format!(
                "{} findings stored, report has {}",
                stored.len(),
                report.findings.len()
            ),
        ));
    }

    Ok(violations)
}

/// Aggregation must run once per Run, however many episodes race to trigger it.
pub fn check_aggregation_count(metrics: &MetricsSnapshot, runs: u64) -> Option<Violation> {
    (metrics.aggregations != runs).then(|| {
        Violation::run(
            "single-aggregation",
            format!("{} aggregations for {} runs", metrics.aggregations, runs),
        )
    })
}
