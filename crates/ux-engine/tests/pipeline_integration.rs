//! End-to-end runs through dispatcher, SQLite queue, workers, tracker and aggregator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use ux_config::UxConfig;
use ux_core::{
    EpisodeStatus, Finding, FixAdvisor, Flow, FlowTarget, Frame, Persona, PersonaTraits,
    ProviderError, Reasoner, RunConfig, RunStatus, StepInput,
};
use ux_engine::{JobQueueConfig, MemoryStore, Pipeline, SqliteJobQueue, WorkerEvent};

/// Screenshot-mode reasoner: every persona trips over the submit button on
/// step 1; persona ids starting with "quit" abandon on step 2.
struct SubmitButtonReasoner;

#[async_trait]
impl Reasoner for SubmitButtonReasoner {
    async fn reason(&self, input: &StepInput) -> Result<Value, ProviderError> {
        let confusions = if input.step_index == 1 {
            json!([{
                "issue": "Cannot find submit button",
                "evidence": format!("{} scanned the footer", input.persona.id),
                "elementRef": "btn-1"
            }])
        } else {
            json!([])
        };
        let abandon = input.persona.id.starts_with("quit") && input.step_index == 2;

        Ok(json!({
            "salient": "Signup form",
            "confusions": confusions,
            "likelyAction": if abandon { "ABANDON" } else { "CLICK_PRIMARY_CTA" },
            "confidence": 0.6,
            "friction": if input.step_index == 1 { 0.8 } else { 0.2 },
            "dropoffRisk": 0.1
        }))
    }
}

struct CountingAdvisor {
    calls: AtomicUsize,
}

#[async_trait]
impl FixAdvisor for CountingAdvisor {
    async fn recommend(&self, finding: &Finding) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Make '{}' more visible", finding.element_ref.as_deref().unwrap_or("?")))
    }
}

fn test_config() -> UxConfig {
    UxConfig::from_yaml(
        "workers:\n  concurrency: 4\n  poll_interval: 10ms\n  batch_size: 8\nqueue:\n  max_retries: 2\n  base_backoff: 0ms\n",
    )
    .unwrap()
}

fn persona(id: &str) -> Persona {
    Persona {
        id: id.to_string(),
        name: id.to_string(),
        traits: PersonaTraits {
            patience: 0.4,
            exploration: 0.6,
            frustration_sensitivity: 0.7,
            forgiveness: 0.3,
            help_seeking: 0.5,
        },
        age_group: "25-34".to_string(),
        gender: "unspecified".to_string(),
        knobs: None,
    }
}

async fn pipeline(target: FlowTarget, personas: &[String]) -> Pipeline {
    let config = test_config();
    let queue = Arc::new(SqliteJobQueue::open_memory(JobQueueConfig::from_config(&config)).unwrap());
    let pipeline = Pipeline::new(
        &config,
        Arc::new(MemoryStore::new()),
        queue,
        Arc::new(SubmitButtonReasoner),
        None,
    );

    pipeline
        .store
        .put_flow(Flow {
            id: "signup".to_string(),
            name: "Signup".to_string(),
            target,
        })
        .await
        .unwrap();
    for id in personas {
        pipeline.store.put_persona(persona(id)).await.unwrap();
    }
    pipeline
}

fn frames(n: usize) -> FlowTarget {
    FlowTarget::Screenshot {
        frames: (0..n)
            .map(|i| Frame {
                id: format!("frame-{}", i),
                image_path: format!("frames/{}.png", i),
                label: None,
            })
            .collect(),
    }
}

fn run_config(max_steps: u32) -> RunConfig {
    RunConfig {
        model: "gpt-4o-mini".to_string(),
        max_steps,
        seed: Some(9),
    }
}

#[tokio::test]
async fn test_screenshot_run_end_to_end() {
    let personas = vec!["alice".to_string(), "quitter".to_string()];
    let p = pipeline(frames(6), &personas).await;

    let run_id = p
        .dispatcher
        .dispatch("signup", &personas, run_config(5))
        .await
        .unwrap();
    p.workers.run_until_idle().await.unwrap();

    let run = p.store.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.aggregation_triggered);

    let episodes = p.store.list_episodes(run_id).await.unwrap();
    assert_eq!(episodes[0].status, EpisodeStatus::Completed);
    assert_eq!(episodes[0].step_count, 5);
    assert_eq!(episodes[1].status, EpisodeStatus::Abandoned);
    assert_eq!(episodes[1].step_count, 3);

    for episode in &episodes {
        let traces = p.store.list_step_traces(episode.id).await.unwrap();
        for (i, trace) in traces.iter().enumerate() {
            assert_eq!(trace.step_index as usize, i);
        }
    }

    let report = run.report_json.unwrap();
    assert_eq!(report.summary.total_episodes, 2);
    assert_eq!(report.summary.completed_episodes, 1);
    assert_eq!(report.summary.abandoned_episodes, 1);

    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.issue, "Cannot find submit button");
    assert_eq!(finding.element_ref.as_deref(), Some("btn-1"));
    assert_eq!(finding.frequency, 2);
    assert!(finding.affected_personas.contains("alice"));
    assert!(finding.affected_personas.contains("quitter"));
    assert_eq!(finding.severity, 0.8);
    assert_eq!(finding.screen_index, Some(1));

    assert_eq!(report.per_screen.len(), 5);
    assert_eq!(report.per_screen[&1].label, "frame-1");
    assert_eq!(report.per_screen[&1].step_count, 2);
    assert_eq!(report.per_screen[&3].step_count, 1);

    // Rebuilding gives the same bytes; aggregating again is a no-op.
    let rebuilt = p.aggregator.build_report(run_id).await.unwrap();
    assert_eq!(
        rebuilt.to_canonical_json().unwrap(),
        report.to_canonical_json().unwrap()
    );
    let again = p.aggregator.aggregate(run_id).await.unwrap();
    assert_eq!(again, report);

    let metrics = p.metrics.snapshot().await;
    assert_eq!(metrics.aggregations, 1);
    assert_eq!(metrics.steps_recorded, 8);
    assert_eq!(metrics.episodes_completed, 1);
    assert_eq!(metrics.episodes_abandoned, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_episodes_aggregate_once() {
    let personas: Vec<String> = (0..10).map(|i| format!("persona-{}", i)).collect();
    let p = pipeline(frames(3), &personas).await;

    let run_id = p
        .dispatcher
        .dispatch("signup", &personas, run_config(3))
        .await
        .unwrap();
    p.workers.run_until_idle().await.unwrap();

    let run = p.store.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let report = run.report_json.unwrap();
    assert_eq!(report.summary.total_episodes, 10);
    assert_eq!(report.findings[0].frequency, 10);
    assert_eq!(report.findings[0].affected_personas.len(), 10);

    let metrics = p.metrics.snapshot().await;
    assert_eq!(metrics.aggregations, 1);
    assert_eq!(metrics.episodes_completed, 10);
    assert_eq!(p.queue.dead_letter_count().unwrap(), 0);
}

#[tokio::test]
async fn test_dead_lettered_episode_still_aggregates() {
    let personas = vec!["alice".to_string()];
    // Agent flow with no automation attached: every delivery errors.
    let p = pipeline(
        FlowTarget::Agent {
            url: "https://shop.test".to_string(),
            goal: "Buy".to_string(),
        },
        &personas,
    )
    .await;

    let run_id = p
        .dispatcher
        .dispatch("signup", &personas, run_config(5))
        .await
        .unwrap();
    p.workers.run_until_idle().await.unwrap();

    assert_eq!(p.queue.dead_letter_count().unwrap(), 1);
    let episodes = p.store.list_episodes(run_id).await.unwrap();
    assert_eq!(episodes[0].status, EpisodeStatus::Failed);

    let run = p.store.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let summary = run.report_json.unwrap().summary;
    assert_eq!(summary.total_episodes, 1);
    assert_eq!(summary.completed_episodes, 0);
    assert_eq!(summary.abandoned_episodes, 0);
}

#[tokio::test]
async fn test_recommended_fix_is_cached() {
    let personas = vec!["alice".to_string()];
    let p = pipeline(frames(2), &personas).await;
    let run_id = p
        .dispatcher
        .dispatch("signup", &personas, run_config(2))
        .await
        .unwrap();
    p.workers.run_until_idle().await.unwrap();

    let advisor = CountingAdvisor {
        calls: AtomicUsize::new(0),
    };
    let first = p.aggregator.recommended_fix(run_id, 0, &advisor).await.unwrap();
    let second = p.aggregator.recommended_fix(run_id, 0, &advisor).await.unwrap();

    assert_eq!(first, "Make 'btn-1' more visible");
    assert_eq!(first, second);
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);

    let findings = p.store.list_findings(run_id).await.unwrap();
    assert_eq!(findings[0].recommended_fix.as_deref(), Some(first.as_str()));
    // The persisted report is untouched.
    let report = p.store.get_run(run_id).await.unwrap().report_json.unwrap();
    assert!(report.findings[0].recommended_fix.is_none());

    assert!(p.aggregator.recommended_fix(run_id, 7, &advisor).await.is_err());
}

#[tokio::test]
async fn test_spawned_pool_drains_queue() {
    let personas = vec!["alice".to_string(), "bob".to_string()];
    let p = pipeline(frames(4), &personas).await;
    let run_id = p
        .dispatcher
        .dispatch("signup", &personas, run_config(4))
        .await
        .unwrap();

    let (handle, join) = p.workers.clone().spawn(16);
    handle.send(WorkerEvent::Poke).await.unwrap();

    let store = p.store.clone();
    tokio::time::timeout(Duration::from_secs(10), async move {
        loop {
            if store.get_run(run_id).await.unwrap().status == RunStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown().await.unwrap();
    join.await.unwrap();
    assert_eq!(p.queue.queue_size().unwrap(), 0);
}
