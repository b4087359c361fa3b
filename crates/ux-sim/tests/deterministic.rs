use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use ux_config::UxConfig;
use ux_core::{EpisodeStatus, RunConfig, RunStatus};
use ux_sim::invariants::check_run_invariants;
use ux_sim::scenario::{checkout_flow, generate_personas, screenshot_flow};
use ux_sim::{FaultConfig, Sim, SimOptions};

fn config(concurrency: usize) -> UxConfig {
    UxConfig::from_yaml(&format!(
        "workers:\n  concurrency: {}\n  poll_interval: 5ms\nqueue:\n  base_backoff: 0ms\n",
        concurrency
    ))
    .unwrap()
}

fn run_config(max_steps: u32, seed: u64) -> RunConfig {
    RunConfig {
        model: "synthetic".to_string(),
        max_steps,
        seed: Some(seed),
    }
}

fn sim(seed: u64, concurrency: usize, faults: Option<FaultConfig>) -> Sim {
    Sim::new(
        &config(concurrency),
        SimOptions {
            seed,
            faults,
            ..SimOptions::default()
        },
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn sim_screenshot_seed_42() {
    let sim = sim(42, 4, None);
    let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(42), 8);

    let outcome = sim
        .run(screenshot_flow("signup", 6), personas, run_config(6, 42))
        .await
        .unwrap();

    assert!(outcome.is_clean(), "{:#?}", outcome.violations);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.metrics.aggregations, 1);
    assert_eq!(outcome.metrics.terminal_episodes(), 8);
    let report = outcome.report.unwrap();
    assert_eq!(report.summary.total_episodes, 8);
    assert_eq!(report.per_persona.len(), 8);
    assert!(report.per_screen.keys().all(|&i| i < 6));
}

#[tokio::test(start_paused = true)]
async fn sim_agent_checkout_seed_7() {
    let sim = sim(7, 4, None);
    let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(7), 5);

    let outcome = sim
        .run(checkout_flow("checkout"), personas, run_config(12, 7))
        .await
        .unwrap();

    assert!(outcome.is_clean(), "{:#?}", outcome.violations);
    let report = outcome.report.unwrap();
    assert_eq!(report.summary.abandoned_episodes, 0);
    // Every page is bucketed by pathname.
    assert!(report
        .per_screen
        .values()
        .all(|s| s.label.starts_with('/')));
    assert_eq!(report.per_screen[&0].label, "/");
}

#[tokio::test(start_paused = true)]
async fn sim_fuzz_20_seeds() {
    for seed in 0..20 {
        let sim = sim(seed, 3, None);
        let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(seed), 4);
        let flow = if seed % 2 == 0 {
            screenshot_flow("shots", 1 + (seed as usize % 7))
        } else {
            checkout_flow("live")
        };

        let outcome = sim.run(flow, personas, run_config(10, seed)).await.unwrap();
        assert!(outcome.is_clean(), "seed {}: {:#?}", seed, outcome.violations);
        assert_eq!(outcome.dead_letters, 0, "seed {}", seed);
    }
}

#[tokio::test(start_paused = true)]
async fn sim_same_seed_same_report() {
    let mut reports = Vec::new();
    for _ in 0..2 {
        let sim = sim(5, 4, None);
        let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(5), 6);
        let outcome = sim
            .run(screenshot_flow("signup", 5), personas, run_config(5, 5))
            .await
            .unwrap();
        let report = outcome.report.unwrap();
        // Episode ids are random; everything else must repeat.
        reports.push((report.summary, report.findings, report.per_screen));
    }
    assert_eq!(reports[0], reports[1]);
}

#[tokio::test(start_paused = true)]
async fn sim_faults_repeat_with_one_worker() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let sim = sim(11, 1, Some(FaultConfig::uniform(0.25)));
        let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(11), 4);
        let outcome = sim
            .run(checkout_flow("live"), personas, run_config(8, 11))
            .await
            .unwrap();
        assert!(outcome.is_clean(), "{:#?}", outcome.violations);
        runs.push((outcome.faults, outcome.report.unwrap().summary));
    }
    assert_eq!(runs[0], runs[1]);
    assert!(runs[0].0.provider_errors + runs[0].0.malformed > 0);
}

#[tokio::test(start_paused = true)]
async fn sim_always_malformed_fails_every_episode() {
    let sim = sim(
        3,
        2,
        Some(FaultConfig {
            malformed_rate: 1.0,
            ..FaultConfig::default()
        }),
    );
    let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(3), 3);

    let outcome = sim
        .run(screenshot_flow("signup", 4), personas, run_config(4, 3))
        .await
        .unwrap();

    assert!(outcome.is_clean(), "{:#?}", outcome.violations);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.metrics.episodes_failed, 3);
    assert_eq!(outcome.faults.malformed, 9);

    let report = outcome.report.unwrap();
    assert!(report.findings.is_empty());
    assert_eq!(report.summary.completed_episodes, 0);
    assert!(report
        .per_persona
        .iter()
        .all(|p| p.status == EpisodeStatus::Failed && p.step_count == 1));
}

#[tokio::test(start_paused = true)]
async fn sim_detects_tampered_run() {
    let sim = sim(1, 2, None);
    let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(1), 2);
    let outcome = sim
        .run(screenshot_flow("signup", 3), personas, run_config(3, 1))
        .await
        .unwrap();
    assert!(outcome.is_clean());

    // Move the Run back without touching its report.
    let store = &sim.pipeline().store;
    store
        .set_run_status(outcome.run_id, RunStatus::Simulating)
        .await
        .unwrap();

    let violations = check_run_invariants(store.as_ref(), outcome.run_id).await.unwrap();
    assert!(
        violations.iter().any(|v| v.invariant == "run-completed"),
        "{:#?}",
        violations
    );
}

#[tokio::test(start_paused = true)]
async fn sim_runs_share_one_pipeline() {
    let sim = sim(9, 4, None);
    for round in 0..3u64 {
        let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(round), 3);
        let outcome = sim
            .run(screenshot_flow("signup", 4), personas, run_config(4, round))
            .await
            .unwrap();
        assert!(outcome.is_clean(), "round {}: {:#?}", round, outcome.violations);
        assert_eq!(outcome.metrics.aggregations, round + 1);
    }
}
