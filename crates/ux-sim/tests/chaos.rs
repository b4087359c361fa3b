use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use ux_config::UxConfig;
use ux_core::RunConfig;
use ux_sim::scenario::{checkout_flow, generate_personas, screenshot_flow};
use ux_sim::{FaultConfig, FaultStats, Sim, SimOptions, Violation};

struct Case {
    seed: u64,
    personas: usize,
    frames: Option<usize>,
    max_steps: u32,
    concurrency: usize,
    faults: Option<FaultConfig>,
}

fn run_case(case: Case) -> (Vec<Violation>, FaultStats, u64) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async move {
        tokio::time::pause();
        let config = UxConfig::from_yaml(&format!(
            "workers:\n  concurrency: {}\n  poll_interval: 5ms\nqueue:\n  base_backoff: 0ms\n",
            case.concurrency
        ))
        .unwrap();
        let sim = Sim::new(
            &config,
            SimOptions {
                seed: case.seed,
                faults: case.faults,
                ..SimOptions::default()
            },
        )
        .unwrap();

        let personas = generate_personas(&mut ChaCha8Rng::seed_from_u64(case.seed), case.personas);
        let flow = match case.frames {
            Some(frames) => screenshot_flow("shots", frames),
            None => checkout_flow("live"),
        };
        let outcome = sim
            .run(
                flow,
                personas,
                RunConfig {
                    model: "synthetic".to_string(),
                    max_steps: case.max_steps,
                    seed: Some(case.seed),
                },
            )
            .await
            .unwrap();
        (outcome.violations, outcome.faults, outcome.metrics.aggregations)
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_screenshot_runs_hold_invariants(
        seed in any::<u64>(),
        personas in 1usize..12,
        frames in 1usize..10,
        max_steps in 1u32..15,
        concurrency in 1usize..6,
    ) {
        let (violations, stats, aggregations) = run_case(Case {
            seed,
            personas,
            frames: Some(frames),
            max_steps,
            concurrency,
            faults: None,
        });
        prop_assert!(
            violations.is_empty(),
            "seed {} personas {} frames {} maxSteps {}: {:#?}",
            seed, personas, frames, max_steps, violations
        );
        prop_assert_eq!(stats, FaultStats::default());
        prop_assert_eq!(aggregations, 1);
    }

    #[test]
    fn prop_agent_runs_hold_invariants(
        seed in any::<u64>(),
        personas in 1usize..8,
        max_steps in 1u32..20,
        concurrency in 1usize..6,
    ) {
        let (violations, _, aggregations) = run_case(Case {
            seed,
            personas,
            frames: None,
            max_steps,
            concurrency,
            faults: None,
        });
        prop_assert!(violations.is_empty(), "seed {}: {:#?}", seed, violations);
        prop_assert_eq!(aggregations, 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        max_shrink_iters: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_faulty_runs_hold_invariants(
        seed in any::<u64>(),
        personas in 1usize..8,
        max_steps in 1u32..12,
        malformed_pct in 0u8..=60u8,
        provider_pct in 0u8..=60u8,
        action_pct in 0u8..=60u8,
        agent in any::<bool>(),
    ) {
        let faults = FaultConfig {
            malformed_rate: f64::from(malformed_pct) / 100.0,
            provider_error_rate: f64::from(provider_pct) / 100.0,
            action_error_rate: f64::from(action_pct) / 100.0,
        };
        let (violations, _, aggregations) = run_case(Case {
            seed,
            personas,
            frames: (!agent).then_some(5),
            max_steps,
            concurrency: 3,
            faults: Some(faults),
        });
        prop_assert!(
            violations.is_empty(),
            "seed {} agent {} faults {}/{}/{}%: {:#?}",
            seed, agent, malformed_pct, provider_pct, action_pct, violations
        );
        prop_assert_eq!(aggregations, 1);
    }
}
