use std::path::PathBuf;

use tracing::{info, warn};
use ux_config::UxConfig;
use ux_sim::{FaultConfig, Sim, SimOptions};

use crate::commands::report::render;
use crate::study::Study;

pub struct RunArgs {
    pub study: PathBuf,
    pub fault_rate: Option<f64>,
    pub seed: Option<u64>,
    pub output: Option<PathBuf>,
}

/// Simulate a study with the synthetic collaborators and print its report.
pub async fn run(config: &UxConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let study = Study::from_file(&args.study)?;
    let run_config = study.run_config(config, args.seed);

    let faults = match args.fault_rate {
        Some(rate) if !(0.0..=1.0).contains(&rate) => {
            return Err(format!("--fault-rate must be within [0, 1], got {}", rate).into());
        }
        Some(rate) if rate > 0.0 => Some(FaultConfig::uniform(rate)),
        _ => None,
    };

    let sim = Sim::new(
        config,
        SimOptions {
            seed: run_config.seed.unwrap_or_default(),
            faults,
            site: study.site_map(),
        },
    )?;

    info!(
        flow = %study.flow.id,
        mode = %study.flow.mode(),
        personas = study.personas.len(),
        max_steps = run_config.max_steps,
        "Running study"
    );
    let outcome = sim
        .run(study.flow.clone(), study.personas.clone(), run_config)
        .await?;

    match &outcome.report {
        Some(report) => {
            if let Some(path) = &args.output {
                std::fs::write(path, report.to_canonical_json()?)?;
                info!("Wrote report to {}", path.display());
            }
            print!("{}", render(report));
        }
        None => println!("Run {} ended {:?} without a report", outcome.run_id, outcome.status),
    }

    println!();
    println!("Metrics");
    println!("=======");
    println!("{}", serde_json::to_string_pretty(&outcome.metrics)?);
    if args.fault_rate.is_some() {
        println!(
            "Injected faults: {} malformed, {} provider errors, {} action errors",
            outcome.faults.malformed, outcome.faults.provider_errors, outcome.faults.action_errors
        );
    }
    if outcome.dead_letters > 0 {
        warn!(dead_letters = outcome.dead_letters, "Jobs were dead-lettered");
    }

    if !outcome.is_clean() {
        for violation in &outcome.violations {
            eprintln!("violation [{}]: {}", violation.invariant, violation.details);
        }
        return Err(format!("{} invariant violation(s)", outcome.violations.len()).into());
    }
    Ok(())
}
