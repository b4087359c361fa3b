use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use ux_config::{LogFormat, UxConfig};

mod commands;
mod study;

use commands::validate_output::ModeArg;

#[derive(Parser)]
#[command(name = "ux", version, about = "Persona-driven UX simulation")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a study end to end and print its report
    Run {
        /// Study file (flow, personas, run overrides)
        #[arg(short, long)]
        study: PathBuf,
        /// Inject malformed output, provider and action errors at this rate
        #[arg(long)]
        fault_rate: Option<f64>,
        /// Seed for the synthetic collaborators
        #[arg(long)]
        seed: Option<u64>,
        /// Write the report JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a raw reasoning output file
    ValidateOutput {
        /// Schema to validate against
        #[arg(short, long, value_enum)]
        mode: ModeArg,
        /// JSON file holding the model output
        file: PathBuf,
    },
    /// Print a saved report
    Report {
        /// Report JSON written by `ux run --output`
        file: PathBuf,
    },
    /// Validate the configuration file
    Validate,
    /// Show effective configuration
    ShowConfig,
}

fn find_config() -> Option<PathBuf> {
    // 1. UX_CONFIG environment variable
    if let Ok(path) = std::env::var("UX_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ux.yaml in current directory
    let cwd_config = PathBuf::from("ux.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/ux/config.yaml
    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/ux/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

fn init_tracing(config: &UxConfig, verbose: u8) {
    let level = match verbose {
        0 => config.log_level(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Find config file; defaults apply when there is none
    let config_path = cli.config.clone().or_else(find_config);
    let config = match &config_path {
        Some(path) => UxConfig::from_file(path)?,
        None => UxConfig::default(),
    };

    init_tracing(&config, cli.verbose);
    match &config_path {
        Some(path) => debug!("Loaded config from {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Run {
            study,
            fault_rate,
            seed,
            output,
        } => {
            config.validate_or_err()?;
            commands::run::run(
                &config,
                commands::run::RunArgs {
                    study,
                    fault_rate,
                    seed,
                    output,
                },
            )
            .await?;
        }
        Commands::ValidateOutput { mode, file } => {
            commands::validate_output::run(mode, &file)?;
        }
        Commands::Report { file } => {
            commands::report::run(&file)?;
        }
        Commands::Validate => {
            let path = config_path.ok_or(
                "No configuration file found. Use --config, set UX_CONFIG, or create ux.yaml",
            )?;
            commands::validate::run(&config, &path)?;
        }
        Commands::ShowConfig => {
            commands::config::run(&config)?;
        }
    }

    Ok(())
}
