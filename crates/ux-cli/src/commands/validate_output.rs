use std::path::Path;

use clap::ValueEnum;
use serde_json::Value;
use ux_core::{validate_reasoning, FlowMode, ReasoningOutput, ValidationError};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Screenshot,
    Agent,
}

impl From<ModeArg> for FlowMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Screenshot => FlowMode::Screenshot,
            ModeArg::Agent => FlowMode::Agent,
        }
    }
}

/// Parse and validate a raw model output.
pub fn check(mode: FlowMode, content: &str) -> Result<ReasoningOutput, ValidationError> {
    let raw: Value = serde_json::from_str(content)
        .map_err(|e| ValidationError::Schema(format!("not JSON: {}", e)))?;
    validate_reasoning(mode, &raw)
}

pub fn run(mode: ModeArg, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let mode = FlowMode::from(mode);

    let output = check(mode, &content)
        .map_err(|e| format!("{}: invalid {} output: {}", path.display(), mode, e))?;

    let scores = output.scores();
    println!("{}: valid {} output", path.display(), mode);
    println!(
        "  friction {}  confidence {}  dropoffRisk {}",
        scores.friction, scores.confidence, scores.dropoff_risk
    );
    println!("  likelyAction {}", output.likely_action().as_str());
    if let Some(action) = output.browser_action() {
        println!("  browserAction {}", action.kind());
    }
    for confusion in output.confusions() {
        match &confusion.element_ref {
            Some(element) => println!("  confusion: {} ({})", confusion.issue, element),
            None => println!("  confusion: {}", confusion.issue),
        }
    }
    Ok(())
}
