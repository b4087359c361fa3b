//! Entities flowing through the simulation pipeline.
//!
//! Field names serialize in camelCase so stored payloads keep the wire shape
//! the web layer already consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::reasoning::ReasoningOutput;
use crate::report::ReportJson;

pub type RunId = Uuid;
pub type EpisodeId = Uuid;
pub type FlowId = String;
pub type PersonaId = String;

/// How a Flow is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowMode {
    /// Ordered screenshots, one per step.
    Screenshot,
    /// A live page driven through browser automation.
    Agent,
}

impl FlowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowMode::Screenshot => "SCREENSHOT",
            FlowMode::Agent => "AGENT",
        }
    }
}

impl std::fmt::Display for FlowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single screenshot in a screenshot-mode Flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// What the personas walk through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowTarget {
    Screenshot { frames: Vec<Frame> },
    Agent { url: String, goal: String },
}

/// The UX target under test. Immutable once a Run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: FlowId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub target: FlowTarget,
}

impl Flow {
    pub fn mode(&self) -> FlowMode {
        match self.target {
            FlowTarget::Screenshot { .. } => FlowMode::Screenshot,
            FlowTarget::Agent { .. } => FlowMode::Agent,
        }
    }

    /// Frames of a screenshot-mode flow; empty for agent mode.
    pub fn frames(&self) -> &[Frame] {
        match &self.target {
            FlowTarget::Screenshot { frames } => frames,
            FlowTarget::Agent { .. } => &[],
        }
    }
}

/// Five continuous behavioural traits, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaTraits {
    pub patience: f64,
    pub exploration: f64,
    pub frustration_sensitivity: f64,
    pub forgiveness: f64,
    pub help_seeking: f64,
}

impl PersonaTraits {
    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("patience", self.patience),
            ("exploration", self.exploration),
            ("frustrationSensitivity", self.frustration_sensitivity),
            ("forgiveness", self.forgiveness),
            ("helpSeeking", self.help_seeking),
        ]
    }
}

/// A synthetic user. Read-only input to simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: PersonaId,
    #[serde(default)]
    pub name: String,
    pub traits: PersonaTraits,
    pub age_group: String,
    pub gender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knobs: Option<BTreeMap<String, f64>>,
}

impl Persona {
    /// Check that every trait lies in [0, 1].
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in self.traits.named() {
            check_unit_interval(field, value)?;
        }
        Ok(())
    }
}

pub(crate) fn check_unit_interval(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            expected: "[0, 1]",
        })
    }
}

/// Per-run simulation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub model: String,
    pub max_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run and Episodes persisted; jobs not yet enqueued.
    Pending,
    Simulating,
    Completed,
    Failed,
}

/// One simulation execution of a Flow against N Personas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub flow_id: FlowId,
    /// Snapshot of the Flow's mode at creation.
    pub mode: FlowMode,
    pub config: RunConfig,
    pub status: RunStatus,
    /// Set exactly once by the Completion Tracker.
    #[serde(default)]
    pub aggregation_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_json: Option<ReportJson>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(flow: &Flow, config: RunConfig) -> Self {
        Run {
            id: Uuid::new_v4(),
            flow_id: flow.id.clone(),
            mode: flow.mode(),
            config,
            status: RunStatus::Pending,
            aggregation_triggered: false,
            report_json: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeStatus {
    Pending,
    Running,
    Completed,
    Abandoned,
    Failed,
}

impl EpisodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EpisodeStatus::Completed | EpisodeStatus::Abandoned | EpisodeStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "PENDING",
            EpisodeStatus::Running => "RUNNING",
            EpisodeStatus::Completed => "COMPLETED",
            EpisodeStatus::Abandoned => "ABANDONED",
            EpisodeStatus::Failed => "FAILED",
        }
    }
}

/// One persona's traversal of the Run's Flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: EpisodeId,
    pub run_id: RunId,
    pub persona_id: PersonaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub status: EpisodeStatus,
    /// Number of StepTraces recorded so far.
    pub step_count: u32,
}

impl Episode {
    pub fn new(run: &Run, persona_id: PersonaId) -> Self {
        Episode {
            id: Uuid::new_v4(),
            run_id: run.id,
            persona_id,
            seed: run.config.seed,
            status: EpisodeStatus::Pending,
            step_count: 0,
        }
    }
}

/// Live page state reported by the automation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

/// What the persona saw at a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    /// Pointer into the Flow's frames.
    Frame {
        #[serde(rename = "frameIndex")]
        frame_index: usize,
        #[serde(rename = "frameId")]
        frame_id: String,
    },
    /// Snapshot of a live page.
    Page {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(
            default,
            rename = "pageTitle",
            skip_serializing_if = "Option::is_none"
        )]
        page_title: Option<String>,
        #[serde(
            default,
            rename = "elementCount",
            skip_serializing_if = "Option::is_none"
        )]
        element_count: Option<u32>,
    },
}

impl Observation {
    pub fn from_page(page: &PageState) -> Self {
        Observation::Page {
            url: page.url.clone(),
            page_title: page.page_title.clone(),
            element_count: page.element_count,
        }
    }
}

/// Scores taken verbatim from validated reasoning output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepScores {
    pub friction: f64,
    pub confidence: f64,
    pub dropoff_risk: f64,
}

/// Validated reasoning plus any error attached to the step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReasoning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ReasoningOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One reasoning iteration within an Episode. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTrace {
    pub episode_id: EpisodeId,
    pub step_index: u32,
    pub observation: Observation,
    pub reasoning: StepReasoning,
    /// None when every reasoning attempt failed validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<StepScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}
