//! Reasoning output schema and its validator.
//!
//! The reasoning collaborator returns raw JSON. [`validate_reasoning`] turns it
//! into a typed [`ReasoningOutput`] for the flow's mode, or rejects it. Nothing
//! is coerced or clamped: a score of `1.2` or `"0.5"` is a validation failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{check_unit_interval, FlowMode, StepScores};

/// Abstract persona intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ClickPrimaryCta,
    ClickSecondaryCta,
    OpenNav,
    Scroll,
    Back,
    SeekInfo,
    Hesitate,
    Abandon,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::ClickPrimaryCta,
        Action::ClickSecondaryCta,
        Action::OpenNav,
        Action::Scroll,
        Action::Back,
        Action::SeekInfo,
        Action::Hesitate,
        Action::Abandon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::ClickPrimaryCta => "CLICK_PRIMARY_CTA",
            Action::ClickSecondaryCta => "CLICK_SECONDARY_CTA",
            Action::OpenNav => "OPEN_NAV",
            Action::Scroll => "SCROLL",
            Action::Back => "BACK",
            Action::SeekInfo => "SEEK_INFO",
            Action::Hesitate => "HESITATE",
            Action::Abandon => "ABANDON",
        }
    }
}

/// A persona-reported point of friction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confusion {
    pub issue: String,
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Concrete browser command chosen by an agent-mode persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    Click {
        target: String,
    },
    ClickCoordinates {
        x: f64,
        y: f64,
    },
    Type {
        target: String,
        text: String,
        #[serde(default)]
        submit: bool,
    },
    Scroll {
        direction: ScrollDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u32>,
    },
    NavigateBack,
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ms: Option<u64>,
    },
    Done {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl BrowserAction {
    pub fn kind(&self) -> &'static str {
        match self {
            BrowserAction::Click { .. } => "click",
            BrowserAction::ClickCoordinates { .. } => "click_coordinates",
            BrowserAction::Type { .. } => "type",
            BrowserAction::Scroll { .. } => "scroll",
            BrowserAction::NavigateBack => "navigate_back",
            BrowserAction::Wait { .. } => "wait",
            BrowserAction::Done { .. } => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, BrowserAction::Done { .. })
    }

    fn check(&self) -> Result<(), ValidationError> {
        match self {
            BrowserAction::Click { target } => non_empty("browserAction.target", target),
            BrowserAction::Type { target, .. } => non_empty("browserAction.target", target),
            BrowserAction::ClickCoordinates { x, y } => {
                non_negative("browserAction.x", *x)?;
                non_negative("browserAction.y", *y)
            }
            _ => Ok(()),
        }
    }
}

/// Screenshot-mode reasoning output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotReasoning {
    pub salient: String,
    pub confusions: Vec<Confusion>,
    pub likely_action: Action,
    pub confidence: f64,
    pub friction: f64,
    pub dropoff_risk: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_update: Option<String>,
}

impl ScreenshotReasoning {
    fn check(&self) -> Result<(), ValidationError> {
        check_unit_interval("confidence", self.confidence)?;
        check_unit_interval("friction", self.friction)?;
        check_unit_interval("dropoffRisk", self.dropoff_risk)?;
        for (i, confusion) in self.confusions.iter().enumerate() {
            non_empty(&format!("confusions[{}].issue", i), &confusion.issue)?;
        }
        Ok(())
    }
}

/// Agent-mode reasoning output: the screenshot shape plus a concrete action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReasoning {
    #[serde(flatten)]
    pub base: ScreenshotReasoning,
    pub browser_action: BrowserAction,
    pub intent: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completes_goal: Option<bool>,
}

/// Validated reasoning, tagged by flow mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasoningOutput {
    Screenshot(ScreenshotReasoning),
    Agent(AgentReasoning),
}

impl ReasoningOutput {
    pub fn mode(&self) -> FlowMode {
        match self {
            ReasoningOutput::Screenshot(_) => FlowMode::Screenshot,
            ReasoningOutput::Agent(_) => FlowMode::Agent,
        }
    }

    fn base(&self) -> &ScreenshotReasoning {
        match self {
            ReasoningOutput::Screenshot(r) => r,
            ReasoningOutput::Agent(r) => &r.base,
        }
    }

    pub fn scores(&self) -> StepScores {
        let base = self.base();
        StepScores {
            friction: base.friction,
            confidence: base.confidence,
            dropoff_risk: base.dropoff_risk,
        }
    }

    pub fn confusions(&self) -> &[Confusion] {
        &self.base().confusions
    }

    pub fn likely_action(&self) -> Action {
        self.base().likely_action
    }

    pub fn memory_update(&self) -> Option<&str> {
        self.base().memory_update.as_deref()
    }

    pub fn browser_action(&self) -> Option<&BrowserAction> {
        match self {
            ReasoningOutput::Agent(r) => Some(&r.browser_action),
            ReasoningOutput::Screenshot(_) => None,
        }
    }

    /// Agent mode: the persona declared the goal reached or chose `done`.
    pub fn finishes_goal(&self) -> bool {
        match self {
            ReasoningOutput::Agent(r) => {
                r.completes_goal == Some(true) || r.browser_action.is_done()
            }
            ReasoningOutput::Screenshot(_) => false,
        }
    }
}

/// Validate a raw reasoning result against the schema selected by `mode`.
pub fn validate_reasoning(mode: FlowMode, raw: &Value) -> Result<ReasoningOutput, ValidationError> {
    if !raw.is_object() {
        return Err(ValidationError::NotAnObject(json_type_name(raw).to_string()));
    }

    match mode {
        FlowMode::Screenshot => {
            let parsed: ScreenshotReasoning = serde_json::from_value(raw.clone())
                .map_err(|e| ValidationError::Schema(e.to_string()))?;
            parsed.check()?;
            Ok(ReasoningOutput::Screenshot(parsed))
        }
        FlowMode::Agent => {
            let parsed: AgentReasoning = serde_json::from_value(raw.clone())
                .map_err(|e| ValidationError::Schema(e.to_string()))?;
            parsed.base.check()?;
            parsed.browser_action.check()?;
            Ok(ReasoningOutput::Agent(parsed))
        }
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field.to_string()))
    } else {
        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            expected: "[0, +inf)",
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
