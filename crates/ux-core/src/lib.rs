//! Core types for the UX persona simulator.
//!
//! Holds the data model, the reasoning schema and validator, the job payloads,
//! and the collaborator traits the engine is written against.

mod error;
pub mod job;
mod metrics;
pub mod model;
pub mod reasoning;
pub mod report;
mod traits;

pub use error::{
    ActionError, AggregationError, DispatchError, EngineError, ProviderError, QueueError,
    StoreError, TrackerError, ValidationError,
};
pub use job::{Job, QueueName};
pub use metrics::{create_metrics, EngineMetrics, MetricsSnapshot, SharedMetrics};
pub use model::{
    Episode, EpisodeId, EpisodeStatus, Flow, FlowId, FlowMode, FlowTarget, Frame, Observation,
    PageState, Persona, PersonaId, PersonaTraits, Run, RunConfig, RunId, RunStatus, StepReasoning,
    StepScores, StepTrace,
};
pub use reasoning::{
    validate_reasoning, Action, AgentReasoning, BrowserAction, Confusion, ReasoningOutput,
    ScreenshotReasoning, ScrollDirection,
};
pub use report::{Finding, PersonaRollup, ReportJson, ReportSummary, ScreenStats, StepConfusion};
pub use traits::{Automation, BrowserSession, FixAdvisor, JobQueue, Reasoner, StepInput, Store};
