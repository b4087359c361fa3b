use uuid::Uuid;

/// Reasoning output that does not match the mode's schema.
///
/// Never coerced or clamped: any of these makes the attempt count as failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// Top-level value is not a JSON object.
    #[error("Reasoning output must be a JSON object, got {0}")]
    NotAnObject(String),

    /// Missing field, wrong type, or unknown enum value.
    #[error("Reasoning output does not match schema: {0}")]
    Schema(String),

    /// A score or coordinate outside its allowed range.
    #[error("Field '{field}' = {value} is outside {expected}")]
    OutOfRange {
        field: String,
        value: f64,
        expected: &'static str,
    },

    /// A required string field is blank.
    #[error("Field '{0}' must not be empty")]
    EmptyField(String),
}

/// Failure executing a browser action (agent mode).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ActionError {
    /// The targeted element could not be found on the page.
    #[error("Element not found: {0}")]
    ElementMissing(String),

    /// Navigation failed or timed out.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The browser session is gone.
    #[error("Browser session closed")]
    SessionClosed,

    /// Other automation failure.
    #[error("Action failed: {0}")]
    Other(String),
}

/// Failure reaching the reasoning collaborator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Provider could not be reached.
    #[error("Reasoning provider unavailable: {0}")]
    Unavailable(String),

    /// Call timed out.
    #[error("Reasoning call timed out after {0}ms")]
    Timeout(u64),

    /// Provider rate-limited the request.
    #[error("Reasoning provider rate limited")]
    RateLimited,

    /// Provider rejected the request.
    #[error("Reasoning provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Returns true if this error is transient and the call may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::Timeout(_) | ProviderError::RateLimited
        )
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Step traces must be appended with `step_index == previous + 1`.
    #[error("Step index gap for episode {episode_id}: expected {expected}, got {actual}")]
    StepIndexGap {
        episode_id: Uuid,
        expected: u32,
        actual: u32,
    },

    #[error("Storage error: {0}")]
    Other(String),
}

/// Errors from the job queue collaborator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(String),

    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors while creating a Run and dispatching its jobs.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("Invalid run config: {0}")]
    InvalidConfig(String),

    #[error("Invalid persona '{persona_id}': {source}")]
    InvalidPersona {
        persona_id: String,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from the Completion Tracker.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TrackerError {
    /// Aggregation was already triggered for this Run. Callers swallow this.
    #[error("Aggregation already triggered for run {0}")]
    DuplicateTrigger(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors while computing or persisting a Report. Nothing is persisted when returned.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AggregationError {
    /// Some Episode of the Run is not terminal yet.
    #[error("Run {run_id} has {pending} non-terminal episode(s)")]
    EpisodesPending { run_id: Uuid, pending: usize },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Finding index {0} out of range")]
    UnknownFinding(usize),

    #[error("Fix advisor failed: {0}")]
    Advisor(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that abort processing of a single episode job.
///
/// Reasoning and action failures are recorded on the StepTrace instead; only
/// infrastructure failures surface here.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("Flow '{flow_id}' does not match run mode {expected}")]
    ModeMismatch { flow_id: String, expected: String },

    #[error("Job on queue {0} is not an episode job")]
    UnexpectedJob(&'static str),

    #[error("Agent-mode episode {0} has no automation capability")]
    NoAutomation(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_transient() {
        assert!(ProviderError::Timeout(3000).is_transient());
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Unavailable("dns".to_string()).is_transient());
        assert!(!ProviderError::Rejected("bad model".to_string()).is_transient());
    }

    #[test]
    fn test_display_out_of_range() {
        let err = ValidationError::OutOfRange {
            field: "friction".to_string(),
            value: 1.5,
            expected: "[0, 1]",
        };
        let msg = err.to_string();
        assert!(msg.contains("friction"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_dispatch_from_store() {
        let store_err = StoreError::NotFound {
            kind: "flow",
            id: "checkout".to_string(),
        };
        let err: DispatchError = store_err.into();
        assert!(matches!(err, DispatchError::Store(StoreError::NotFound { .. })));
        assert!(err.to_string().contains("checkout"));
    }

    #[test]
    fn test_step_gap_display() {
        let err = StoreError::StepIndexGap {
            episode_id: Uuid::nil(),
            expected: 3,
            actual: 5,
        };
        assert!(err.to_string().contains("expected 3, got 5"));
    }
}
