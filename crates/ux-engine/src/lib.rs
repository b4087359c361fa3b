pub mod aggregator;
pub mod dispatcher;
pub mod engine;
pub mod memory_store;
pub mod pipeline;
pub mod tracker;
pub mod work_queue;
pub mod worker;

// Re-exports
pub use aggregator::Aggregator;
pub use dispatcher::Dispatcher;
pub use engine::{StepEngine, MAX_CONSECUTIVE_ACTION_FAILURES, MAX_REASONING_ATTEMPTS};
pub use memory_store::MemoryStore;
pub use pipeline::Pipeline;
pub use tracker::CompletionTracker;
pub use work_queue::{DeadJob, FailOutcome, JobQueueConfig, JobStatus, QueuedJob, SqliteJobQueue};
pub use worker::{WorkerConfig, WorkerEvent, WorkerHandle, WorkerPool};
