use std::sync::Arc;

use ux_config::UxConfig;
use ux_core::{create_metrics, Automation, Reasoner, SharedMetrics, Store};

use crate::aggregator::Aggregator;
use crate::dispatcher::Dispatcher;
use crate::engine::StepEngine;
use crate::tracker::CompletionTracker;
use crate::work_queue::SqliteJobQueue;
use crate::worker::{WorkerConfig, WorkerPool};

/// Every pipeline component wired over one store and one queue.
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub queue: Arc<SqliteJobQueue>,
    pub metrics: SharedMetrics,
    pub dispatcher: Dispatcher,
    pub tracker: Arc<CompletionTracker>,
    pub engine: Arc<StepEngine>,
    pub aggregator: Arc<Aggregator>,
    pub workers: WorkerPool,
}

impl Pipeline {
    pub fn new(
        config: &UxConfig,
        store: Arc<dyn Store>,
        queue: Arc<SqliteJobQueue>,
        reasoner: Arc<dyn Reasoner>,
        automation: Option<Arc<dyn Automation>>,
    ) -> Self {
        let metrics = create_metrics();
        let tracker = Arc::new(CompletionTracker::new(
            store.clone(),
            queue.clone(),
            metrics.clone(),
        ));

        let mut engine = StepEngine::new(store.clone(), reasoner, tracker.clone(), metrics.clone());
        if let Some(automation) = automation {
            engine = engine.with_automation(automation);
        }
        let engine = Arc::new(engine);

        let aggregator = Arc::new(Aggregator::new(store.clone(), metrics.clone()));
        let dispatcher = Dispatcher::from_config(store.clone(), queue.clone(), config);
        let workers = WorkerPool::new(
            queue.clone(),
            engine.clone(),
            aggregator.clone(),
            WorkerConfig::from_config(config),
        );

        Pipeline {
            store,
            queue,
            metrics,
            dispatcher,
            tracker,
            engine,
            aggregator,
            workers,
        }
    }
}
