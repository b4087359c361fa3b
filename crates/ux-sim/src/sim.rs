//! End-to-end simulation harness.
//!
//! A [`Sim`] wires the real pipeline (dispatcher, SQLite queue, workers,
//! tracker, aggregator) to the synthetic collaborators, runs one Run at a
//! time to completion and checks the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use ux_config::UxConfig;
use ux_core::{
    AggregationError, Automation, DispatchError, Flow, MetricsSnapshot, Persona, QueueError,
    Reasoner, ReportJson, RunConfig, RunId, RunStatus, StoreError,
};
use ux_engine::{JobQueueConfig, MemoryStore, Pipeline, SqliteJobQueue};

use crate::browser::{SiteMap, SyntheticBrowser};
use crate::fault::{FaultConfig, FaultStats, FaultyBrowser, FaultyReasoner};
use crate::invariants::{check_aggregation_count, check_run_invariants, Violation};
use crate::reasoner::SyntheticReasoner;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct SimOptions {
    /// Seeds the synthetic reasoner and the fault dice.
    pub seed: u64,
    /// Fault injection. Faults are drawn from one shared stream, so runs only
    /// repeat exactly with `workers.concurrency: 1`.
    pub faults: Option<FaultConfig>,
    /// Site served to agent-mode flows.
    pub site: SiteMap,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            seed: 0,
            faults: None,
            site: SiteMap::checkout(),
        }
    }
}

#[derive(Debug)]
pub struct SimOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub report: Option<ReportJson>,
    pub violations: Vec<Violation>,
    pub metrics: MetricsSnapshot,
    pub faults: FaultStats,
    pub dead_letters: usize,
}

impl SimOutcome {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct Sim {
    pipeline: Pipeline,
    reasoner_faults: Option<Arc<FaultyReasoner>>,
    browser_faults: Option<Arc<FaultyBrowser>>,
    runs: AtomicU64,
}

impl Sim {
    /// Build a simulation over a fresh in-memory store. The job queue lives
    /// at `queue.path` when configured, in memory otherwise.
    pub fn new(config: &UxConfig, options: SimOptions) -> Result<Self, SimError> {
        let queue_config = JobQueueConfig::from_config(config);
        let queue = match &config.queue.path {
            Some(path) => SqliteJobQueue::open(path, queue_config)?,
            None => SqliteJobQueue::open_memory(queue_config)?,
        };

        let reasoner: Arc<dyn Reasoner> = Arc::new(SyntheticReasoner::new(options.seed));
        let browser: Arc<dyn Automation> = Arc::new(SyntheticBrowser::new(options.site));

        let (reasoner, browser, reasoner_faults, browser_faults) = match options.faults {
            Some(faults) => {
                let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
                let faulty_reasoner = Arc::new(FaultyReasoner::new(
                    reasoner,
                    ChaCha8Rng::seed_from_u64(rng.gen()),
                    faults.clone(),
                ));
                let faulty_browser = Arc::new(FaultyBrowser::new(
                    browser,
                    ChaCha8Rng::seed_from_u64(rng.gen()),
                    faults,
                ));
                (
                    faulty_reasoner.clone() as Arc<dyn Reasoner>,
                    faulty_browser.clone() as Arc<dyn Automation>,
                    Some(faulty_reasoner),
                    Some(faulty_browser),
                )
            }
            None => (reasoner, browser, None, None),
        };

        let pipeline = Pipeline::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(queue),
            reasoner,
            Some(browser),
        );

        Ok(Sim {
            pipeline,
            reasoner_faults,
            browser_faults,
            runs: AtomicU64::new(0),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn fault_stats(&self) -> FaultStats {
        let reasoner = self
            .reasoner_faults
            .as_ref()
            .map(|f| f.stats())
            .unwrap_or_default();
        let browser = self
            .browser_faults
            .as_ref()
            .map(|f| f.stats())
            .unwrap_or_default();
        reasoner + browser
    }

    /// Dispatch one Run, drain the queue and check the result.
    pub async fn run(
        &self,
        flow: Flow,
        personas: Vec<Persona>,
        run_config: RunConfig,
    ) -> Result<SimOutcome, SimError> {
        let store = &self.pipeline.store;
        store.put_flow(flow.clone()).await?;
        let mut persona_ids = Vec::with_capacity(personas.len());
        for persona in personas {
            persona_ids.push(persona.id.clone());
            store.put_persona(persona).await?;
        }

        let run_id = self
            .pipeline
            .dispatcher
            .dispatch(&flow.id, &persona_ids, run_config)
            .await?;
        let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.pipeline.workers.run_until_idle().await?;

        let mut violations = check_run_invariants(store.as_ref(), run_id).await?;
        let metrics = self.pipeline.metrics.snapshot().await;
        violations.extend(check_aggregation_count(&metrics, runs));

        let run = store.get_run(run_id).await?;
        if let Some(report) = &run.report_json {
            let rebuilt = self.pipeline.aggregator.build_report(run_id).await?;
            if rebuilt.to_canonical_json()? != report.to_canonical_json()? {
                violations.push(Violation::run(
                    "report-stable",
                    "Rebuilding the report from stored traces gives different bytes".to_string(),
                ));
            }
        }

        let outcome = SimOutcome {
            run_id,
            status: run.status,
            report: run.report_json,
            violations,
            metrics,
            faults: self.fault_stats(),
            dead_letters: self.pipeline.queue.dead_letter_count()?,
        };
        info!(
            %run_id,
            status = ?outcome.status,
            violations = outcome.violations.len(),
            dead_letters = outcome.dead_letters,
            "Simulation finished"
        );
        Ok(outcome)
    }
}
