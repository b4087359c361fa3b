use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use ux_core::{
    ActionError, Automation, BrowserAction, BrowserSession, EpisodeId, PageState, ProviderError,
    Reasoner, StepInput,
};

/// Prefix used in error messages to distinguish injected faults from real errors.
pub const FAULT_PREFIX: &str = "[fault-injected]";

/// Configuration for fault injection. Each rate is a probability per call.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Reasoning output that fails schema validation.
    pub malformed_rate: f64,
    /// Reasoning calls that fail outright.
    pub provider_error_rate: f64,
    /// Browser actions that fail.
    pub action_error_rate: f64,
}

impl FaultConfig {
    /// The same rate for every fault kind.
    pub fn uniform(rate: f64) -> Self {
        FaultConfig {
            malformed_rate: rate,
            provider_error_rate: rate,
            action_error_rate: rate,
        }
    }
}

/// Statistics about injected faults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub malformed: usize,
    pub provider_errors: usize,
    pub action_errors: usize,
}

impl std::ops::Add for FaultStats {
    type Output = FaultStats;

    fn add(self, other: FaultStats) -> FaultStats {
        FaultStats {
            malformed: self.malformed + other.malformed,
            provider_errors: self.provider_errors + other.provider_errors,
            action_errors: self.action_errors + other.action_errors,
        }
    }
}

/// Shared dice for a fault-injecting wrapper.
struct Dice {
    rng: Mutex<ChaCha8Rng>,
}

impl Dice {
    /// Roll the RNG and return true with probability `rate`.
    async fn roll(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let roll: f64 = self.rng.lock().await.gen();
        roll < rate
    }

    async fn pick(&self, n: usize) -> usize {
        self.rng.lock().await.gen_range(0..n)
    }
}

/// A reasoner wrapper that randomly fails calls or corrupts their output.
pub struct FaultyReasoner {
    inner: Arc<dyn Reasoner>,
    dice: Dice,
    config: FaultConfig,
    malformed: AtomicUsize,
    provider_errors: AtomicUsize,
}

impl FaultyReasoner {
    pub fn new(inner: Arc<dyn Reasoner>, rng: ChaCha8Rng, config: FaultConfig) -> Self {
        FaultyReasoner {
            inner,
            dice: Dice {
                rng: Mutex::new(rng),
            },
            config,
            malformed: AtomicUsize::new(0),
            provider_errors: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            malformed: self.malformed.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            action_errors: 0,
        }
    }

    async fn corrupt(&self, mut value: Value) -> Value {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        let choice = self.dice.pick(4).await;
        let Some(fields) = value.as_object_mut().filter(|_| choice < 3) else {
            return json!(format!("{} I think they would click the big button", FAULT_PREFIX));
        };
        match choice {
            0 => {
                fields.insert("friction".to_string(), json!(1.5));
            }
            1 => {
                fields.remove("likelyAction");
            }
            _ => {
                fields.insert("confidence".to_string(), json!("high"));
            }
        }
        value
    }
}

#[async_trait]
impl Reasoner for FaultyReasoner {
    async fn reason(&self, input: &StepInput) -> Result<Value, ProviderError> {
        if self.dice.roll(self.config.provider_error_rate).await {
            self.provider_errors.fetch_add(1, Ordering::Relaxed);
            return Err(if self.dice.roll(0.5).await {
                ProviderError::Unavailable(format!("{} connection reset", FAULT_PREFIX))
            } else {
                ProviderError::Rejected(format!("{} content filter", FAULT_PREFIX))
            });
        }
        let value = self.inner.reason(input).await?;
        if self.dice.roll(self.config.malformed_rate).await {
            return Ok(self.corrupt(value).await);
        }
        Ok(value)
    }
}

struct BrowserFaults {
    dice: Dice,
    rate: f64,
    action_errors: AtomicUsize,
}

/// An automation wrapper whose sessions randomly fail actions.
pub struct FaultyBrowser {
    inner: Arc<dyn Automation>,
    faults: Arc<BrowserFaults>,
}

impl FaultyBrowser {
    pub fn new(inner: Arc<dyn Automation>, rng: ChaCha8Rng, config: FaultConfig) -> Self {
        FaultyBrowser {
            inner,
            faults: Arc::new(BrowserFaults {
                dice: Dice {
                    rng: Mutex::new(rng),
                },
                rate: config.action_error_rate,
                action_errors: AtomicUsize::new(0),
            }),
        }
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            action_errors: self.faults.action_errors.load(Ordering::Relaxed),
            ..FaultStats::default()
        }
    }
}

#[async_trait]
impl Automation for FaultyBrowser {
    async fn open(
        &self,
        episode_id: EpisodeId,
        url: &str,
    ) -> Result<Box<dyn BrowserSession>, ActionError> {
        let inner = self.inner.open(episode_id, url).await?;
        Ok(Box::new(FaultySession {
            inner,
            faults: self.faults.clone(),
        }))
    }
}

struct FaultySession {
    inner: Box<dyn BrowserSession>,
    faults: Arc<BrowserFaults>,
}

#[async_trait]
impl BrowserSession for FaultySession {
    async fn observe(&mut self) -> Result<PageState, ActionError> {
        self.inner.observe().await
    }

    async fn execute(&mut self, action: &BrowserAction) -> Result<PageState, ActionError> {
        if self.faults.dice.roll(self.faults.rate).await {
            self.faults.action_errors.fetch_add(1, Ordering::Relaxed);
            return Err(ActionError::Other(format!(
                "{} {} intercepted by overlay",
                FAULT_PREFIX,
                action.kind()
            )));
        }
        self.inner.execute(action).await
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}

/// Check if an error was injected by the fault layer.
pub fn is_injected_fault(msg: &str) -> bool {
    msg.contains(FAULT_PREFIX)
}
