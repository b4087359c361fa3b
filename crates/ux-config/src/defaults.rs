use std::time::Duration;

use crate::types::{HumanDuration, UxConfig};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_STEPS: u32 = 12;
pub const DEFAULT_MAX_STEPS_CAP: u32 = 100;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_QUEUE_MAX_RETRIES: u32 = 3;
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn default_poll_interval() -> HumanDuration {
    HumanDuration(Duration::from_millis(200))
}

fn default_base_backoff() -> HumanDuration {
    HumanDuration(Duration::from_secs(2))
}

impl UxConfig {
    /// Fill every omitted setting with its default.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        if self.run.model.is_none() {
            self.run.model = Some(DEFAULT_MODEL.to_string());
        }
        if self.run.max_steps.is_none() {
            self.run.max_steps = Some(DEFAULT_MAX_STEPS);
        }

        if self.workers.concurrency.is_none() {
            self.workers.concurrency = Some(DEFAULT_CONCURRENCY);
        }
        if self.workers.poll_interval.is_none() {
            self.workers.poll_interval = Some(default_poll_interval());
        }
        if self.workers.batch_size.is_none() {
            self.workers.batch_size = Some(DEFAULT_BATCH_SIZE);
        }

        if self.queue.max_retries.is_none() {
            self.queue.max_retries = Some(DEFAULT_QUEUE_MAX_RETRIES);
        }
        if self.queue.base_backoff.is_none() {
            self.queue.base_backoff = Some(default_base_backoff());
        }

        if self.limits.max_steps_cap.is_none() {
            self.limits.max_steps_cap = Some(DEFAULT_MAX_STEPS_CAP);
        }

        if self.logging.level.is_none() {
            self.logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> UxConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }

    pub fn model(&self) -> &str {
        self.run.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn max_steps(&self) -> u32 {
        self.run.max_steps.unwrap_or(DEFAULT_MAX_STEPS)
    }

    pub fn max_steps_cap(&self) -> u32 {
        self.limits.max_steps_cap.unwrap_or(DEFAULT_MAX_STEPS_CAP)
    }

    pub fn concurrency(&self) -> usize {
        self.workers.concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    pub fn batch_size(&self) -> usize {
        self.workers.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn poll_interval(&self) -> Duration {
        self.workers
            .poll_interval
            .clone()
            .unwrap_or_else(default_poll_interval)
            .as_duration()
    }

    pub fn queue_max_retries(&self) -> u32 {
        self.queue.max_retries.unwrap_or(DEFAULT_QUEUE_MAX_RETRIES)
    }

    pub fn queue_base_backoff(&self) -> Duration {
        self.queue
            .base_backoff
            .clone()
            .unwrap_or_else(default_base_backoff)
            .as_duration()
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}
