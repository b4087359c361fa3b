use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Log output format for the CLI subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Human-readable duration (e.g., "200ms", "5m", "1h").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(std::time::Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    /// Accepts `<integer><unit>` with unit one of `ms`, `s`, `m`, `h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("Duration needs a unit: {}", s))?;
        let (digits, unit) = s.split_at(split);
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let millis_per_unit = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            _ => return Err(format!("Invalid duration format: {}", s)),
        };
        amount
            .checked_mul(millis_per_unit)
            .map(|ms| HumanDuration(std::time::Duration::from_millis(ms)))
            .ok_or_else(|| format!("Duration out of range: {}", s))
    }
}

impl fmt::Display for HumanDuration {
    /// Largest unit that represents the value exactly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let unit = [(3_600_000, "h"), (60_000, "m"), (1_000, "s")]
            .into_iter()
            .find(|(size, _)| millis != 0 && millis % size == 0);
        match unit {
            Some((size, suffix)) => write!(f, "{}{}", millis / size, suffix),
            None => write!(f, "{}ms", millis),
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Defaults applied to every Run created from this configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunDefaults {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerConfig {
    /// Maximum number of jobs in flight at once.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// How often the pool polls the queue for ready jobs.
    #[serde(default)]
    pub poll_interval: Option<HumanDuration>,
    /// Maximum jobs fetched per poll.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Job queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueConfig {
    /// SQLite database file. In-memory when omitted.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_backoff: Option<HumanDuration>,
}

/// Hard limits enforced when validating a RunConfig.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LimitsConfig {
    #[serde(default)]
    pub max_steps_cap: Option<u32>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UxConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run: RunDefaults,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
