//! Engine configuration with environment overrides.

use std::time::Duration;

use crate::error::{EngineError, Result};

/// Configuration for a [`TaskEngine`](crate::engine::TaskEngine) instance.
///
/// Millisecond fields keep the struct serde- and env-friendly; duration
/// accessors are provided for call sites.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of concurrently processing tasks (worker pool size)
    pub max_concurrency: usize,
    /// Interval after which a waiting task gains one effective priority point
    pub aging_interval_ms: u64,
    /// Periodic wake-up of the scheduler loop
    pub scheduler_tick_ms: u64,
    /// Retry budget per chunk (overridable per task)
    pub max_chunk_attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base_ms: u64,
    /// Ceiling for retry backoff
    pub backoff_max_ms: u64,
    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Per-chunk timeout for the external processor call (overridable per task)
    pub chunk_timeout_ms: u64,
    /// Minimum inter-event interval per subscriber for progress events
    pub progress_min_interval_ms: u64,
    /// How long terminal task records are retained before the reaper deletes them
    pub retention_ms: u64,
    /// How often the reaper scans for expired terminal records
    pub reaper_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            aging_interval_ms: 60_000,
            scheduler_tick_ms: 1_000,
            max_chunk_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            backoff_multiplier: 2.0,
            chunk_timeout_ms: 300_000,
            progress_min_interval_ms: 500,
            retention_ms: 24 * 60 * 60 * 1000,
            reaper_interval_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from defaults plus `DOCFLOW_*` env overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("DOCFLOW_MAX_CONCURRENCY") {
            config.max_concurrency = parse(&value, "max_concurrency")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_AGING_INTERVAL_MS") {
            config.aging_interval_ms = parse(&value, "aging_interval_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_SCHEDULER_TICK_MS") {
            config.scheduler_tick_ms = parse(&value, "scheduler_tick_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_MAX_CHUNK_ATTEMPTS") {
            config.max_chunk_attempts = parse(&value, "max_chunk_attempts")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_BACKOFF_BASE_MS") {
            config.backoff_base_ms = parse(&value, "backoff_base_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_BACKOFF_MAX_MS") {
            config.backoff_max_ms = parse(&value, "backoff_max_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_BACKOFF_MULTIPLIER") {
            config.backoff_multiplier = parse(&value, "backoff_multiplier")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_CHUNK_TIMEOUT_MS") {
            config.chunk_timeout_ms = parse(&value, "chunk_timeout_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_PROGRESS_MIN_INTERVAL_MS") {
            config.progress_min_interval_ms = parse(&value, "progress_min_interval_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_RETENTION_MS") {
            config.retention_ms = parse(&value, "retention_ms")?;
        }
        if let Ok(value) = std::env::var("DOCFLOW_REAPER_INTERVAL_MS") {
            config.reaper_interval_ms = parse(&value, "reaper_interval_ms")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(EngineError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_chunk_attempts == 0 {
            return Err(EngineError::Configuration(
                "max_chunk_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(EngineError::Configuration(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(EngineError::Configuration(
                "chunk_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn progress_min_interval(&self) -> Duration {
        Duration::from_millis(self.progress_min_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

fn parse<T: std::str::FromStr>(value: &str, field: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| EngineError::Configuration(format!("Invalid {field}: {e}")))
}
