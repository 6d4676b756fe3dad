//! Shared fixtures for integration scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::{sleep, Instant};

use docflow_core::{
    ChunkError, ChunkOutput, ChunkProcessor, ChunkRecord, EngineConfig, TaskEngine, TaskId,
    TaskOptions, TaskRecord, TaskState,
};

/// Engine configuration with intervals small enough for test timing.
pub fn fast_config(max_concurrency: usize) -> EngineConfig {
    EngineConfig {
        max_concurrency,
        aging_interval_ms: 60_000,
        scheduler_tick_ms: 20,
        max_chunk_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        backoff_multiplier: 2.0,
        chunk_timeout_ms: 5_000,
        progress_min_interval_ms: 0,
        retention_ms: 60_000,
        reaper_interval_ms: 60_000,
    }
}

/// Options whose settings blob carries a task name the processor can log.
pub fn named_options(name: &str, chunks: u32) -> TaskOptions {
    let mut options = TaskOptions::with_uniform_chunks(chunks, 100);
    options.settings = json!({ "name": name });
    options
}

/// Processor scripted per (task name, chunk ordinal): optional delay,
/// scripted failures, and a log of every attempt in invocation order.
pub struct TestProcessor {
    delay: Duration,
    fail: Mutex<HashMap<(String, u32), u32>>,
    log: Mutex<Vec<(String, u32)>>,
}

impl TestProcessor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Script `times` consecutive failures for one chunk of one task.
    pub fn fail_times(&self, name: &str, chunk: u32, times: u32) {
        self.fail.lock().insert((name.to_string(), chunk), times);
    }

    /// Every attempt, in order.
    pub fn log(&self) -> Vec<(String, u32)> {
        self.log.lock().clone()
    }

    /// How often a given chunk of a given task was attempted.
    pub fn attempts(&self, name: &str, chunk: u32) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(n, c)| n == name && *c == chunk)
            .count()
    }
}

#[async_trait]
impl ChunkProcessor for TestProcessor {
    async fn process(
        &self,
        chunk: &ChunkRecord,
        options: &TaskOptions,
    ) -> Result<ChunkOutput, ChunkError> {
        let name = options
            .settings
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.log.lock().push((name.clone(), chunk.index));

        let mut fail = self.fail.lock();
        if let Some(remaining) = fail.get_mut(&(name, chunk.index)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChunkError::new("scripted failure"));
            }
        }
        Ok(ChunkOutput::with_result_ref(format!("out/{}", chunk.index)))
    }
}

/// Poll until the task reaches `state` or the timeout elapses.
pub async fn wait_for_state(
    engine: &TaskEngine,
    id: TaskId,
    state: TaskState,
    timeout: Duration,
) -> TaskRecord {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(record) = engine.get(id) {
            if record.state == state {
                return record;
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for task {id} to reach {state}"
        );
        sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `predicate` holds or the timeout elapses.
pub async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration, what: &str) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}
