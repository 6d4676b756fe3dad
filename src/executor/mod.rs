//! Chunk Executor: runs one task's remaining chunks on a worker slot.
//!
//! The per-chunk protocol: observe control flags at the boundary, invoke the
//! external processor under a timeout, persist checkpoint + progress as one
//! store update on success, retry with exponential backoff on failure, and
//! fail the whole task once a chunk exhausts its budget. Every terminal or
//! paused transition is guarded against a concurrent cancel, so a canceled
//! task never emits `completed` or `failed` afterwards.

pub mod control;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventKind, NotificationHub};
use crate::identity::{Clock, TaskId};
use crate::processor::ChunkProcessor;
use crate::state_machine::{target_state, ChunkState, TaskState, TransitionEvent};
use crate::store::TaskStore;

pub use control::{ControlRegistry, RunFlags};

/// Executor-facing slice of the engine configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
    pub chunk_timeout: Duration,
}

impl From<&EngineConfig> for ExecutorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_chunk_attempts,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            backoff_multiplier: config.backoff_multiplier,
            chunk_timeout: config.chunk_timeout(),
        }
    }
}

/// How a chunk loop ended; the worker only uses this for logging, the
/// authoritative state lives in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Paused,
    Canceled,
}

/// Backoff before retrying a failed chunk attempt:
/// `base * multiplier^(attempt-1)`, capped.
pub fn backoff_delay(attempt: u32, config: &ExecutorConfig) -> Duration {
    let factor = config
        .backoff_multiplier
        .powi(attempt.saturating_sub(1) as i32);
    let ms = (config.backoff_base.as_millis() as f64 * factor) as u64;
    Duration::from_millis(ms).min(config.backoff_max)
}

pub struct ChunkExecutor {
    store: Arc<TaskStore>,
    hub: Arc<NotificationHub>,
    processor: Arc<dyn ChunkProcessor>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
}

impl ChunkExecutor {
    pub fn new(
        store: Arc<TaskStore>,
        hub: Arc<NotificationHub>,
        processor: Arc<dyn ChunkProcessor>,
        clock: Arc<dyn Clock>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            hub,
            processor,
            clock,
            config,
        }
    }

    /// Execute remaining chunks of `id` from its checkpoint forward.
    ///
    /// Expects the task to be in PROCESSING (the scheduler admitted it);
    /// returns the boundary outcome. Store errors propagate to the worker
    /// for logging but never panic across this boundary.
    pub async fn run(&self, id: TaskId, flags: Arc<RunFlags>) -> Result<RunOutcome> {
        let record = self.store.get(id)?;
        let options = record.options.clone();
        let max_attempts = options
            .max_chunk_attempts
            .unwrap_or(self.config.max_attempts);
        let chunk_timeout = options.chunk_timeout().unwrap_or(self.config.chunk_timeout);
        let total = record.total_chunks;

        let mut index = record.checkpoint + 1;
        info!(
            task_id = %id,
            start_chunk = index,
            total_chunks = total,
            "chunk loop started"
        );

        while index <= total {
            // Attempt loop for the current chunk; each attempt re-enters
            // the boundary checks so pause and cancel are honored between
            // retries as well as between chunks.
            loop {
                let current = self.store.get(id)?;
                if current.state == TaskState::Canceled || flags.cancel_requested() {
                    debug!(task_id = %id, chunk = index, "cancel observed at chunk boundary");
                    return Ok(RunOutcome::Canceled);
                }
                if flags.pause_requested() {
                    return self.pause_at_boundary(id, index).await;
                }

                let chunk = current
                    .chunk(index)
                    .cloned()
                    .ok_or_else(|| EngineError::Store(format!("task {id} has no chunk {index}")))?;

                let message = match timeout(chunk_timeout, self.processor.process(&chunk, &options))
                    .await
                {
                    Ok(Ok(output)) => {
                        // Re-check state before persisting: a cancel that
                        // landed while this chunk was in flight wins, and the
                        // chunk's result is discarded.
                        let (outcome, applied) = self.store.update(id, |rec| {
                            if rec.state == TaskState::Processing {
                                rec.record_chunk_done(index, output.result_ref.clone());
                                true
                            } else {
                                false
                            }
                        })?;
                        if !applied {
                            debug!(
                                task_id = %id,
                                chunk = index,
                                "discarding in-flight chunk result, task no longer processing"
                            );
                            return Ok(RunOutcome::Canceled);
                        }
                        self.hub
                            .publish(
                                id,
                                EventKind::Progress {
                                    value: outcome.record.progress,
                                    chunk_index: index,
                                    total,
                                },
                            )
                            .await;
                        break;
                    }
                    Ok(Err(e)) => e.message,
                    Err(_) => format!("chunk timed out after {}ms", chunk_timeout.as_millis()),
                };

                let (_, attempts) = self
                    .store
                    .update(id, |rec| rec.record_chunk_attempt(index, &message))?;
                warn!(
                    task_id = %id,
                    chunk = index,
                    attempts,
                    max_attempts,
                    error = %message,
                    "chunk attempt failed"
                );

                if attempts >= max_attempts {
                    return self.fail_task(id, index, attempts, &message).await;
                }
                sleep(backoff_delay(attempts, &self.config)).await;
            }
            index += 1;
        }

        self.complete_task(id).await
    }

    /// Graceful pause: only taken at a chunk boundary, so the checkpoint
    /// still names the last completed chunk.
    async fn pause_at_boundary(&self, id: TaskId, index: u32) -> Result<RunOutcome> {
        let (outcome, paused) = self.store.update(id, |rec| {
            match target_state(rec.state, &TransitionEvent::Pause) {
                Ok(next) => {
                    rec.state = next;
                    true
                }
                Err(_) => false,
            }
        })?;
        if !paused {
            // Canceled while the pause request was pending.
            return Ok(RunOutcome::Canceled);
        }
        info!(
            task_id = %id,
            next_chunk = index,
            checkpoint = outcome.record.checkpoint,
            "task paused at chunk boundary"
        );
        self.hub
            .publish(
                id,
                EventKind::StateChanged {
                    old: outcome.old_state,
                    new: outcome.new_state,
                },
            )
            .await;
        Ok(RunOutcome::Paused)
    }

    async fn fail_task(
        &self,
        id: TaskId,
        chunk: u32,
        attempts: u32,
        message: &str,
    ) -> Result<RunOutcome> {
        let error_text = EngineError::ChunkFailure {
            chunk,
            attempts,
            message: message.to_string(),
        }
        .to_string();
        let now = self.clock.now();

        let (outcome, failed) = self.store.update(id, |rec| {
            match target_state(rec.state, &TransitionEvent::Fail(error_text.clone())) {
                Ok(next) => {
                    if let Some(chunk_rec) = rec.chunks.get_mut(chunk as usize - 1) {
                        chunk_rec.state = ChunkState::Failed;
                    }
                    rec.state = next;
                    rec.error = Some(error_text.clone());
                    rec.completed_at = Some(now);
                    true
                }
                Err(_) => false,
            }
        })?;
        if !failed {
            return Ok(RunOutcome::Canceled);
        }

        warn!(task_id = %id, chunk, attempts, "task failed, retry budget exhausted");
        self.hub
            .publish(
                id,
                EventKind::StateChanged {
                    old: outcome.old_state,
                    new: outcome.new_state,
                },
            )
            .await;
        self.hub
            .publish(id, EventKind::Failed { error: error_text })
            .await;
        Ok(RunOutcome::Failed)
    }

    async fn complete_task(&self, id: TaskId) -> Result<RunOutcome> {
        let now = self.clock.now();
        let (outcome, completed) = self.store.update(id, |rec| {
            match target_state(rec.state, &TransitionEvent::Complete) {
                Ok(next) => {
                    rec.state = next;
                    rec.completed_at = Some(now);
                    true
                }
                Err(_) => false,
            }
        })?;
        if !completed {
            return Ok(RunOutcome::Canceled);
        }

        info!(
            task_id = %id,
            result_ref = outcome.record.result_ref.as_deref().unwrap_or(""),
            "task completed"
        );
        self.hub
            .publish(
                id,
                EventKind::StateChanged {
                    old: outcome.old_state,
                    new: outcome.new_state,
                },
            )
            .await;
        self.hub
            .publish(
                id,
                EventKind::Completed {
                    result_ref: outcome.record.result_ref.clone(),
                },
            )
            .await;
        Ok(RunOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelSink, SubscriptionScope};
    use crate::identity::{IdGenerator, SystemClock};
    use crate::models::{TaskOptions, TaskRecord};
    use crate::processor::{ChunkError, ChunkOutput};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Processor scripted per chunk ordinal: fail N times, then succeed
    /// after an optional delay, while recording invocation order.
    struct ScriptedProcessor {
        remaining_failures: Mutex<HashMap<u32, u32>>,
        delay: Duration,
        processed: Mutex<Vec<u32>>,
    }

    impl ScriptedProcessor {
        fn new() -> Self {
            Self {
                remaining_failures: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
                processed: Mutex::new(Vec::new()),
            }
        }

        fn failing(chunk: u32, times: u32) -> Self {
            let processor = Self::new();
            processor.remaining_failures.lock().insert(chunk, times);
            processor
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn processed(&self) -> Vec<u32> {
            self.processed.lock().clone()
        }
    }

    #[async_trait]
    impl ChunkProcessor for ScriptedProcessor {
        async fn process(
            &self,
            chunk: &crate::models::ChunkRecord,
            _options: &TaskOptions,
        ) -> std::result::Result<ChunkOutput, ChunkError> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.processed.lock().push(chunk.index);
            let mut failures = self.remaining_failures.lock();
            if let Some(remaining) = failures.get_mut(&chunk.index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ChunkError::new("scripted failure"));
                }
            }
            Ok(ChunkOutput::with_result_ref(format!("out/{}", chunk.index)))
        }
    }

    struct Fixture {
        store: Arc<TaskStore>,
        hub: Arc<NotificationHub>,
        executor: ChunkExecutor,
        id: TaskId,
    }

    fn fixture(processor: Arc<dyn ChunkProcessor>, chunks: u32) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(TaskStore::new(clock.clone()));
        let hub = Arc::new(NotificationHub::new(Duration::ZERO, clock.clone()));
        let config = ExecutorConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            chunk_timeout: Duration::from_secs(5),
        };
        let executor = ChunkExecutor::new(
            store.clone(),
            hub.clone(),
            processor,
            clock.clone(),
            config,
        );

        let mut record = TaskRecord::new(
            IdGenerator::new().task_id(),
            "tester",
            TaskOptions::with_uniform_chunks(chunks, 100),
            5,
            clock.now(),
        );
        // Simulate scheduler admission.
        record.state = TaskState::Processing;
        let id = store.create(record).unwrap();

        Fixture {
            store,
            hub,
            executor,
            id,
        }
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let config = ExecutorConfig {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            chunk_timeout: Duration::from_secs(1),
        };
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, &config), Duration::from_millis(350));
        assert_eq!(backoff_delay(10, &config), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_runs_all_chunks_to_completion() {
        let processor = Arc::new(ScriptedProcessor::new());
        let f = fixture(processor.clone(), 3);

        let (sink, mut rx) = ChannelSink::pair(32);
        f.hub.subscribe(SubscriptionScope::Task(f.id), Arc::new(sink));

        let flags = Arc::new(RunFlags::default());
        let outcome = f.executor.run(f.id, flags).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let record = f.store.get(f.id).unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.checkpoint, 3);
        assert_eq!(record.progress, 1.0);
        assert_eq!(record.result_ref.as_deref(), Some("out/3"));
        assert!(record.completed_at.is_some());
        assert_eq!(processor.processed(), vec![1, 2, 3]);

        // Progress per chunk, then state change, then terminal event.
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind.name());
        }
        assert_eq!(
            kinds,
            vec![
                "progress",
                "progress",
                "progress",
                "state_changed",
                "completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_flaky_chunk_retries_then_completes() {
        // Chunk 2 fails twice and succeeds on the third attempt.
        let processor = Arc::new(ScriptedProcessor::failing(2, 2));
        let f = fixture(processor.clone(), 3);

        let outcome = f
            .executor
            .run(f.id, Arc::new(RunFlags::default()))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let record = f.store.get(f.id).unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.checkpoint, 3);
        assert_eq!(record.chunk(2).unwrap().attempts, 2);
        assert_eq!(processor.processed(), vec![1, 2, 2, 2, 3]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_task() {
        let processor = Arc::new(ScriptedProcessor::failing(2, u32::MAX));
        let f = fixture(processor, 3);

        let outcome = f
            .executor
            .run(f.id, Arc::new(RunFlags::default()))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let record = f.store.get(f.id).unwrap();
        assert_eq!(record.state, TaskState::Failed);
        // Partial progress survives for inspection.
        assert_eq!(record.checkpoint, 1);
        assert_eq!(record.progress, 1.0 / 3.0);
        assert_eq!(record.chunk(2).unwrap().state, ChunkState::Failed);
        assert_eq!(record.chunk(2).unwrap().attempts, 3);
        let error = record.error.unwrap();
        assert!(error.contains("chunk 2 failed after 3 attempts"), "{error}");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_attempt() {
        let processor =
            Arc::new(ScriptedProcessor::new().with_delay(Duration::from_millis(200)));
        let f = fixture(processor, 1);
        let mut executor = f.executor;
        executor.config.chunk_timeout = Duration::from_millis(20);
        executor.config.max_attempts = 1;

        let outcome = executor
            .run(f.id, Arc::new(RunFlags::default()))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let record = f.store.get(f.id).unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert!(record.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_pause_flag_pauses_at_boundary() {
        let processor = Arc::new(ScriptedProcessor::new());
        let f = fixture(processor.clone(), 5);

        let flags = Arc::new(RunFlags::default());
        flags.request_pause();
        let outcome = f.executor.run(f.id, flags).await.unwrap();
        assert_eq!(outcome, RunOutcome::Paused);

        let record = f.store.get(f.id).unwrap();
        assert_eq!(record.state, TaskState::Paused);
        assert_eq!(record.checkpoint, 0);
        assert!(processor.processed().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_finishing_after_cancel_is_discarded() {
        let processor =
            Arc::new(ScriptedProcessor::new().with_delay(Duration::from_millis(150)));
        let f = fixture(processor, 1);

        let (sink, mut rx) = ChannelSink::pair(32);
        f.hub.subscribe(SubscriptionScope::Task(f.id), Arc::new(sink));

        let id = f.id;
        let executor = f.executor;
        let handle = tokio::spawn(async move {
            executor.run(id, Arc::new(RunFlags::default())).await
        });

        // Cancel while the only chunk is still in flight.
        sleep(Duration::from_millis(30)).await;
        f.store
            .update(id, |rec| rec.state = TaskState::Canceled)
            .unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Canceled);

        // The finished chunk's result never reaches the canceled record.
        let record = f.store.get(id).unwrap();
        assert_eq!(record.state, TaskState::Canceled);
        assert_eq!(record.checkpoint, 0);
        assert_eq!(record.progress, 0.0);
        assert!(record.result_ref.is_none());
        assert!(rx.try_recv().is_err(), "no events after cancel");
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_without_terminal_events() {
        let processor = Arc::new(ScriptedProcessor::new());
        let f = fixture(processor.clone(), 5);

        let (sink, mut rx) = ChannelSink::pair(32);
        f.hub.subscribe(SubscriptionScope::Task(f.id), Arc::new(sink));

        let flags = Arc::new(RunFlags::default());
        flags.request_cancel();
        let outcome = f.executor.run(f.id, flags).await.unwrap();
        assert_eq!(outcome, RunOutcome::Canceled);

        assert!(processor.processed().is_empty());
        while let Ok(event) = rx.try_recv() {
            assert!(!event.kind.is_terminal());
        }
    }
}
