//! Task Engine: the public controller surface and process assembly.
//!
//! An engine instance owns its store, hub, scheduler loop, worker pool, and
//! reaper. There is no ambient global state; multiple isolated engines can
//! coexist in one process, which the test suite leans on heavily.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventKind, EventSink, NotificationHub, SubscriptionScope};
use crate::executor::{ChunkExecutor, ControlRegistry, ExecutorConfig};
use crate::identity::{Clock, IdGenerator, SubscriberId, SystemClock, TaskId};
use crate::models::{TaskOptions, TaskRecord, MAX_PRIORITY, MIN_PRIORITY};
use crate::processor::ChunkProcessor;
use crate::scheduler::{PriorityScheduler, SchedulerSignal};
use crate::state_machine::{target_state, TaskState, TransitionEvent};
use crate::store::{TaskFilter, TaskStore};

/// Builder for a fully wired [`TaskEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    processor: Arc<dyn ChunkProcessor>,
    journal_dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl EngineBuilder {
    pub fn new(processor: Arc<dyn ChunkProcessor>) -> Self {
        Self {
            config: EngineConfig::default(),
            processor,
            journal_dir: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable durable task records journaled under `dir`; a previous
    /// process's interrupted tasks are re-admitted on build.
    pub fn journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate configuration, open the store, and spawn the scheduler
    /// loop, worker pool, and reaper.
    pub fn build(self) -> Result<TaskEngine> {
        self.config.validate()?;

        let store = Arc::new(match &self.journal_dir {
            Some(dir) => TaskStore::open(dir, self.clock.clone())?,
            None => TaskStore::new(self.clock.clone()),
        });
        let hub = Arc::new(NotificationHub::new(
            self.config.progress_min_interval(),
            self.clock.clone(),
        ));
        let controls = Arc::new(ControlRegistry::new());
        let running = Arc::new(AtomicUsize::new(0));

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.config.max_concurrency);

        let executor = Arc::new(ChunkExecutor::new(
            store.clone(),
            hub.clone(),
            self.processor,
            self.clock.clone(),
            ExecutorConfig::from(&self.config),
        ));

        let scheduler = PriorityScheduler::new(
            store.clone(),
            hub.clone(),
            controls.clone(),
            self.clock.clone(),
            self.config.max_concurrency,
            self.config.aging_interval(),
            self.config.scheduler_tick(),
            running.clone(),
            dispatch_tx,
            signal_rx,
        );

        let mut handles = Vec::new();
        handles.push(tokio::spawn(scheduler.run()));

        let dispatch_rx = Arc::new(tokio::sync::Mutex::new(dispatch_rx));
        for worker_id in 0..self.config.max_concurrency {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                dispatch_rx.clone(),
                executor.clone(),
                controls.clone(),
                running.clone(),
                signal_tx.clone(),
            )));
        }

        let reaper = tokio::spawn(reaper_loop(
            store.clone(),
            hub.clone(),
            self.clock.clone(),
            self.config.clone(),
        ));

        let engine = TaskEngine {
            config: self.config,
            store,
            hub,
            controls,
            clock: self.clock,
            ids: IdGenerator::new(),
            signal_tx,
            handles: Mutex::new(handles),
            reaper: Mutex::new(Some(reaper)),
            shutdown: AtomicBool::new(false),
        };

        // Kick the scheduler once so journal-recovered pending tasks are
        // re-admitted without waiting for the first tick.
        let _ = engine.signal_tx.send(SchedulerSignal::TaskQueued);
        Ok(engine)
    }
}

/// Task queue and chunked execution engine.
pub struct TaskEngine {
    config: EngineConfig,
    store: Arc<TaskStore>,
    hub: Arc<NotificationHub>,
    controls: Arc<ControlRegistry>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    signal_tx: mpsc::UnboundedSender<SchedulerSignal>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl TaskEngine {
    pub fn builder(processor: Arc<dyn ChunkProcessor>) -> EngineBuilder {
        EngineBuilder::new(processor)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a new task; it enters the pending queue immediately.
    pub async fn submit(
        &self,
        options: TaskOptions,
        priority: u8,
        owner: impl Into<String>,
    ) -> Result<TaskId> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(EngineError::InvalidOptions(format!(
                "priority must be within {MIN_PRIORITY}..={MAX_PRIORITY}, got {priority}"
            )));
        }
        options.validate().map_err(EngineError::InvalidOptions)?;

        let record = TaskRecord::new(
            self.ids.task_id(),
            owner,
            options,
            priority,
            self.clock.now(),
        );
        let id = self.store.create(record)?;
        info!(task_id = %id, priority, "task submitted");

        self.hub.publish(id, EventKind::Created).await;
        let _ = self.signal_tx.send(SchedulerSignal::TaskQueued);
        Ok(id)
    }

    /// Request a graceful pause; takes effect at the next chunk boundary.
    pub async fn pause(&self, id: TaskId) -> Result<()> {
        let record = self.store.get(id)?;
        if record.state != TaskState::Processing {
            return Err(EngineError::NotRunning {
                id,
                state: record.state,
            });
        }
        match self.controls.get(id) {
            Some(flags) => {
                flags.request_pause();
                info!(task_id = %id, "pause requested");
                Ok(())
            }
            None => {
                // The run ended between the state read and here.
                let state = self.store.get(id)?.state;
                Err(EngineError::NotRunning { id, state })
            }
        }
    }

    /// Re-enter a paused task into the pending queue at checkpoint+1.
    pub async fn resume(&self, id: TaskId) -> Result<()> {
        let now = self.clock.now();
        let (outcome, resumed) = self.store.update(id, |rec| {
            match target_state(rec.state, &TransitionEvent::Resume) {
                Ok(next) => {
                    rec.state = next;
                    rec.enqueued_at = now;
                    rec.current_chunk = rec.checkpoint + 1;
                    true
                }
                Err(_) => false,
            }
        })?;
        if !resumed {
            return Err(EngineError::NotPaused {
                id,
                state: outcome.old_state,
            });
        }

        info!(
            task_id = %id,
            checkpoint = outcome.record.checkpoint,
            "task resumed"
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
        let _ = self.signal_tx.send(SchedulerSignal::TaskQueued);
        Ok(())
    }

    /// Cancel a task. Immediate at the state level; an in-flight chunk is
    /// allowed to finish and its result is discarded. A no-op when the task
    /// is already terminal.
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let now = self.clock.now();
        let (outcome, canceled) = self.store.update(id, |rec| {
            match target_state(rec.state, &TransitionEvent::Cancel) {
                Ok(next) => {
                    rec.state = next;
                    rec.completed_at = Some(now);
                    true
                }
                Err(_) => false,
            }
        })?;
        if !canceled {
            debug!(task_id = %id, state = %outcome.old_state, "cancel on terminal task ignored");
            return Ok(());
        }

        if outcome.old_state == TaskState::Processing {
            if let Some(flags) = self.controls.get(id) {
                flags.request_cancel();
            }
        }
        info!(task_id = %id, from = %outcome.old_state, "task canceled");
        self.hub
            .publish(
                id,
                EventKind::StateChanged {
                    old: outcome.old_state,
                    new: outcome.new_state,
                },
            )
            .await;
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.store.get(id)
    }

    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        self.store.list(filter)
    }

    pub fn subscribe(&self, scope: SubscriptionScope, sink: Arc<dyn EventSink>) -> SubscriberId {
        self.hub.subscribe(scope, sink)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Stop admitting work and wait for in-flight chunk loops to finish.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine shutting down");
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        let _ = self.signal_tx.send(SchedulerSignal::Shutdown);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!(error = %e, "engine task panicked during shutdown");
                }
            }
        }
        info!("engine stopped");
    }
}

/// One worker context: runs at most one task's chunk loop at a time and
/// releases its slot exactly once per run.
async fn worker_loop(
    worker_id: usize,
    dispatch_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TaskId>>>,
    executor: Arc<ChunkExecutor>,
    controls: Arc<ControlRegistry>,
    running: Arc<AtomicUsize>,
    signal_tx: mpsc::UnboundedSender<SchedulerSignal>,
) {
    loop {
        let next = { dispatch_rx.lock().await.recv().await };
        let Some(id) = next else {
            debug!(worker_id, "worker loop exiting");
            break;
        };

        let flags = match controls.get(id) {
            Some(flags) => flags,
            None => controls.register(id),
        };
        match executor.run(id, flags).await {
            Ok(outcome) => debug!(worker_id, task_id = %id, ?outcome, "run finished"),
            Err(e) => error!(worker_id, task_id = %id, error = %e, "run aborted"),
        }
        controls.remove(id);
        running.fetch_sub(1, Ordering::SeqCst);
        let _ = signal_tx.send(SchedulerSignal::SlotFreed);
    }
}

/// Deletes terminal records once their retention window elapses.
async fn reaper_loop(
    store: Arc<TaskStore>,
    hub: Arc<NotificationHub>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
) {
    let mut tick = tokio::time::interval(config.reaper_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        for id in store.expired_terminal(clock.now(), config.retention()) {
            match store.delete(id) {
                Ok(()) => {
                    hub.forget_task(id);
                    debug!(task_id = %id, "expired task record reaped");
                }
                Err(e) => warn!(task_id = %id, error = %e, "failed to reap task record"),
            }
        }
    }
}
