//! Priority scheduler: the single serialized admission decision-maker.
//!
//! One loop consumes wake-up signals (submission, slot release, resume) and
//! an aging tick, then admits pending tasks until the concurrency cap is
//! reached. Because admission happens nowhere else, "at most N running" is
//! exact, and the per-task single-active-runner invariant follows from the
//! Pending→Processing transition being guarded inside the store's entry
//! lock.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{EventKind, NotificationHub};
use crate::executor::control::ControlRegistry;
use crate::identity::{Clock, TaskId};
use crate::models::TaskRecord;
use crate::state_machine::{target_state, TaskState, TransitionEvent};
use crate::store::{TaskFilter, TaskStore};

/// Wake-up reasons for the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerSignal {
    /// A task entered the pending queue (submit, resume, recovery)
    TaskQueued,
    /// A worker slot was released (complete, fail, cancel, pause)
    SlotFreed,
    /// Stop admitting and exit the loop
    Shutdown,
}

/// Pick the next admissible task: effective priority descending, then
/// earliest submission (FIFO). Pure so selection order is unit-testable.
pub fn select_next(
    pending: &[TaskRecord],
    now: DateTime<Utc>,
    aging_interval: Duration,
) -> Option<TaskId> {
    pending
        .iter()
        .filter(|record| record.state.is_schedulable())
        .max_by_key(|record| {
            (
                record.effective_priority(now, aging_interval),
                Reverse(record.submitted_at),
            )
        })
        .map(|record| record.id)
}

pub struct PriorityScheduler {
    store: Arc<TaskStore>,
    hub: Arc<NotificationHub>,
    controls: Arc<ControlRegistry>,
    clock: Arc<dyn Clock>,
    max_concurrency: usize,
    aging_interval: Duration,
    tick: Duration,
    running: Arc<AtomicUsize>,
    dispatch_tx: mpsc::Sender<TaskId>,
    signal_rx: mpsc::UnboundedReceiver<SchedulerSignal>,
}

impl PriorityScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<TaskStore>,
        hub: Arc<NotificationHub>,
        controls: Arc<ControlRegistry>,
        clock: Arc<dyn Clock>,
        max_concurrency: usize,
        aging_interval: Duration,
        tick: Duration,
        running: Arc<AtomicUsize>,
        dispatch_tx: mpsc::Sender<TaskId>,
        signal_rx: mpsc::UnboundedReceiver<SchedulerSignal>,
    ) -> Self {
        Self {
            store,
            hub,
            controls,
            clock,
            max_concurrency,
            aging_interval,
            tick,
            running,
            dispatch_tx,
            signal_rx,
        }
    }

    /// Serialized decision loop; consumes the scheduler.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            max_concurrency = self.max_concurrency,
            "priority scheduler started"
        );

        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => match signal {
                    Some(SchedulerSignal::Shutdown) | None => break,
                    Some(_) => self.admit().await,
                },
                _ = tick.tick() => self.admit().await,
            }
        }

        info!("priority scheduler stopped");
    }

    /// Admit pending tasks until all slots are occupied. Idempotent: a
    /// no-op when nothing is pending or every slot is taken.
    async fn admit(&self) {
        while self.running.load(Ordering::SeqCst) < self.max_concurrency {
            let pending = self.store.list(&TaskFilter {
                state: Some(TaskState::Pending),
                ..TaskFilter::default()
            });
            let now = self.clock.now();
            let Some(id) = select_next(&pending, now, self.aging_interval) else {
                break;
            };

            let admitted = match self.store.update(id, |record| {
                match target_state(record.state, &TransitionEvent::Admit) {
                    Ok(next) => {
                        record.state = next;
                        record.started_at.get_or_insert(now);
                        record.current_chunk = record.checkpoint + 1;
                        true
                    }
                    Err(_) => false,
                }
            }) {
                Ok((outcome, true)) => outcome,
                // Record vanished or was canceled concurrently: expected
                // race, skip and re-select.
                Ok((_, false)) | Err(_) => {
                    debug!(task_id = %id, "skipping non-admissible task");
                    continue;
                }
            };

            self.controls.register(id);
            // The only place a slot is acquired; released once by the
            // worker when the run ends.
            self.running.fetch_add(1, Ordering::SeqCst);
            debug!(
                task_id = %id,
                running = self.running.load(Ordering::SeqCst),
                "task admitted"
            );
            self.hub
                .publish(
                    id,
                    EventKind::StateChanged {
                        old: admitted.old_state,
                        new: admitted.new_state,
                    },
                )
                .await;

            if self.dispatch_tx.send(id).await.is_err() {
                // Worker pool is gone; roll the slot back and stop.
                warn!(task_id = %id, "worker pool unavailable, rolling back admission");
                self.running.fetch_sub(1, Ordering::SeqCst);
                self.controls.remove(id);
                break;
            }
        }
    }
}
