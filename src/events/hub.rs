use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::sinks::EventSink;
use super::types::{EngineEvent, EventKind, SubscriptionScope};
use crate::identity::{Clock, IdGenerator, SubscriberId, TaskId};

/// Publish/subscribe hub for task lifecycle and progress events.
///
/// Delivery is at-least-once and best-effort: a failing or slow subscriber
/// is logged and skipped, never stalls another subscriber, and never feeds
/// back into task processing. Progress events are throttled per
/// (subscriber, task) to a minimum interval; state changes and terminal
/// events always go through.
pub struct NotificationHub {
    subscribers: DashMap<SubscriberId, SubscriberEntry>,
    sequences: DashMap<TaskId, u64>,
    /// Serializes sequence assignment and delivery per task, so concurrent
    /// publishers (controller racing the executor) cannot interleave one
    /// task's events out of order.
    publish_locks: DashMap<TaskId, Arc<tokio::sync::Mutex<()>>>,
    progress_min_interval: Duration,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
}

struct SubscriberEntry {
    scope: SubscriptionScope,
    sink: Arc<dyn EventSink>,
    /// Last progress delivery per task, for throttling
    last_progress: Arc<Mutex<HashMap<TaskId, Instant>>>,
}

impl NotificationHub {
    pub fn new(progress_min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscribers: DashMap::new(),
            sequences: DashMap::new(),
            publish_locks: DashMap::new(),
            progress_min_interval,
            ids: IdGenerator::new(),
            clock,
        }
    }

    pub fn subscribe(&self, scope: SubscriptionScope, sink: Arc<dyn EventSink>) -> SubscriberId {
        let id = self.ids.subscriber_id();
        self.subscribers.insert(
            id,
            SubscriberEntry {
                scope,
                sink,
                last_progress: Arc::new(Mutex::new(HashMap::new())),
            },
        );
        debug!(subscriber_id = %id, ?scope, "subscriber registered");
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber_id = %id, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Broadcast one event to every matching subscriber.
    ///
    /// Sequence assignment and delivery happen under a per-task lock, so
    /// per-task FIFO holds even when the controller and the executor publish
    /// concurrently; publishes for different tasks do not contend.
    pub async fn publish(&self, task_id: TaskId, kind: EventKind) {
        let lock = self
            .publish_locks
            .entry(task_id)
            .or_default()
            .value()
            .clone();
        let _ordering = lock.lock().await;

        let sequence = {
            let mut entry = self.sequences.entry(task_id).or_insert(0);
            *entry += 1;
            *entry
        };
        let event = EngineEvent {
            task_id,
            sequence,
            kind,
            published_at: self.clock.now(),
        };

        // Snapshot matching subscribers first; holding map shards across
        // await points would block concurrent subscribe calls.
        let targets: Vec<(
            SubscriberId,
            Arc<dyn EventSink>,
            Arc<Mutex<HashMap<TaskId, Instant>>>,
        )> = self
            .subscribers
            .iter()
            .filter(|entry| entry.scope.matches(task_id))
            .map(|entry| {
                (
                    *entry.key(),
                    entry.sink.clone(),
                    entry.last_progress.clone(),
                )
            })
            .collect();

        for (subscriber_id, sink, last_progress) in targets {
            if event.kind.is_progress() {
                let mut last = last_progress.lock();
                let now = Instant::now();
                if let Some(previous) = last.get(&task_id) {
                    if now.duration_since(*previous) < self.progress_min_interval {
                        continue;
                    }
                }
                last.insert(task_id, now);
            }

            if let Err(e) = sink.deliver(&event).await {
                warn!(
                    subscriber_id = %subscriber_id,
                    task_id = %task_id,
                    event = event.kind.name(),
                    error = %e,
                    "event delivery failed, dropping for this subscriber"
                );
            }
        }
    }

    /// Drop per-task bookkeeping once a record is deleted.
    pub fn forget_task(&self, task_id: TaskId) {
        self.sequences.remove(&task_id);
        self.publish_locks.remove(&task_id);
        for entry in self.subscribers.iter() {
            entry.last_progress.lock().remove(&task_id);
        }
    }
}
