//! Task Record Store: the single owner of persisted task state.
//!
//! All mutations funnel through [`TaskStore::update`], an atomic
//! read-modify-write under the task's map entry lock. Every state change
//! appends an audit entry and, when a journal directory is configured, the
//! whole record is rewritten atomically on disk. Restart recovery re-homes
//! interrupted PROCESSING tasks to PENDING with their checkpoint intact.

pub mod journal;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::identity::{Clock, TaskId};
use crate::models::{AuditEntry, TaskRecord};
use crate::state_machine::TaskState;

pub use journal::Journal;

/// Snapshot of a completed update, used by callers to broadcast exactly one
/// notification per real state change.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub old_state: TaskState,
    pub new_state: TaskState,
    pub record: TaskRecord,
}

impl UpdateOutcome {
    pub fn state_changed(&self) -> bool {
        self.old_state != self.new_state
    }
}

/// Filter and ordering for [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub owner: Option<String>,
    pub order: ListOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    #[default]
    SubmittedDesc,
    SubmittedAsc,
}

pub struct TaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
    journal: Option<Journal>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    /// In-memory store without durability (tests, embedded use).
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: DashMap::new(),
            journal: None,
            clock,
        }
    }

    /// Durable store journaling every record under `dir`, reloading whatever
    /// a previous process left behind.
    pub fn open(dir: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let journal = Journal::new(dir)?;
        let store = Self {
            tasks: DashMap::new(),
            journal: Some(journal),
            clock,
        };
        store.recover()?;
        Ok(store)
    }

    /// Reload journaled records. Tasks interrupted mid-run go back to the
    /// pending queue at their last durable checkpoint; nothing is lost and
    /// nothing resumes past what was written.
    fn recover(&self) -> Result<()> {
        let journal = match &self.journal {
            Some(journal) => journal,
            None => return Ok(()),
        };
        let now = self.clock.now();
        let mut recovered = 0usize;
        for mut record in journal.load_all()? {
            if record.state == TaskState::Processing {
                record.audit.push(AuditEntry {
                    old_state: TaskState::Processing,
                    new_state: TaskState::Pending,
                    at: now,
                });
                record.state = TaskState::Pending;
                record.enqueued_at = now;
                record.current_chunk = record.checkpoint + 1;
                journal.write(&record)?;
                recovered += 1;
            }
            self.tasks.insert(record.id, record);
        }
        if !self.tasks.is_empty() {
            info!(
                tasks = self.tasks.len(),
                requeued = recovered,
                "task store recovered from journal"
            );
        }
        Ok(())
    }

    pub fn create(&self, record: TaskRecord) -> Result<TaskId> {
        let id = record.id;
        if self.tasks.contains_key(&id) {
            return Err(EngineError::Store(format!("duplicate task id: {id}")));
        }
        if let Some(journal) = &self.journal {
            journal.write(&record)?;
        }
        self.tasks.insert(id, record);
        debug!(task_id = %id, "task record created");
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Atomic read-modify-write under the per-task entry lock.
    ///
    /// The mutator's return value is handed back so callers can thread out
    /// decisions made while the lock was held (e.g. whether a guarded
    /// transition actually happened). If the journal write fails, the
    /// in-memory record is rolled back to its pre-mutation snapshot so
    /// memory never runs ahead of durable state.
    pub fn update<R>(
        &self,
        id: TaskId,
        mutator: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Result<(UpdateOutcome, R)> {
        let mut entry = self.tasks.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let snapshot = self.journal.as_ref().map(|_| entry.value().clone());
        let old_state = entry.state;
        let value = mutator(&mut entry);
        let new_state = entry.state;
        if new_state != old_state {
            entry.audit.push(AuditEntry {
                old_state,
                new_state,
                at: self.clock.now(),
            });
        }
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.write(entry.value()) {
                if let Some(snapshot) = snapshot {
                    *entry.value_mut() = snapshot;
                }
                return Err(e);
            }
        }
        let outcome = UpdateOutcome {
            old_state,
            new_state,
            record: entry.value().clone(),
        };
        Ok((outcome, value))
    }

    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|entry| {
                filter.state.map_or(true, |s| entry.state == s)
                    && filter.owner.as_ref().map_or(true, |o| &entry.owner == o)
            })
            .map(|entry| entry.value().clone())
            .collect();

        match filter.order {
            ListOrder::SubmittedDesc => {
                records.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
            }
            ListOrder::SubmittedAsc => {
                records.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
            }
        }

        records
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn delete(&self, id: TaskId) -> Result<()> {
        let removed = self.tasks.remove(&id);
        if removed.is_none() {
            return Err(EngineError::NotFound(id));
        }
        if let Some(journal) = &self.journal {
            journal.remove(id)?;
        }
        debug!(task_id = %id, "task record deleted");
        Ok(())
    }

    /// Terminal records whose retention window has elapsed.
    pub fn expired_terminal(&self, now: DateTime<Utc>, retention: Duration) -> Vec<TaskId> {
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36500));
        self.tasks
            .iter()
            .filter(|entry| {
                entry.state.is_terminal()
                    && entry
                        .completed_at
                        .map_or(false, |done| now - done >= retention)
            })
            .map(|entry| entry.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
