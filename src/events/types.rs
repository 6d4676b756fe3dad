use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::TaskId;
use crate::state_machine::TaskState;

/// Lifecycle and progress events broadcast by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Created,
    StateChanged {
        old: TaskState,
        new: TaskState,
    },
    Progress {
        value: f64,
        chunk_index: u32,
        total: u32,
    },
    Completed {
        result_ref: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl EventKind {
    /// Progress events are the only kind subject to per-subscriber throttling.
    pub fn is_progress(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Envelope delivered to subscribers.
///
/// `sequence` is monotone per task, so consumers can assert FIFO ordering
/// for a single task's events; no ordering holds across tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub task_id: TaskId,
    pub sequence: u64,
    pub kind: EventKind,
    pub published_at: DateTime<Utc>,
}

/// What a subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Events for a single task
    Task(TaskId),
    /// The aggregate feed across all tasks
    All,
}

impl SubscriptionScope {
    pub fn matches(&self, task_id: TaskId) -> bool {
        match self {
            Self::Task(id) => *id == task_id,
            Self::All => true,
        }
    }
}
