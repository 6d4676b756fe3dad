use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a scheduler slot
    Pending,
    /// A worker is executing the task's chunk loop
    Processing,
    /// Paused at a chunk boundary, checkpoint intact
    Paused,
    /// All chunks completed successfully
    Completed,
    /// A chunk exhausted its retry budget
    Failed,
    /// Canceled by the caller
    Canceled,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Check if the task is actively running on a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Check if the task is eligible for scheduler admission
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Chunk-local states within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Not yet attempted, or attempted and awaiting retry
    Pending,
    /// Completed successfully and recorded in the checkpoint
    Done,
    /// Exhausted its retry budget
    Failed,
}

impl ChunkState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl Default for ChunkState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
