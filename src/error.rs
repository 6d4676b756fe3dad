//! Engine-level error taxonomy.
//!
//! Controller operations return these synchronously; execution-time chunk
//! failures are recorded on the task and surfaced through the `failed` event
//! rather than through this type. Notification delivery failures are local
//! to the events module and never propagate here.

use thiserror::Error;

use crate::identity::TaskId;
use crate::state_machine::TaskState;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Submission rejected before a task was created
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Operation on an unknown task id
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Pause requested while the task was not processing
    #[error("task {id} is not running (state: {state})")]
    NotRunning { id: TaskId, state: TaskState },

    /// Resume requested while the task was not paused
    #[error("task {id} is not paused (state: {state})")]
    NotPaused { id: TaskId, state: TaskState },

    /// A chunk exhausted its retry budget
    #[error("chunk {chunk} failed after {attempts} attempts: {message}")]
    ChunkFailure {
        chunk: u32,
        attempts: u32,
        message: String,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("journal i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Engine is shutting down and no longer accepts work
    #[error("engine is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, EngineError>;
