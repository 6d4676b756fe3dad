//! External processing interface.
//!
//! The engine treats chunk processing as opaque: OCR engines, converters,
//! and embedding backends all sit behind [`ChunkProcessor`], injected once
//! at engine construction. Implementations must tolerate being called from
//! up to `max_concurrency` worker contexts at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{ChunkRecord, TaskOptions};

/// Output of one successful chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkOutput {
    /// Reference to the produced artifact (e.g. an output path); the last
    /// chunk's reference becomes the task's result reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    /// Processor-specific details, passed through to events untouched
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ChunkOutput {
    pub fn with_result_ref(result_ref: impl Into<String>) -> Self {
        Self {
            result_ref: Some(result_ref.into()),
            details: serde_json::Value::Null,
        }
    }
}

/// Failure of one chunk attempt, counted against the chunk's retry budget.
#[derive(Debug, Clone)]
pub struct ChunkError {
    pub message: String,
}

impl ChunkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ChunkError {}

/// The engine's sole collaborator interface for document-specific work.
#[async_trait]
pub trait ChunkProcessor: Send + Sync {
    async fn process(
        &self,
        chunk: &ChunkRecord,
        options: &TaskOptions,
    ) -> Result<ChunkOutput, ChunkError>;
}
