use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::chunk::ChunkRecord;
use super::options::TaskOptions;
use crate::identity::TaskId;
use crate::state_machine::TaskState;

/// Audit entry recorded for every persisted state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub old_state: TaskState,
    pub new_state: TaskState,
    pub at: DateTime<Utc>,
}

/// Durable record of one document-processing task.
///
/// `priority` is fixed at submission; scheduling uses
/// [`TaskRecord::effective_priority`] which ages upward while the task waits.
/// `checkpoint` is the 1-based ordinal of the last successfully completed
/// chunk (0 = none), and always reflects what has been durably written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub owner: String,
    pub priority: u8,
    pub options: TaskOptions,
    pub state: TaskState,
    pub progress: f64,
    /// Ordinal of the next chunk the executor will run
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub checkpoint: u32,
    pub chunks: Vec<ChunkRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// When the task last entered the pending queue (reset on resume)
    pub enqueued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

/// Ceiling for both submission priority and aged effective priority.
pub const MAX_PRIORITY: u8 = 10;

/// Floor for submission priority.
pub const MIN_PRIORITY: u8 = 1;

impl TaskRecord {
    pub fn new(
        id: TaskId,
        owner: impl Into<String>,
        options: TaskOptions,
        priority: u8,
        now: DateTime<Utc>,
    ) -> Self {
        let chunks = ChunkRecord::plan(&options.chunk_ranges);
        let total_chunks = chunks.len() as u32;
        Self {
            id,
            owner: owner.into(),
            priority,
            options,
            state: TaskState::Pending,
            progress: 0.0,
            current_chunk: 1,
            total_chunks,
            checkpoint: 0,
            chunks,
            error: None,
            result_ref: None,
            submitted_at: now,
            enqueued_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            audit: Vec::new(),
        }
    }

    /// Priority after anti-starvation aging: one point per full aging
    /// interval waited in the pending queue, capped at [`MAX_PRIORITY`].
    pub fn effective_priority(&self, now: DateTime<Utc>, aging_interval: Duration) -> u8 {
        let waited_ms = (now - self.enqueued_at).num_milliseconds().max(0) as u64;
        let interval_ms = aging_interval.as_millis().max(1) as u64;
        let boost = (waited_ms / interval_ms).min(u64::from(MAX_PRIORITY)) as u8;
        self.priority.saturating_add(boost).min(MAX_PRIORITY)
    }

    /// Fraction of chunks durably completed.
    pub fn progress_for(checkpoint: u32, total: u32) -> f64 {
        if total == 0 {
            0.0
        } else {
            f64::from(checkpoint) / f64::from(total)
        }
    }

    /// Record a successful chunk: advance checkpoint, progress, and cursor
    /// as a single mutation so the store persists them as one unit.
    pub fn record_chunk_done(&mut self, index: u32, result_ref: Option<String>) {
        if let Some(chunk) = self.chunks.get_mut(index as usize - 1) {
            chunk.state = crate::state_machine::ChunkState::Done;
            chunk.last_error = None;
        }
        self.checkpoint = index;
        self.current_chunk = index + 1;
        self.progress = Self::progress_for(self.checkpoint, self.total_chunks);
        if result_ref.is_some() {
            self.result_ref = result_ref;
        }
    }

    /// Record a failed chunk attempt; the chunk stays pending until its
    /// retry budget is exhausted.
    pub fn record_chunk_attempt(&mut self, index: u32, error: impl Into<String>) -> u32 {
        match self.chunks.get_mut(index as usize - 1) {
            Some(chunk) => {
                chunk.attempts += 1;
                chunk.last_error = Some(error.into());
                chunk.attempts
            }
            None => 0,
        }
    }

    pub fn chunk(&self, index: u32) -> Option<&ChunkRecord> {
        self.chunks.get(index as usize - 1)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdGenerator;
    use crate::state_machine::ChunkState;
    use chrono::Duration as ChronoDuration;

    fn record(priority: u8) -> TaskRecord {
        TaskRecord::new(
            IdGenerator::new().task_id(),
            "tester",
            TaskOptions::with_uniform_chunks(4, 100),
            priority,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_record_shape() {
        let record = record(5);
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.total_chunks, 4);
        assert_eq!(record.checkpoint, 0);
        assert_eq!(record.current_chunk, 1);
        assert_eq!(record.progress, 0.0);
        assert!(record.audit.is_empty());
    }

    #[test]
    fn test_effective_priority_ages_and_caps() {
        let mut record = record(5);
        let aging = Duration::from_secs(60);
        let now = record.enqueued_at;

        assert_eq!(record.effective_priority(now, aging), 5);
        assert_eq!(
            record.effective_priority(now + ChronoDuration::seconds(61), aging),
            6
        );
        assert_eq!(
            record.effective_priority(now + ChronoDuration::seconds(600), aging),
            10
        );

        // A top-priority task never exceeds the cap.
        record.priority = 10;
        assert_eq!(
            record.effective_priority(now + ChronoDuration::seconds(600), aging),
            10
        );
    }

    #[test]
    fn test_record_chunk_done_advances_checkpoint() {
        let mut record = record(5);
        record.record_chunk_done(1, Some("out/p1".to_string()));
        assert_eq!(record.checkpoint, 1);
        assert_eq!(record.current_chunk, 2);
        assert_eq!(record.progress, 0.25);
        assert_eq!(record.chunk(1).unwrap().state, ChunkState::Done);
        assert_eq!(record.result_ref.as_deref(), Some("out/p1"));

        // Progress is monotone across successive chunks.
        record.record_chunk_done(2, None);
        assert_eq!(record.progress, 0.5);
        assert_eq!(record.result_ref.as_deref(), Some("out/p1"));
    }

    #[test]
    fn test_record_chunk_attempt_tracks_failures() {
        let mut record = record(5);
        assert_eq!(record.record_chunk_attempt(2, "ocr timeout"), 1);
        assert_eq!(record.record_chunk_attempt(2, "ocr timeout"), 2);
        let chunk = record.chunk(2).unwrap();
        assert_eq!(chunk.attempts, 2);
        assert_eq!(chunk.last_error.as_deref(), Some("ocr timeout"));
        assert_eq!(chunk.state, ChunkState::Pending);
    }
}
