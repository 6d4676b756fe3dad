use serde::{Deserialize, Serialize};

use super::options::ChunkRange;
use crate::state_machine::ChunkState;

/// One schedulable unit of work within a task.
///
/// Ordinals are 1-based so a task checkpoint of `n` reads as "chunks 1..=n
/// are done" and `0` as "nothing completed yet".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: u32,
    pub range: ChunkRange,
    pub state: ChunkState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ChunkRecord {
    pub fn new(index: u32, range: ChunkRange) -> Self {
        Self {
            index,
            range,
            state: ChunkState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Build the chunk list for a task from its option ranges.
    pub fn plan(ranges: &[ChunkRange]) -> Vec<ChunkRecord> {
        ranges
            .iter()
            .enumerate()
            .map(|(i, range)| ChunkRecord::new(i as u32 + 1, *range))
            .collect()
    }
}
