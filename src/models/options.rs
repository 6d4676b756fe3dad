use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Byte or page range covered by one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Processing options fixed at submission.
///
/// The engine only interprets the chunk layout and the per-task execution
/// overrides; `settings` is passed through verbatim to the chunk processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Chunk layout of the document, in execution order
    pub chunk_ranges: Vec<ChunkRange>,
    /// Opaque processor configuration (OCR engine choice, language hints, ...)
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Override for the engine-wide retry budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_attempts: Option<u32>,
    /// Override for the engine-wide per-chunk timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_timeout_ms: Option<u64>,
}

impl TaskOptions {
    pub fn new(chunk_ranges: Vec<ChunkRange>) -> Self {
        Self {
            chunk_ranges,
            settings: serde_json::Value::Null,
            max_chunk_attempts: None,
            chunk_timeout_ms: None,
        }
    }

    /// Convenience constructor: `count` equal chunks of `chunk_size` units.
    pub fn with_uniform_chunks(count: u32, chunk_size: u64) -> Self {
        let ranges = (0..u64::from(count))
            .map(|i| ChunkRange::new(i * chunk_size, (i + 1) * chunk_size))
            .collect();
        Self::new(ranges)
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the option blob at submission time.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_ranges.is_empty() {
            return Err("chunk_ranges must not be empty".to_string());
        }
        if let Some(range) = self.chunk_ranges.iter().find(|r| r.is_empty()) {
            return Err(format!(
                "chunk range {}..{} is empty or inverted",
                range.start, range.end
            ));
        }
        if self.max_chunk_attempts == Some(0) {
            return Err("max_chunk_attempts must be at least 1".to_string());
        }
        if self.chunk_timeout_ms == Some(0) {
            return Err("chunk_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_chunks() {
        let options = TaskOptions::with_uniform_chunks(3, 100);
        assert_eq!(options.chunk_ranges.len(), 3);
        assert_eq!(options.chunk_ranges[1], ChunkRange::new(100, 200));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_chunk_list_rejected() {
        let options = TaskOptions::new(vec![]);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let options = TaskOptions::new(vec![ChunkRange::new(50, 50)]);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_overrides_rejected() {
        let mut options = TaskOptions::with_uniform_chunks(1, 10);
        options.max_chunk_attempts = Some(0);
        assert!(options.validate().is_err());

        let mut options = TaskOptions::with_uniform_chunks(1, 10);
        options.chunk_timeout_ms = Some(0);
        assert!(options.validate().is_err());
    }
}
