//! Data model: task records, chunk records, and submission options.

pub mod chunk;
pub mod options;
pub mod task;

pub use chunk::ChunkRecord;
pub use options::{ChunkRange, TaskOptions};
pub use task::{AuditEntry, TaskRecord, MAX_PRIORITY, MIN_PRIORITY};
