#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Docflow Core
//!
//! Task queue and chunked execution engine for document-recognition
//! pipelines.
//!
//! ## Overview
//!
//! The engine accepts document-processing tasks, splits each into chunks,
//! and drives them through a priority scheduler with anti-starvation aging,
//! a fixed-size worker pool, cooperative pause/cancel, per-chunk retries
//! with exponential backoff, durable checkpoints, and a publish/subscribe
//! notification hub. Document-specific work (OCR, conversion, embedding)
//! stays behind a single [`ChunkProcessor`] callback supplied at
//! construction.
//!
//! ## Module Organization
//!
//! - [`engine`] - Public controller surface and process assembly
//! - [`scheduler`] - Serialized admission loop with aging-adjusted priority
//! - [`executor`] - Per-chunk protocol: retries, timeout, pause/cancel
//! - [`store`] - Durable task records with audit trail and crash recovery
//! - [`events`] - Scoped lifecycle/progress event broadcast
//! - [`state_machine`] - Task states and the transition table
//! - [`models`] - Task, chunk, and option records
//! - [`processor`] - External chunk-processing interface
//! - [`config`] - Engine configuration
//! - [`error`] - Structured error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docflow_core::{
//!     ChunkError, ChunkOutput, ChunkProcessor, ChunkRecord, EngineBuilder, TaskOptions,
//! };
//!
//! struct NoopOcr;
//!
//! #[async_trait::async_trait]
//! impl ChunkProcessor for NoopOcr {
//!     async fn process(
//!         &self,
//!         chunk: &ChunkRecord,
//!         _options: &TaskOptions,
//!     ) -> Result<ChunkOutput, ChunkError> {
//!         Ok(ChunkOutput::with_result_ref(format!("out/{}", chunk.index)))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new(Arc::new(NoopOcr)).build()?;
//! let id = engine
//!     .submit(TaskOptions::with_uniform_chunks(10, 4096), 5, "ingest")
//!     .await?;
//! println!("submitted {id}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod identity;
pub mod logging;
pub mod models;
pub mod processor;
pub mod scheduler;
pub mod state_machine;
pub mod store;

pub use config::EngineConfig;
pub use engine::{EngineBuilder, TaskEngine};
pub use error::{EngineError, Result};
pub use events::{ChannelSink, EngineEvent, EventKind, EventSink, SubscriptionScope};
pub use identity::{Clock, IdGenerator, SubscriberId, SystemClock, TaskId};
pub use models::{ChunkRange, ChunkRecord, TaskOptions, TaskRecord};
pub use processor::{ChunkError, ChunkOutput, ChunkProcessor};
pub use state_machine::{ChunkState, TaskState};
pub use store::{ListOrder, TaskFilter, TaskStore, UpdateOutcome};
