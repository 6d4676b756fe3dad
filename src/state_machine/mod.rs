//! Task state machine: states, transition events, and the transition table.
//!
//! The table is a pure function so every caller (controller, scheduler,
//! executor) enforces the same rules. Persistence and event publication stay
//! with the store and hub respectively.

pub mod events;
pub mod states;

pub use events::TransitionEvent;
pub use states::{ChunkState, TaskState};

use thiserror::Error;

/// Rejected transition, carrying enough context for a typed controller error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition: {from} cannot accept {event}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub event: &'static str,
}

/// Resolve the target state for `event` applied in `from`.
///
/// Transitions: Pending→Processing (admit), Processing→Paused (graceful
/// pause), Paused→Pending (resume), Processing→Completed,
/// Processing→Failed, and any non-terminal state→Canceled. Terminal states
/// accept nothing.
pub fn target_state(
    from: TaskState,
    event: &TransitionEvent,
) -> Result<TaskState, InvalidTransition> {
    let target = match (from, event) {
        (TaskState::Pending, TransitionEvent::Admit) => TaskState::Processing,
        (TaskState::Processing, TransitionEvent::Pause) => TaskState::Paused,
        (TaskState::Paused, TransitionEvent::Resume) => TaskState::Pending,
        (TaskState::Processing, TransitionEvent::Complete) => TaskState::Completed,
        (TaskState::Processing, TransitionEvent::Fail(_)) => TaskState::Failed,
        (TaskState::Pending, TransitionEvent::Cancel)
        | (TaskState::Processing, TransitionEvent::Cancel)
        | (TaskState::Paused, TransitionEvent::Cancel) => TaskState::Canceled,
        (from, event) => {
            return Err(InvalidTransition {
                from,
                event: event.name(),
            })
        }
    };

    Ok(target)
}
