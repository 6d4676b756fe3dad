use serde::{Deserialize, Serialize};

/// Events that drive task state transitions.
///
/// Admission and completion events come from the scheduler and chunk
/// executor; pause, resume, and cancel originate from the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    /// Scheduler granted a slot
    Admit,
    /// Pause request observed at a chunk boundary
    Pause,
    /// Caller resumed a paused task
    Resume,
    /// All chunks completed
    Complete,
    /// A chunk exhausted its retry budget
    Fail(String),
    /// Caller canceled the task
    Cancel,
}

impl TransitionEvent {
    /// Short name used in audit entries and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admit => "admit",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }
}
