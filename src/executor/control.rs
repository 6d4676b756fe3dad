use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::identity::TaskId;

/// Cooperative control flags for one running task.
///
/// Observed by the chunk loop at chunk boundaries only; an in-flight chunk
/// always runs to completion or to its own timeout. This is what keeps
/// checkpoints consistent.
#[derive(Debug, Default)]
pub struct RunFlags {
    pause: AtomicBool,
    cancel: AtomicBool,
}

impl RunFlags {
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Flags for every task currently holding a worker slot.
///
/// The scheduler registers an entry before dispatch and the worker removes
/// it when the run ends, so the controller can always reach a running task.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    inner: DashMap<TaskId, Arc<RunFlags>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: TaskId) -> Arc<RunFlags> {
        let flags = Arc::new(RunFlags::default());
        self.inner.insert(id, flags.clone());
        flags
    }

    pub fn get(&self, id: TaskId) -> Option<Arc<RunFlags>> {
        self.inner.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: TaskId) {
        self.inner.remove(&id);
    }
}
