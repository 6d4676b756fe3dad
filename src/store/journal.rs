use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::identity::TaskId;
use crate::models::TaskRecord;

/// File-backed journal: one JSON document per task.
///
/// Writes go to a temp file first and are renamed into place, so a record's
/// (state, checkpoint) pair is always replaced as a single unit and a crash
/// mid-write leaves the previous version intact.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn write(&self, record: &TaskRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let target = self.path(record.id);
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    pub fn remove(&self, id: TaskId) -> Result<()> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every record in the journal directory.
    ///
    /// Unreadable entries are logged and skipped rather than failing the
    /// whole recovery; leftover temp files from interrupted writes are
    /// ignored.
    pub fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<TaskRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable journal entry");
                }
            }
        }
        Ok(records)
    }
}
