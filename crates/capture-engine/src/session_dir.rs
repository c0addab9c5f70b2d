//! Per-session output directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::log::EVENT_LOG_FILE;
use ducktrack_event_model::metadata::METADATA_FILE;

/// Collision suffixes tried before allocation gives up.
const MAX_SUFFIX: u32 = 999;

/// A freshly created `recording-YYYY-MM-DD_HH-MM-SS` directory.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    path: PathBuf,
    name: String,
}

impl SessionDirectory {
    /// Create a new, uniquely named session directory under `root`.
    ///
    /// The directory itself is created with `create_dir`, so two sessions
    /// started in the same second get `-1`, `-2`, ... suffixes instead of
    /// sharing a directory.
    pub fn allocate(root: &Path) -> DucktrackResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            DucktrackError::session(format!(
                "cannot create recordings directory {}: {e}",
                root.display()
            ))
        })?;

        let base = format!("recording-{}", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        for suffix in 0..=MAX_SUFFIX {
            let name = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}-{suffix}")
            };
            let path = root.join(&name);
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Allocated session directory");
                    return Ok(Self { path, name });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(DucktrackError::session(format!(
                        "cannot create session directory {}: {e}",
                        path.display()
                    )));
                }
            }
        }

        Err(DucktrackError::session(format!(
            "no free session directory name for {base} under {}",
            root.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.path.join(EVENT_LOG_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    /// Remove the directory after a failed start, if nothing was recorded
    /// into it. An empty event log counts as nothing. Returns whether the
    /// directory was removed.
    pub fn discard_if_unused(&self) -> bool {
        let log = self.event_log_path();
        if std::fs::metadata(&log).is_ok_and(|m| m.len() == 0) {
            let _ = std::fs::remove_file(&log);
        }
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed unused session directory");
                true
            }
            Err(e) => {
                tracing::debug!(
                    path = %self.path.display(),
                    error = %e,
                    "Keeping session directory"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_creates_timestamped_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = SessionDirectory::allocate(&root.path().join("nested/recordings")).unwrap();

        assert!(dir.path().is_dir());
        assert!(dir.name().starts_with("recording-"));
        assert_eq!(dir.name().len(), "recording-2026-01-01_00-00-00".len());
        assert_eq!(dir.event_log_path(), dir.path().join("events.jsonl"));
        assert_eq!(dir.metadata_path(), dir.path().join("metadata.json"));
    }

    #[test]
    fn test_same_second_allocations_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let dirs: Vec<_> = (0..3)
            .map(|_| SessionDirectory::allocate(root.path()).unwrap())
            .collect();

        let mut names: Vec<_> = dirs.iter().map(|d| d.name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_discard_removes_only_unused_directories() {
        let root = tempfile::tempdir().unwrap();

        let empty = SessionDirectory::allocate(root.path()).unwrap();
        std::fs::File::create(empty.event_log_path()).unwrap();
        assert!(empty.discard_if_unused());
        assert!(!empty.path().exists());

        let used = SessionDirectory::allocate(root.path()).unwrap();
        std::fs::write(used.event_log_path(), "{}\n").unwrap();
        assert!(!used.discard_if_unused());
        assert!(used.event_log_path().exists());
    }
}
