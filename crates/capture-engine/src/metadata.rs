//! Metadata handoff.
//!
//! The session does not persist backend timings itself; at stop it hands
//! them to a [`MetadataRecorder`].

use std::path::{Path, PathBuf};

use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::{RecordStateTimings, SessionMetadata};

use crate::session_dir::SessionDirectory;

/// Receives session information at start and backend timings at stop.
pub trait MetadataRecorder: Send {
    fn begin(&mut self, session: &SessionDirectory, backend: &str) -> DucktrackResult<()>;

    /// Called once, after the event log is closed.
    fn finish(&mut self, timings: RecordStateTimings) -> DucktrackResult<()>;
}

/// Writes `metadata.json` into the session directory: a first version at
/// start and the complete document at stop.
pub struct JsonMetadataRecorder {
    natural_scrolling: bool,
    current: Option<(PathBuf, SessionMetadata)>,
}

impl JsonMetadataRecorder {
    pub fn new(natural_scrolling: bool) -> Self {
        Self {
            natural_scrolling,
            current: None,
        }
    }

    fn write(path: &Path, metadata: &SessionMetadata) -> DucktrackResult<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(path, json).map_err(|e| {
            DucktrackError::session(format!("failed to write {}: {e}", path.display()))
        })
    }
}

impl MetadataRecorder for JsonMetadataRecorder {
    fn begin(&mut self, session: &SessionDirectory, backend: &str) -> DucktrackResult<()> {
        let metadata = SessionMetadata::begin(session.name(), backend, self.natural_scrolling);
        let path = session.metadata_path();
        Self::write(&path, &metadata)?;
        self.current = Some((path, metadata));
        Ok(())
    }

    fn finish(&mut self, timings: RecordStateTimings) -> DucktrackResult<()> {
        let Some((path, mut metadata)) = self.current.take() else {
            return Err(DucktrackError::session(
                "metadata finish called without begin",
            ));
        };
        metadata.finish(timings);
        Self::write(&path, &metadata)?;
        tracing::debug!(path = %path.display(), "Session metadata written");
        Ok(())
    }
}
