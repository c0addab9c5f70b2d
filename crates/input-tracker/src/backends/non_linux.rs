//! Input sources for platforms without a native backend yet.

use ducktrack_common::error::{DucktrackError, DucktrackResult};

use crate::{InputSource, InputSourceFactory, ListenerKind};

/// Always fails to register, so session startup reports the gap instead of
/// recording a video with an empty event log.
pub struct UnsupportedFactory {
    kind: ListenerKind,
}

impl UnsupportedFactory {
    pub fn new(kind: ListenerKind) -> Self {
        Self { kind }
    }
}

impl InputSourceFactory for UnsupportedFactory {
    fn kind(&self) -> ListenerKind {
        self.kind
    }

    fn open(&self) -> DucktrackResult<Box<dyn InputSource>> {
        Err(DucktrackError::unsupported(format!(
            "{} capture is not implemented on {}",
            self.kind,
            std::env::consts::OS
        )))
    }
}
