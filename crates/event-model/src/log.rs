//! Lazy reader for `events.jsonl`.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ducktrack_common::error::{DucktrackError, DucktrackResult};

use crate::event::EventRecord;

/// File name of the event log inside a session directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Iterates the records of an event log one line at a time.
///
/// Blank lines are skipped. A malformed line yields an `Err` item and
/// iteration continues with the next line. [`EventLogReader::rewind`]
/// restarts from the first record.
pub struct EventLogReader {
    reader: BufReader<File>,
    path: PathBuf,
    line: String,
    line_number: u64,
}

impl EventLogReader {
    /// Open the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> DucktrackResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DucktrackError::FileNotFound { path: path.clone() },
            _ => DucktrackError::Io(e),
        })?;

        Ok(Self {
            reader: BufReader::new(file),
            path,
            line: String::new(),
            line_number: 0,
        })
    }

    /// Open `events.jsonl` inside a session directory.
    pub fn open_session(session_dir: impl AsRef<Path>) -> DucktrackResult<Self> {
        Self::open(session_dir.as_ref().join(EVENT_LOG_FILE))
    }

    /// Restart iteration from the beginning of the file.
    pub fn rewind(&mut self) -> DucktrackResult<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.line_number = 0;
        Ok(())
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for EventLogReader {
    type Item = DucktrackResult<EventRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(trimmed).map_err(|e| {
                        DucktrackError::event_log(format!(
                            "{}:{}: {e}",
                            self.path.display(),
                            self.line_number
                        ))
                    }));
                }
                Err(e) => return Some(Err(DucktrackError::Io(e))),
            }
        }
    }
}
