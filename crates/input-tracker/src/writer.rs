//! Append-only event log writer and the consumer loop that feeds it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::EventRecord;
use tracing::Dispatch;

use crate::queue::{Dequeued, EventReceiver};
use crate::stats::CaptureStats;

/// Writes records to a JSONL file in append mode, one flushed line per
/// record.
///
/// Each line goes to the sink in a single `write_all`, unbuffered, so a
/// failed write cannot resurface later as part of another record.
pub struct EventLogWriter {
    sink: Box<dyn Write + Send>,
    path: PathBuf,
    events_written: u64,
}

impl EventLogWriter {
    /// Open (or create) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> DucktrackResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                DucktrackError::event_log(format!("Failed to open {}: {e}", path.display()))
            })?;

        Ok(Self::from_sink(path, file))
    }

    /// Write to an arbitrary sink. `path` only names it in diagnostics.
    pub fn from_sink(path: impl Into<PathBuf>, sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            path: path.into(),
            events_written: 0,
        }
    }

    /// Append a single record and flush it.
    ///
    /// Input rates are bounded by a human at the keyboard, so every line is
    /// pushed to the OS before returning.
    pub fn write_record(&mut self, record: &EventRecord) -> DucktrackResult<()> {
        let mut line = record.to_json_line()?;
        line.push('\n');
        self.sink
            .write_all(line.as_bytes())
            .map_err(|e| DucktrackError::event_log(format!("Failed to write event: {e}")))?;
        self.flush()?;
        self.events_written += 1;
        Ok(())
    }

    /// Flush the sink.
    pub fn flush(&mut self) -> DucktrackResult<()> {
        self.sink
            .flush()
            .map_err(|e| DucktrackError::event_log(format!("Failed to flush events: {e}")))
    }

    /// Number of records written by this writer.
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Path to the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the consumer loop on a dedicated thread.
    ///
    /// The loop waits at most `poll_interval` per dequeue and ends once every
    /// sender has been dropped and the remaining records are written. The
    /// file handle is released when the thread ends, whether it returns or
    /// unwinds.
    pub fn spawn(
        self,
        queue: EventReceiver,
        stats: Arc<CaptureStats>,
        poll_interval: Duration,
        dispatch: Dispatch,
    ) -> DucktrackResult<WriterHandle> {
        let path = self.path.clone();
        let join = thread::Builder::new()
            .name("ducktrack-writer".to_string())
            .spawn(move || {
                let _dispatch = tracing::dispatcher::set_default(&dispatch);
                self.drain_until_closed(queue, &stats, poll_interval)
            })
            .map_err(|e| DucktrackError::startup(format!("failed to spawn log writer: {e}")))?;

        Ok(WriterHandle { join, path })
    }

    fn drain_until_closed(
        mut self,
        queue: EventReceiver,
        stats: &CaptureStats,
        poll_interval: Duration,
    ) -> u64 {
        tracing::info!(path = %self.path.display(), "Event log writer started");

        loop {
            match queue.dequeue(poll_interval) {
                Dequeued::Record(record) => {
                    // A failed write drops the record; nothing is buffered
                    // for retry.
                    match self.write_record(&record) {
                        Ok(()) => stats.record_written(),
                        Err(e) => {
                            stats.record_write_failure();
                            tracing::warn!(
                                error = %e,
                                action = record.action.name(),
                                "Dropped event"
                            );
                        }
                    }
                }
                Dequeued::Empty => continue,
                Dequeued::Closed => break,
            }
        }

        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Final event log flush failed");
        }
        tracing::info!(events = self.events_written, "Event log writer stopped");
        self.events_written
    }
}

impl Drop for EventLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// The running consumer thread.
pub struct WriterHandle {
    join: JoinHandle<u64>,
    path: PathBuf,
}

impl WriterHandle {
    /// Wait for the writer to drain and return how many records it wrote.
    pub fn join(self) -> DucktrackResult<u64> {
        self.join.join().map_err(|_| {
            DucktrackError::event_log(format!(
                "writer for {} panicked",
                self.path.display()
            ))
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
