//! Video recording backends.
//!
//! The session drives a backend through four calls and the backend reports
//! its own state changes back through a [`StateNotifier`]. Those reports are
//! stamped on the session clock and end up in
//! `metadata.json` as `record_state_events`.

mod ffmpeg;

use std::path::Path;
use std::sync::mpsc;

use ducktrack_common::clock::SharedClock;
use ducktrack_common::config::{BackendKind, VideoSettings};
use ducktrack_common::error::DucktrackResult;
use ducktrack_event_model::RecordStateTimings;

pub use ffmpeg::{capture_args, FfmpegBackend};

/// Abstract interface for the screen recorder that runs alongside input
/// capture.
pub trait RecordingBackend: Send {
    /// Backend name for logs and metadata.
    fn name(&self) -> &str;

    /// Start recording into `session_dir`. Errors abort session startup.
    fn begin_capture(&mut self, session_dir: &Path, notifier: StateNotifier)
        -> DucktrackResult<()>;

    fn pause_capture(&mut self) -> DucktrackResult<()>;

    fn resume_capture(&mut self) -> DucktrackResult<()>;

    /// Finish the recording and release the recorder. Called at most once
    /// per successful `begin_capture`.
    fn end_capture(&mut self) -> DucktrackResult<()>;
}

/// A backend state change, stamped on the session clock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStateEvent {
    pub state: String,
    pub time_stamp: f64,
}

/// Handed to the backend at start; may be cloned into backend threads.
#[derive(Clone)]
pub struct StateNotifier {
    tx: mpsc::Sender<RecordStateEvent>,
    clock: SharedClock,
}

impl StateNotifier {
    /// Report that the recorder reached `state`. Safe to call from any
    /// thread. Reports sent after the session has finished are discarded.
    pub fn notify(&self, state: &str) {
        let event = RecordStateEvent {
            state: state.to_string(),
            time_stamp: self.clock.now_secs(),
        };
        tracing::debug!(state, time_stamp = event.time_stamp, "Record state changed");
        let _ = self.tx.send(event);
    }
}

/// Receiving side of the notifier channel, owned by the session.
pub struct StateInbox {
    rx: mpsc::Receiver<RecordStateEvent>,
}

impl StateInbox {
    /// Move everything reported so far into `timings`.
    pub fn collect_into(&self, timings: &mut RecordStateTimings) {
        for event in self.rx.try_iter() {
            timings.push(event.state, event.time_stamp);
        }
    }
}

pub fn state_channel(clock: SharedClock) -> (StateNotifier, StateInbox) {
    let (tx, rx) = mpsc::channel();
    (StateNotifier { tx, clock }, StateInbox { rx })
}

/// Records nothing; only reports the state changes it was asked for.
#[derive(Default)]
pub struct NullBackend {
    notifier: Option<StateNotifier>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, state: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(state);
        }
    }
}

impl RecordingBackend for NullBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn begin_capture(
        &mut self,
        _session_dir: &Path,
        notifier: StateNotifier,
    ) -> DucktrackResult<()> {
        self.notifier = Some(notifier);
        self.notify("started");
        Ok(())
    }

    fn pause_capture(&mut self) -> DucktrackResult<()> {
        self.notify("paused");
        Ok(())
    }

    fn resume_capture(&mut self) -> DucktrackResult<()> {
        self.notify("resumed");
        Ok(())
    }

    fn end_capture(&mut self) -> DucktrackResult<()> {
        self.notify("stopped");
        self.notifier = None;
        Ok(())
    }
}

/// Build the backend selected in `settings`.
pub fn backend_for(settings: &VideoSettings) -> Box<dyn RecordingBackend> {
    match settings.backend {
        BackendKind::Ffmpeg => Box::new(FfmpegBackend::new(settings.clone())),
        BackendKind::None => Box::new(NullBackend::new()),
    }
}
