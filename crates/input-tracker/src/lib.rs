//! DuckTrack Input Tracker
//!
//! Turns OS input notifications into timestamped [`EventRecord`]s and gets
//! them onto disk:
//!
//! ```text
//!  pointer listener ──┐
//!                     ├──▶ EventQueue ──▶ log writer ──▶ events.jsonl
//! keyboard listener ──┘        ▲
//!                              └── pause/resume markers
//! ```
//!
//! Listeners poll an [`InputSource`] on their own thread and only enqueue
//! while the [`CaptureGate`] reports that recording is live. The writer is
//! the single consumer and exits once every producer has hung up and the
//! queue is empty.
//!
//! Input sources are pluggable:
//!
//! - **Evdev:** direct device access on Linux (requires the `input` group)
//! - **Synthetic:** channel-fed, for tests and scripted demos

pub mod backends;
pub mod listener;
pub mod queue;
pub mod stats;
pub mod writer;

use std::fmt;

use ducktrack_common::error::DucktrackResult;
use ducktrack_event_model::InputAction;

pub use ducktrack_event_model::EventRecord;
pub use listener::{ListenerContext, ListenerExit, ListenerHandle};
pub use queue::{event_queue, Dequeued, EventReceiver, EventSender};
pub use stats::{CaptureStats, StatsSnapshot};
pub use writer::{EventLogWriter, WriterHandle};

/// A source of raw input, polled from a listener thread.
pub trait InputSource: Send {
    /// Poll for the next input action. Returns `None` if nothing is pending.
    fn poll(&mut self) -> DucktrackResult<Option<InputAction>>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Opens input sources. Called once when the session starts and again if
/// the listener has to restart after a failure.
pub trait InputSourceFactory: Send + Sync {
    /// Which listener this factory feeds.
    fn kind(&self) -> ListenerKind;

    /// Register with the OS and return a ready source.
    fn open(&self) -> DucktrackResult<Box<dyn InputSource>>;
}

/// Decides whether listeners may enqueue right now.
pub trait CaptureGate: Send + Sync {
    fn is_capturing(&self) -> bool;
}

/// The two listener roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Pointer,
    Keyboard,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pointer => f.write_str("pointer"),
            Self::Keyboard => f.write_str("keyboard"),
        }
    }
}
