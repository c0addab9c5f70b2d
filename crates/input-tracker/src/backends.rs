//! Input source implementations.
//!
//! Each backend provides a different way to capture pointer and keyboard
//! input. [`detect_sources`] picks the best pair for the current system.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use ducktrack_common::config::CaptureSettings;
use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::InputAction;
use parking_lot::Mutex;

use crate::{InputSource, InputSourceFactory, ListenerKind};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod non_linux;

#[cfg(target_os = "linux")]
pub use self::linux::{EvdevKeyboardFactory, EvdevPointerFactory};
#[cfg(not(target_os = "linux"))]
pub use self::non_linux::UnsupportedFactory;

/// The pointer and keyboard factories a session listens with.
pub struct SourceSet {
    pub pointer: Arc<dyn InputSourceFactory>,
    pub keyboard: Arc<dyn InputSourceFactory>,
}

/// Detect the best available input sources for the current system.
///
/// Nothing is opened here; availability problems surface when the session
/// registers its listeners.
#[cfg(target_os = "linux")]
pub fn detect_sources(settings: &CaptureSettings) -> SourceSet {
    tracing::debug!("Using evdev input sources");
    SourceSet {
        pointer: Arc::new(EvdevPointerFactory::new(settings)),
        keyboard: Arc::new(EvdevKeyboardFactory::new()),
    }
}

/// Detect the best available input sources for the current system.
#[cfg(not(target_os = "linux"))]
pub fn detect_sources(_settings: &CaptureSettings) -> SourceSet {
    tracing::warn!("Input capture sources for this platform are not implemented yet");
    SourceSet {
        pointer: Arc::new(UnsupportedFactory::new(ListenerKind::Pointer)),
        keyboard: Arc::new(UnsupportedFactory::new(ListenerKind::Keyboard)),
    }
}

enum SyntheticPoll {
    Action(InputAction),
    Fail(String),
}

struct SyntheticShared {
    fail_open: Mutex<Option<String>>,
    opens: AtomicU32,
}

/// Test and demo input: actions are pushed through a channel and come out
/// of the listener exactly as a device would produce them.
///
/// Failures can be injected at the next poll or at the next (re)open.
pub struct SyntheticInput {
    tx: mpsc::Sender<SyntheticPoll>,
    shared: Arc<SyntheticShared>,
}

/// Factory side of [`SyntheticInput`]. Reopened sources keep reading the
/// same channel, so injected input survives a listener restart.
pub struct SyntheticSourceFactory {
    kind: ListenerKind,
    rx: Arc<Mutex<mpsc::Receiver<SyntheticPoll>>>,
    shared: Arc<SyntheticShared>,
}

struct SyntheticSource {
    name: String,
    rx: Arc<Mutex<mpsc::Receiver<SyntheticPoll>>>,
}

impl SyntheticInput {
    pub fn new(kind: ListenerKind) -> (Self, SyntheticSourceFactory) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(SyntheticShared {
            fail_open: Mutex::new(None),
            opens: AtomicU32::new(0),
        });
        let factory = SyntheticSourceFactory {
            kind,
            rx: Arc::new(Mutex::new(rx)),
            shared: shared.clone(),
        };
        (Self { tx, shared }, factory)
    }

    /// Deliver an input action to the listener.
    pub fn send(&self, action: InputAction) {
        let _ = self.tx.send(SyntheticPoll::Action(action));
    }

    /// Make the poll after all queued actions fail with `message`.
    pub fn fail_next_poll(&self, message: impl Into<String>) {
        let _ = self.tx.send(SyntheticPoll::Fail(message.into()));
    }

    /// Make every subsequent open fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        *self.shared.fail_open.lock() = Some(message.into());
    }

    /// How many sources the factory has opened successfully.
    pub fn opens(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }
}

impl InputSourceFactory for SyntheticSourceFactory {
    fn kind(&self) -> ListenerKind {
        self.kind
    }

    fn open(&self) -> DucktrackResult<Box<dyn InputSource>> {
        if let Some(message) = self.shared.fail_open.lock().clone() {
            return Err(DucktrackError::listener(message));
        }
        let generation = self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            name: format!("synthetic-{}#{generation}", self.kind),
            rx: self.rx.clone(),
        }))
    }
}

impl InputSource for SyntheticSource {
    fn poll(&mut self) -> DucktrackResult<Option<InputAction>> {
        match self.rx.lock().try_recv() {
            Ok(SyntheticPoll::Action(action)) => Ok(Some(action)),
            Ok(SyntheticPoll::Fail(message)) => Err(DucktrackError::listener(message)),
            Err(_) => Ok(None),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Normalize an evdev-style key name (`KEY_LEFTSHIFT`) to the short
/// lowercase form used in the log (`leftshift`). Single characters stay as
/// they are (`KEY_A` becomes `a`).
pub fn normalize_key_name(raw: &str) -> String {
    raw.strip_prefix("KEY_").unwrap_or(raw).to_ascii_lowercase()
}
