//! Recording session state machine.
//!
//! ```text
//! Idle --start--> Recording --pause--> Paused
//!                     ▲                  │
//!                     └─────resume───────┘
//! Recording | Paused --stop--> Stopped
//! ```
//!
//! Every other request is a no-op. The lock only covers the check-and-set;
//! callers do their slow work (backend calls, file I/O) after it is
//! released.

use std::fmt;
use std::time::{Duration, Instant};

use ducktrack_common::clock::SharedClock;
use ducktrack_input_tracker::CaptureGate;
use parking_lot::{Condvar, Mutex};

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session created but not started.
    Idle,
    /// Recording in progress.
    Recording,
    /// Recording paused.
    Paused,
    /// Recording stopped; terminal.
    Stopped,
}

/// A lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
}

impl SessionState {
    /// The state `command` leads to, or `None` if it is a no-op here.
    pub fn next(self, command: Command) -> Option<SessionState> {
        match (self, command) {
            (SessionState::Idle, Command::Start) => Some(SessionState::Recording),
            (SessionState::Recording, Command::Pause) => Some(SessionState::Paused),
            (SessionState::Paused, Command::Resume) => Some(SessionState::Recording),
            (SessionState::Recording | SessionState::Paused, Command::Stop) => {
                Some(SessionState::Stopped)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Outcome of a lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// The state changed. `at` is stamped while the lock is held, so
    /// transition timestamps are ordered the same way the transitions were.
    Applied {
        from: SessionState,
        to: SessionState,
        at: f64,
    },
    /// Nothing changed; `state` is the state the request found.
    NoOp { state: SessionState },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// State after the request.
    pub fn state(&self) -> SessionState {
        match *self {
            Transition::Applied { to, .. } => to,
            Transition::NoOp { state } => state,
        }
    }

    /// When the transition happened, if it did.
    pub fn at(&self) -> Option<f64> {
        match *self {
            Transition::Applied { at, .. } => Some(at),
            Transition::NoOp { .. } => None,
        }
    }
}

/// Thread-safe guard around [`SessionState`].
pub struct StateMachine {
    state: Mutex<SessionState>,
    changed: Condvar,
    clock: SharedClock,
}

impl StateMachine {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            changed: Condvar::new(),
            clock,
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn start(&self) -> Transition {
        self.apply(Command::Start)
    }

    pub fn pause(&self) -> Transition {
        self.apply(Command::Pause)
    }

    pub fn resume(&self) -> Transition {
        self.apply(Command::Resume)
    }

    /// Exactly one caller ever gets `Applied` back from this.
    pub fn stop(&self) -> Transition {
        self.apply(Command::Stop)
    }

    pub fn apply(&self, command: Command) -> Transition {
        let mut state = self.state.lock();
        match state.next(command) {
            Some(to) => {
                let from = *state;
                *state = to;
                let at = self.clock.now_secs();
                self.changed.notify_all();
                Transition::Applied { from, to, at }
            }
            None => Transition::NoOp { state: *state },
        }
    }

    /// Block until the session reaches `Stopped` or `timeout` passes.
    /// Returns whether it stopped.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != SessionState::Stopped {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == SessionState::Stopped;
            }
        }
        true
    }
}

impl CaptureGate for StateMachine {
    fn is_capturing(&self) -> bool {
        self.current() == SessionState::Recording
    }
}
