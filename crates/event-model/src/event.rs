//! Event record types for the DuckTrack event log.
//!
//! Records are written in append-only JSONL format. Each line carries an
//! `action` discriminator, the action's own fields, and `time_stamp`:
//! seconds on the process-local monotonic clock.
//!
//! ```text
//! {"action":"move","x":10.0,"y":10.0,"time_stamp":0.01}
//! {"action":"click","x":10.0,"y":10.0,"button":"left","pressed":true,"time_stamp":0.02}
//! {"action":"press","key":"a","time_stamp":0.05}
//! ```

use serde::{Deserialize, Serialize};

/// Monotonic timestamp in fractional seconds.
pub type TimestampSecs = f64;

/// A single logged record. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The record payload.
    #[serde(flatten)]
    pub action: InputAction,

    /// Seconds on the process-local monotonic clock.
    pub time_stamp: TimestampSecs,
}

/// Discriminated union of record types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InputAction {
    /// Pointer moved to an absolute screen position.
    Move { x: f64, y: f64 },

    /// Mouse button pressed or released.
    Click {
        x: f64,
        y: f64,
        button: MouseButton,
        pressed: bool,
    },

    /// Scroll wheel or trackpad scroll.
    Scroll { x: f64, y: f64, dx: f64, dy: f64 },

    /// Key pressed.
    #[serde(rename = "press")]
    KeyPress { key: String },

    /// Key released.
    #[serde(rename = "release")]
    KeyRelease { key: String },

    /// Recording paused. Emitted by the lifecycle, not by a listener.
    Pause,

    /// Recording resumed. Emitted by the lifecycle, not by a listener.
    Resume,
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Unknown,
}

impl InputAction {
    /// The wire name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
            Self::KeyPress { .. } => "press",
            Self::KeyRelease { .. } => "release",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }

    /// Whether this is a lifecycle marker rather than user input.
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Pause | Self::Resume)
    }

    pub fn key_press(key: impl Into<String>) -> Self {
        Self::KeyPress { key: key.into() }
    }

    pub fn key_release(key: impl Into<String>) -> Self {
        Self::KeyRelease { key: key.into() }
    }
}

impl EventRecord {
    pub fn new(action: InputAction, time_stamp: TimestampSecs) -> Self {
        Self { action, time_stamp }
    }

    /// Create a pointer move record.
    pub fn pointer_move(time_stamp: TimestampSecs, x: f64, y: f64) -> Self {
        Self::new(InputAction::Move { x, y }, time_stamp)
    }

    /// Create a click record.
    pub fn click(
        time_stamp: TimestampSecs,
        x: f64,
        y: f64,
        button: MouseButton,
        pressed: bool,
    ) -> Self {
        Self::new(
            InputAction::Click {
                x,
                y,
                button,
                pressed,
            },
            time_stamp,
        )
    }

    /// Create a key press record.
    pub fn key_press(time_stamp: TimestampSecs, key: impl Into<String>) -> Self {
        Self::new(InputAction::key_press(key), time_stamp)
    }

    /// Extract pointer position if this record carries one.
    pub fn pointer_position(&self) -> Option<(f64, f64)> {
        match &self.action {
            InputAction::Move { x, y }
            | InputAction::Click { x, y, .. }
            | InputAction::Scroll { x, y, .. } => Some((*x, *y)),
            _ => None,
        }
    }

    /// Serialize as a single JSONL line, without the trailing newline.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse records from JSONL content (one JSON object per line).
pub fn parse_events(jsonl: &str) -> Result<Vec<EventRecord>, serde_json::Error> {
    jsonl
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}
