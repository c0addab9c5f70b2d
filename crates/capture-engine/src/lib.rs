//! DuckTrack Capture Engine
//!
//! Coordinates one recording session: the input listeners, the event log
//! writer, and an external video recorder, all driven through a single
//! lifecycle state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                SessionCoordinator                │
//! │  start / pause / resume / stop ──▶ StateMachine  │
//! │                                        │         │
//! │  ┌───────────┐ ┌───────────┐   ┌───────▼───────┐ │
//! │  │ Listeners │ │ Log writer│   │ Recording     │ │
//! │  │ (threads) │ │ (thread)  │   │ backend       │ │
//! │  └─────┬─────┘ └─────┬─────┘   └───────┬───────┘ │
//! │        ▼             ▼                 ▼         │
//! │  ┌──────────────────────────────────────────────┐│
//! │  │        Session directory (disk)              ││
//! │  │  events.jsonl   metadata.json   screen.mp4   ││
//! │  └──────────────────────────────────────────────┘│
//! └──────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod metadata;
pub mod session;
pub mod session_dir;
pub mod state;

pub use backend::{backend_for, RecordingBackend, StateNotifier};
pub use metadata::{JsonMetadataRecorder, MetadataRecorder};
pub use session::{
    ControlReport, FaultKind, SessionConfig, SessionCoordinator, SessionCoordinatorBuilder,
    SessionFault, StopReport,
};
pub use session_dir::SessionDirectory;
pub use state::{SessionState, StateMachine, Transition};
