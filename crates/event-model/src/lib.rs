//! DuckTrack Event Model
//!
//! The on-disk shape of a recording session:
//! - **Event records:** one self-describing JSON object per line in
//!   `events.jsonl`, discriminated by `action` and stamped with `time_stamp`
//! - **Event log reader:** lazy, restartable iteration over that file
//! - **Session metadata:** the `metadata.json` document, including the video
//!   backend's record-state timings used to align video and event time

pub mod event;
pub mod log;
pub mod metadata;

pub use event::{EventRecord, InputAction, MouseButton};
pub use log::EventLogReader;
pub use metadata::{RecordStateTimings, SessionMetadata};
