//! Session metadata document (`metadata.json`).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// File name of the metadata document inside a session directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Timestamps at which the video backend reported each of its own state
/// changes, keyed by state name in order of first arrival.
///
/// Serialized as a JSON object whose keys keep that order:
/// `{"started": [0.41], "paused": [3.2], "resumed": [5.0], "stopped": [9.7]}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStateTimings {
    entries: Vec<(String, Vec<f64>)>,
}

impl RecordStateTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamp for `state`.
    pub fn push(&mut self, state: impl Into<String>, time_stamp: f64) {
        let state = state.into();
        match self.entries.iter_mut().find(|(name, _)| *name == state) {
            Some((_, stamps)) => stamps.push(time_stamp),
            None => self.entries.push((state, vec![time_stamp])),
        }
    }

    /// Timestamps recorded for `state`.
    pub fn get(&self, state: &str) -> Option<&[f64]> {
        self.entries
            .iter()
            .find(|(name, _)| name == state)
            .map(|(_, stamps)| stamps.as_slice())
    }

    /// State names in order of first arrival.
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.entries
            .iter()
            .map(|(name, stamps)| (name.as_str(), stamps.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for RecordStateTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, stamps) in &self.entries {
            map.serialize_entry(name, stamps)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RecordStateTimings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimingsVisitor;

        impl<'de> Visitor<'de> for TimingsVisitor {
            type Value = RecordStateTimings;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of state name to timestamp list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut timings = RecordStateTimings::new();
                while let Some((name, stamps)) = access.next_entry::<String, Vec<f64>>()? {
                    for stamp in stamps {
                        timings.push(name.clone(), stamp);
                    }
                }
                Ok(timings)
            }
        }

        deserializer.deserialize_map(TimingsVisitor)
    }
}

/// Everything recorded about a session besides its event log and video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Session directory name, e.g. `recording-2026-10-18_14-03-22`.
    pub session: String,

    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,

    pub os: String,
    pub arch: String,

    /// Whether scroll deltas were captured with natural scrolling.
    pub natural_scrolling: bool,

    /// Name of the video backend that ran alongside the event log.
    pub backend: String,

    /// Backend record-state timings, in the event log's time domain.
    #[serde(default)]
    pub record_state_events: RecordStateTimings,
}

impl SessionMetadata {
    /// Metadata for a session starting now on this host.
    pub fn begin(
        session: impl Into<String>,
        backend: impl Into<String>,
        natural_scrolling: bool,
    ) -> Self {
        Self {
            session: session.into(),
            started_at: Utc::now(),
            stopped_at: None,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            natural_scrolling,
            backend: backend.into(),
            record_state_events: RecordStateTimings::new(),
        }
    }

    /// Close the session, attaching the backend timings.
    pub fn finish(&mut self, timings: RecordStateTimings) {
        self.stopped_at = Some(Utc::now());
        self.record_state_events = timings;
    }
}
