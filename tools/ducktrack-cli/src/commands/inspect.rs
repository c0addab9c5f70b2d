//! Summarize a recorded session.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ducktrack_common::error::DucktrackResult;
use ducktrack_event_model::metadata::METADATA_FILE;
use ducktrack_event_model::{EventLogReader, EventRecord, InputAction, SessionMetadata};

/// Aggregate view of one event log.
#[derive(Debug, Default, PartialEq)]
pub struct LogSummary {
    pub counts: BTreeMap<&'static str, u64>,
    pub first: Option<f64>,
    pub last: Option<f64>,
    /// Closed pause intervals; an unmatched pause ends at the last record.
    pub paused: Vec<(f64, f64)>,
    pub malformed: u64,
}

impl LogSummary {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn paused_secs(&self) -> f64 {
        self.paused.iter().map(|(from, to)| to - from).sum()
    }
}

pub fn summarize(records: impl IntoIterator<Item = DucktrackResult<EventRecord>>) -> LogSummary {
    let mut summary = LogSummary::default();
    let mut pause_started = None;

    for item in records {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed record");
                summary.malformed += 1;
                continue;
            }
        };

        *summary.counts.entry(record.action.name()).or_insert(0) += 1;
        let t = record.time_stamp;
        summary.first = Some(summary.first.map_or(t, |first: f64| first.min(t)));
        summary.last = Some(summary.last.map_or(t, |last: f64| last.max(t)));

        match record.action {
            InputAction::Pause => {
                pause_started.get_or_insert(t);
            }
            InputAction::Resume => {
                if let Some(from) = pause_started.take() {
                    summary.paused.push((from, t));
                }
            }
            _ => {}
        }
    }

    if let (Some(from), Some(last)) = (pause_started, summary.last) {
        summary.paused.push((from, last));
    }
    summary
}

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let reader = EventLogReader::open_session(&path)
        .map_err(|e| anyhow::anyhow!("Failed to open event log: {e}"))?;
    let summary = summarize(reader);

    println!("Session: {}", path.display());
    println!();

    println!("Events: {}", summary.total());
    for (action, count) in &summary.counts {
        println!("  {action}: {count}");
    }
    if summary.malformed > 0 {
        println!("  [WARN] malformed lines: {}", summary.malformed);
    }
    if let (Some(first), Some(last)) = (summary.first, summary.last) {
        println!(
            "  Span: {first:.3}s .. {last:.3}s ({:.3}s)",
            last - first
        );
    }
    if !summary.paused.is_empty() {
        println!(
            "  Paused {} time(s), {:.3}s total",
            summary.paused.len(),
            summary.paused_secs()
        );
        for (from, to) in &summary.paused {
            println!("    {from:.3}s .. {to:.3}s");
        }
    }
    println!();

    let metadata_path = path.join(METADATA_FILE);
    match std::fs::read_to_string(&metadata_path) {
        Ok(json) => {
            let metadata: SessionMetadata = serde_json::from_str(&json)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", metadata_path.display()))?;
            println!("Metadata:");
            println!("  Started: {}", metadata.started_at);
            match metadata.stopped_at {
                Some(stopped) => println!("  Stopped: {stopped}"),
                None => println!("  Stopped: (not recorded; session may have crashed)"),
            }
            println!("  Host: {} / {}", metadata.os, metadata.arch);
            println!("  Video backend: {}", metadata.backend);
            println!("  Natural scrolling: {}", metadata.natural_scrolling);
            for (state, stamps) in metadata.record_state_events.iter() {
                let stamps: Vec<String> = stamps.iter().map(|t| format!("{t:.3}")).collect();
                println!("  Video {state}: {}", stamps.join(", "));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("Metadata: none");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
