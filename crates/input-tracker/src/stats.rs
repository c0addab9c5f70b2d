//! Counters shared by listeners and the log writer.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live capture counters. All updates are relaxed; readers only need a
/// recent view, not a consistent cut.
#[derive(Debug, Default)]
pub struct CaptureStats {
    accepted: AtomicU64,
    gated_out: AtomicU64,
    written: AtomicU64,
    write_failures: AtomicU64,
    listener_restarts: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records a listener put on the queue.
    pub accepted: u64,
    /// Inputs dropped because recording was paused or not running.
    pub gated_out: u64,
    /// Records appended to the event log.
    pub written: u64,
    /// Records lost to log I/O errors.
    pub write_failures: u64,
    pub listener_restarts: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gated_out(&self) {
        self.gated_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_restart(&self) {
        self.listener_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            gated_out: self.gated_out.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            listener_restarts: self.listener_restarts.load(Ordering::Relaxed),
        }
    }
}
