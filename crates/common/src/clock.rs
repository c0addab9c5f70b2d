//! Clock utilities for stamping records.
//!
//! Every event record and every backend state notification is stamped in
//! the same time domain: fractional seconds from a monotonic epoch fixed
//! once per process. Wall-clock time is only used for naming and metadata.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Source of monotonic timestamps in fractional seconds.
pub trait TimeSource: Send + Sync {
    /// Seconds elapsed since this source's epoch.
    fn now_secs(&self) -> f64;
}

/// Shared handle to a time source.
pub type SharedClock = Arc<dyn TimeSource>;

struct ProcessEpoch {
    instant: Instant,
    wall: String,
}

static PROCESS_EPOCH: OnceLock<ProcessEpoch> = OnceLock::new();

fn process_epoch() -> &'static ProcessEpoch {
    PROCESS_EPOCH.get_or_init(|| ProcessEpoch {
        instant: Instant::now(),
        wall: chrono::Utc::now().to_rfc3339(),
    })
}

/// Process-local high-resolution clock. All instances share one epoch,
/// anchored the first time any of them is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessClock;

impl ProcessClock {
    /// A shareable handle to the process clock.
    pub fn shared() -> SharedClock {
        Arc::new(ProcessClock)
    }

    /// Wall-clock time at the process epoch (RFC 3339).
    pub fn epoch_wall() -> &'static str {
        &process_epoch().wall
    }
}

impl TimeSource for ProcessClock {
    fn now_secs(&self) -> f64 {
        process_epoch().instant.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            bits: AtomicU64::new(start_secs.to_bits()),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: f64) {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + secs).to_bits();
            match self
                .bits
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl TimeSource for ManualClock {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_clock_is_monotonic() {
        let clock = ProcessClock;
        let a = clock.now_secs();
        let b = clock.now_secs();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn test_process_clock_instances_share_epoch() {
        let a = ProcessClock.now_secs();
        let b = ProcessClock::shared().now_secs();
        assert!(b >= a);
        assert!(b - a < 1.0);
        assert!(!ProcessClock::epoch_wall().is_empty());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(0.01);
        assert!((clock.now_secs() - 0.01).abs() < 1e-12);
        clock.advance(0.04);
        assert!((clock.now_secs() - 0.05).abs() < 1e-12);
        clock.set(2.0);
        assert_eq!(clock.now_secs(), 2.0);
    }
}
