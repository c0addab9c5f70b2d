//! DuckTrack Common Utilities
//!
//! Shared infrastructure for all DuckTrack crates:
//! - Error types and result aliases
//! - The process-local monotonic clock that stamps every record
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
