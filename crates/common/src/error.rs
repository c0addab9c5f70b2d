//! Error types shared across DuckTrack crates.

use std::path::PathBuf;

/// Top-level error type for DuckTrack operations.
#[derive(Debug, thiserror::Error)]
pub enum DucktrackError {
    /// Session could not be brought up; nothing is left running.
    #[error("Startup failed: {message}")]
    Startup { message: String },

    #[error("Input listener error: {message}")]
    Listener { message: String },

    #[error("Recording backend error: {message}")]
    Backend { message: String },

    #[error("Event log error: {message}")]
    EventLog { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DucktrackError.
pub type DucktrackResult<T> = Result<T, DucktrackError>;

impl DucktrackError {
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup {
            message: msg.into(),
        }
    }

    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    pub fn event_log(msg: impl Into<String>) -> Self {
        Self::EventLog {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Wrap any error as a startup failure, keeping its message.
    pub fn into_startup(self) -> Self {
        match self {
            Self::Startup { .. } => self,
            other => Self::startup(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_startup_keeps_message() {
        let err = DucktrackError::listener("no keyboard device").into_startup();
        assert!(matches!(err, DucktrackError::Startup { .. }));
        assert_eq!(
            err.to_string(),
            "Startup failed: Input listener error: no keyboard device"
        );
    }

    #[test]
    fn test_startup_is_not_double_wrapped() {
        let err = DucktrackError::startup("boom").into_startup();
        assert_eq!(err.to_string(), "Startup failed: boom");
    }
}
