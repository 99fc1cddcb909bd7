//! Process error types.
//!
//! Platform failures are translated at the boundary of the operation that
//! triggered them into a small taxonomy, keeping the original failure as
//! the error source for diagnostics.

use std::io;

/// Boxed cause for configuration failures, which can originate from more
/// than one underlying error type (I/O, TOML parsing).
type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by process configuration and lifecycle operations.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    /// The supplied configuration is structurally invalid. No process was
    /// spawned and no OS resource was acquired.
    #[error("invalid process configuration: {reason}")]
    Configuration {
        reason: String,
        #[source]
        source: Option<Cause>,
    },

    /// The operating system could not create the process.
    #[error("failed to launch process: {reason}")]
    Launch {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The operating system refused or failed to terminate the process.
    #[error("failed to terminate process: {reason}")]
    Control {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The operating system failed while waiting for the process. An
    /// ordinary timeout expiry is not an error and is never reported here.
    #[error("failed while waiting for process: {reason}")]
    Wait {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The exit code was queried before the process terminated.
    #[error("process has not exited")]
    NotExited,
}

impl ProcessError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn config_with(reason: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap a spawn failure, classifying common I/O error kinds.
    pub(crate) fn launch(source: io::Error) -> Self {
        let reason = match source.kind() {
            io::ErrorKind::NotFound => "executable not found",
            io::ErrorKind::PermissionDenied => "permission denied",
            _ => "operating system failure",
        };
        Self::Launch {
            reason: reason.to_string(),
            source: Some(source),
        }
    }

    pub(crate) fn launch_reason(reason: impl Into<String>) -> Self {
        Self::Launch {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn control(source: io::Error) -> Self {
        Self::Control {
            reason: "operating system failure".to_string(),
            source: Some(source),
        }
    }

    pub(crate) fn control_reason(reason: impl Into<String>) -> Self {
        Self::Control {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn wait(source: io::Error) -> Self {
        Self::Wait {
            reason: "operating system failure".to_string(),
            source: Some(source),
        }
    }

    pub(crate) fn wait_reason(reason: impl Into<String>) -> Self {
        Self::Wait {
            reason: reason.into(),
            source: None,
        }
    }
}
