//! Error types for thinscan.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for thinscan operations.
pub type Result<T> = std::result::Result<T, ThinscanError>;

/// The teardown step a cleanup failure stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    Unmount,
    RemoveDevice,
    RemoveDirectory,
    RemoveContainer,
}

impl CleanupStep {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStep::Unmount => "unmount",
            CleanupStep::RemoveDevice => "remove_device",
            CleanupStep::RemoveDirectory => "remove_directory",
            CleanupStep::RemoveContainer => "remove_container",
        }
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for thinscan.
#[derive(Error, Debug)]
pub enum ThinscanError {
    // Resolution errors
    #[error("Unable to associate {input} with any image or container")]
    NotFound { input: String },

    #[error("Ambiguous identifier {input}: {reason}")]
    AmbiguousIdentifier { input: String, reason: String },

    // Mount lifecycle errors
    #[error("Mount failed: {reason}{}", format_diagnostic(.diagnostic))]
    MountError { reason: String, diagnostic: String },

    #[error("Cleanup failed at {step}: {reason}{}", format_diagnostic(.diagnostic))]
    CleanupError { step: CleanupStep, reason: String, diagnostic: String },

    // Orchestration errors
    #[error("Unable to resolve target {target}: {source}")]
    ResolutionError {
        target: String,
        #[source]
        source: Box<ThinscanError>,
    },

    #[error("Scan not completed. Cannot scan the dead container {container_id}")]
    DeadTarget { container_id: String },

    #[error("{message}")]
    NoTargets { message: String },

    // Collaborator errors
    #[error("Container runtime error: {reason}")]
    Runtime { reason: String },

    #[error("Invalid thin device metadata for {id}: {reason}")]
    Metadata { id: String, reason: String },

    #[error("Command {command} timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_diagnostic(diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" ({})", trimmed)
    }
}

impl ThinscanError {
    /// Create a mount error carrying a tool's stderr.
    pub fn mount_with(reason: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::MountError { reason: reason.into(), diagnostic: diagnostic.into() }
    }

    /// Create a cleanup error for a given step.
    pub fn cleanup(
        step: CleanupStep,
        reason: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self::CleanupError { step, reason: reason.into(), diagnostic: diagnostic.into() }
    }

    /// Create a runtime error.
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime { reason: reason.into() }
    }

    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ThinscanError::NotFound { .. } => "not_found",
            ThinscanError::AmbiguousIdentifier { .. } => "ambiguous_identifier",
            ThinscanError::MountError { .. } => "mount_error",
            ThinscanError::CleanupError { .. } => "cleanup_error",
            ThinscanError::ResolutionError { .. } => "resolution_error",
            ThinscanError::DeadTarget { .. } => "dead_target",
            ThinscanError::NoTargets { .. } => "no_targets",
            ThinscanError::Runtime { .. } => "runtime",
            ThinscanError::Metadata { .. } => "metadata",
            ThinscanError::CommandTimeout { .. } => "command_timeout",
            ThinscanError::InvalidConfig { .. } => "invalid_config",
            ThinscanError::IoError { .. } => "io",
            ThinscanError::Internal(_) => "internal",
            ThinscanError::Other(_) => "other",
        }
    }

    /// Structured form returned to API-style callers instead of exiting.
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport { kind: self.kind().to_string(), error: self.to_string() }
    }
}

/// Serializable error object for API-style invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub error: String,
}
