//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Workflow validation failed for {workflow}: {}", .problems.join("; "))]
    WorkflowValidation {
        workflow: String,
        problems: Vec<String>,
    },

    // Event errors
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    // Action errors
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Invalid action parameters for {action}: {message}")]
    InvalidActionParams { action: String, message: String },

    #[error("Step failed with exit code {exit_code}: {message}")]
    StepFailed { exit_code: i32, message: String },

    #[error("Step timeout after {seconds} seconds")]
    StepTimeout { seconds: u64 },

    // Artifact errors
    #[error("Build output missing: {0}")]
    BuildOutputMissing(String),

    #[error("Archive failed: {0}")]
    Archive(String),

    // Release errors
    #[error("Release asset conflict: {name} already attached to {tag} with different content")]
    ReleaseAssetConflict { tag: String, name: String },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
