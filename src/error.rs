//! Error types for flowline.
//!
//! Every variant carries a stable string code so that action logs and
//! API layers built on top of this crate can match errors without
//! parsing display text.

use thiserror::Error;

/// Result type alias for flowline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// flowline error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A workflow, action, or condition definition failed validation.
    /// Raised before any execution record exists.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The action type has no registered implementation.
    #[error("Unsupported action type: {0}")]
    UnsupportedAction(String),

    /// The action's parameter payload does not satisfy its type's
    /// requirements. With typed parameters this mostly signals a
    /// registry/definition mismatch rather than bad user input.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A per-action or whole-execution deadline was exceeded. The
    /// in-flight call's outcome is unknown and treated as failure.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A downstream side-effect provider (notification, field update,
    /// webhook endpoint) reported failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Lost the race to claim a pending execution. Not a failure; the
    /// losing worker simply stops.
    #[error("Execution {0} was already claimed")]
    ClaimConflict(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::UnsupportedAction(_) => "UNSUPPORTED_ACTION",
            Error::InvalidParameters(_) => "INVALID_PARAMETERS",
            Error::Timeout(_) => "TIMEOUT",
            Error::Provider(_) => "PROVIDER_ERROR",
            Error::ClaimConflict(_) => "CLAIM_CONFLICT",
            Error::Workflow(_) => "WORKFLOW_ERROR",
            Error::Execution(_) => "EXECUTION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
