//! Error types for the model lifecycle core

use thiserror::Error;

/// Coarse classification used by request adapters to pick a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from the caller; never retried
    Validation,
    /// No production model or artifact for the requested key
    NotFound,
    /// Anything else
    Unexpected,
}

/// Errors raised by the preprocessor, model adapters, store and registry
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No overlap between predictions and actual values")]
    NoOverlap,

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Model has not been trained; call train() first")]
    NotTrained,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt artifact {path}: {reason}")]
    CorruptArtifact { path: String, reason: String },

    #[error("Concurrent update conflict for model '{0}'")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForecastError {
    /// Classify the error for the caller-facing adapters
    pub fn class(&self) -> ErrorClass {
        match self {
            ForecastError::EmptyInput(_)
            | ForecastError::Schema(_)
            | ForecastError::Parse(_)
            | ForecastError::InvalidArgument(_)
            | ForecastError::InsufficientData(_)
            | ForecastError::NoOverlap
            | ForecastError::InvalidIndex(_) => ErrorClass::Validation,
            ForecastError::NotFound(_) => ErrorClass::NotFound,
            ForecastError::NotTrained
            | ForecastError::CorruptArtifact { .. }
            | ForecastError::Conflict(_)
            | ForecastError::Io(_)
            | ForecastError::Serialization(_)
            | ForecastError::Internal(_) => ErrorClass::Unexpected,
        }
    }

    /// Short machine-readable code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            ForecastError::EmptyInput(_) => "empty_input",
            ForecastError::Schema(_) => "schema_error",
            ForecastError::Parse(_) => "parse_error",
            ForecastError::InvalidArgument(_) => "invalid_argument",
            ForecastError::InsufficientData(_) => "insufficient_data",
            ForecastError::NoOverlap => "no_overlap",
            ForecastError::InvalidIndex(_) => "invalid_index",
            ForecastError::NotTrained => "not_trained",
            ForecastError::NotFound(_) => "not_found",
            ForecastError::CorruptArtifact { .. } => "corrupt_artifact",
            ForecastError::Conflict(_) => "conflict",
            ForecastError::Io(_) => "io_error",
            ForecastError::Serialization(_) => "serialization_error",
            ForecastError::Internal(_) => "internal_error",
        }
    }
}

/// Result type for the core
pub type Result<T> = std::result::Result<T, ForecastError>;
