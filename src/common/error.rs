use crate::common::types::Stage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Run-level errors. Anything surfacing here aborts the whole run.
#[derive(Error, Debug)]
pub enum NormalizerError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No CIK*.json documents found in {}", .0.display())]
    NoDocuments(PathBuf),

    #[error("Output already exists at {} (use --force to replace it)", .0.display())]
    OutputExists(PathBuf),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Aborted by fail-fast in {document} during {stage}: {message}")]
    FailFast {
        document: String,
        stage: Stage,
        message: String,
    },

    #[error("Run cancelled before completion")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Per-document failures. Recorded in the manifest and skipped in normal mode.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("unrecoverable truncation: {0}")]
    Unrecoverable(#[from] RepairError),

    #[error("invalid document: {0}")]
    Invalid(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker panicked: {0}")]
    WorkerPanic(String),
}

impl DocumentError {
    /// Stage at which the failure was detected
    pub fn stage(&self) -> Stage {
        match self {
            DocumentError::Unreadable(_) => Stage::Scan,
            DocumentError::Unrecoverable(_) => Stage::Repair,
            DocumentError::Invalid(_) => Stage::Flatten,
            DocumentError::Timeout(_) | DocumentError::WorkerPanic(_) => Stage::Worker,
        }
    }

    /// Stable snake_case tag written to the manifest error log
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentError::Unreadable(_) => "unreadable",
            DocumentError::Unrecoverable(_) => "unrecoverable",
            DocumentError::Invalid(_) => "invalid_document",
            DocumentError::Timeout(_) => "timeout",
            DocumentError::WorkerPanic(_) => "worker_panic",
        }
    }
}

/// Why a truncated document could not be repaired
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    #[error("no complete element boundary before the truncation point")]
    NoBoundary,

    #[error("repaired text does not parse: {0}")]
    StillInvalid(String),

    #[error("repaired document is not a JSON object")]
    NotAnObject,
}

pub type Result<T> = std::result::Result<T, NormalizerError>;
