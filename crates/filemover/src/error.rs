use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileMoverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pattern in rule '{rule_id}': {message}")]
    Pattern { rule_id: String, message: String },

    #[error("Invalid template in rule '{rule_id}': {message}")]
    Template { rule_id: String, message: String },

    #[error("Scan error at {path}: {message}")]
    Scan { path: PathBuf, message: String },

    #[error("Plan validation error: {0}")]
    PlanValidation(String),

    #[error("Unknown plan node id: {0}")]
    InvalidNodeId(u64),

    #[error("Execution error at {path}: {message}")]
    Execution { path: PathBuf, message: String },

    #[error("Transient failure at {path}: {message}")]
    Transient { path: PathBuf, message: String },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Undo error: {0}")]
    Undo(String),

    #[error("Insufficient space on {volume}: {required} bytes required, {available} available")]
    InsufficientSpace {
        volume: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl FileMoverError {
    /// Transient failures are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, FileMoverError::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, FileMoverError>;
