use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Stage;

#[derive(Debug, Error, Diagnostic)]
pub enum EnrichError {
    #[error("required tool not found on PATH: {0}")]
    #[diagnostic(help("install NCBI E-utilities: https://www.ncbi.nlm.nih.gov/books/NBK179288/"))]
    MissingTool(String),

    #[error("invalid query key: {0:?}")]
    InvalidQueryKey(String),

    #[error("failed to read input list {path}: {message}")]
    InputList { path: PathBuf, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("malformed {schema} response: {message}")]
    Decode {
        schema: &'static str,
        message: String,
    },

    #[error("failed to write {path}: {message}")]
    Output { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{0} stage cancelled")]
    Cancelled(Stage),
}

impl EnrichError {
    /// External-call failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EnrichError::Spawn { .. } | EnrichError::CommandFailed { .. } | EnrichError::Timeout { .. }
        )
    }

    /// Local failures that leave an output file unable to satisfy its invariants.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EnrichError::Output { .. } | EnrichError::Filesystem(_))
    }
}
