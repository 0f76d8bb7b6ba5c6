//! Load error taxonomy
//!
//! Every failure the engine can attribute to a task is one of five kinds.
//! Task-local failures are carried inside a [`crate::report::LoadResult`]
//! rather than returned from the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure category recorded in a load result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad chunk size, descriptor or row shape. Detected before any I/O.
    ConfigurationError,
    /// The pool could not hand out a connection within its bounded wait
    ConnectionExhaustion,
    /// Opening the transaction, creating staging or bulk-copying failed
    StagingFailure,
    /// Insert-from-staging or commit failed
    MergeFailure,
    /// Never submitted because an earlier stage aborted
    DependencyAbort,
}

impl FailureKind {
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::ConfigurationError => "configuration_error",
            FailureKind::ConnectionExhaustion => "connection_exhaustion",
            FailureKind::StagingFailure => "staging_failure",
            FailureKind::MergeFailure => "merge_failure",
            FailureKind::DependencyAbort => "dependency_abort",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the load engine
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection pool exhausted: {0}")]
    ConnectionExhaustion(String),

    #[error("Staging failed for table '{table}': {detail}")]
    Staging { table: String, detail: String },

    #[error("Merge failed for table '{table}': {detail}")]
    Merge { table: String, detail: String },

    #[error("Skipped: stage '{stage}' aborted before this task was submitted")]
    DependencyAbort { stage: String },
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::ConnectionExhaustion(message.into())
    }

    /// Wrap a backend error raised while staging rows for `table`
    pub fn staging(table: &str, err: anyhow::Error) -> Self {
        Self::Staging {
            table: table.to_string(),
            detail: format!("{:#}", err),
        }
    }

    /// Wrap a backend error raised while merging staged rows into `table`
    pub fn merge(table: &str, err: anyhow::Error) -> Self {
        Self::Merge {
            table: table.to_string(),
            detail: format!("{:#}", err),
        }
    }

    pub fn dependency_abort(stage: impl Into<String>) -> Self {
        Self::DependencyAbort {
            stage: stage.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            LoadError::Configuration(_) => FailureKind::ConfigurationError,
            LoadError::ConnectionExhaustion(_) => FailureKind::ConnectionExhaustion,
            LoadError::Staging { .. } => FailureKind::StagingFailure,
            LoadError::Merge { .. } => FailureKind::MergeFailure,
            LoadError::DependencyAbort { .. } => FailureKind::DependencyAbort,
        }
    }
}
