//! Error types for the loader's collaborators

use thiserror::Error;

/// Result type alias for collaborator operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised outside the load engine while reading the source extract
/// or writing reports.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source file not found: {0}")]
    SourceNotFound(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: CommonError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }

    #[test]
    fn test_source_not_found_message() {
        let err = CommonError::SourceNotFound("exports/sales.csv".to_string());
        assert_eq!(err.to_string(), "Source file not found: exports/sales.csv");
    }
}
