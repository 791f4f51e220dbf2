//! Error types for CLI operations.

use contracts::ContractError;
use ingestion::IngestionError;
use memory::MemoryError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration rejected or a timeline could not be built
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// Buffer manager could not be installed
    #[error("Buffer manager setup failed: {0}")]
    Memory(#[from] MemoryError),

    /// Producer registration or start failure
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    /// Pipeline execution error
    #[error("Pipeline execution failed: {message}")]
    PipelineExecution { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn pipeline_execution(message: impl Into<String>) -> Self {
        Self::PipelineExecution {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CliError::config_not_found("pipeline.toml");
        assert_eq!(err.to_string(), "Configuration file not found: pipeline.toml");

        let err: CliError = ContractError::config_validation("sync.output", "missing").into();
        assert!(err.to_string().contains("sync.output"));
    }
}
