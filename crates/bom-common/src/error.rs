//! Error types shared by the BOM crates

use thiserror::Error;

/// Result type alias for BOM operations
pub type Result<T> = std::result::Result<T, BomError>;

/// Main error type for BOM
#[derive(Error, Debug)]
pub enum BomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BomError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
