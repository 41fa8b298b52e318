//! Loader error types

use std::path::PathBuf;
use std::time::Duration;

use bom_common::BomError;
use thiserror::Error;

use crate::dataset::Dataset;

/// Result type alias for loader operations
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Terminal failure of a load run.
///
/// Every variant raised between opening the transaction and committing it
/// means the whole run was rolled back.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The audit ledger could not be ensured; nothing else was attempted
    #[error("Audit ledger unavailable: {0}")]
    InfraUnavailable(#[source] sqlx::Error),

    #[error("Cannot read {dataset} source {}: {source}", .path.display())]
    SourceUnreadable {
        dataset: Dataset,
        path: PathBuf,
        #[source]
        source: BomError,
    },

    /// The staging relation rejected the bulk copy
    #[error("Bulk transfer of {dataset} into staging rejected: {source}")]
    TransferError {
        dataset: Dataset,
        #[source]
        source: sqlx::Error,
    },

    #[error("Reconciliation of {dataset} into {table} failed: {source}")]
    ReconciliationError {
        dataset: Dataset,
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Post-commit statistics refresh failed; the load itself is committed
    #[error("Statistics refresh failed: {0}")]
    MaintenanceError(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Run exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Common(#[from] BomError),
}

impl LoadError {
    /// Dataset the failure is attributed to, if any
    pub fn dataset(&self) -> Option<Dataset> {
        match self {
            LoadError::SourceUnreadable { dataset, .. }
            | LoadError::TransferError { dataset, .. }
            | LoadError::ReconciliationError { dataset, .. } => Some(*dataset),
            _ => None,
        }
    }

    /// Short name of the pipeline step that failed
    pub fn step(&self) -> &'static str {
        match self {
            LoadError::InfraUnavailable(_) => "infrastructure",
            LoadError::SourceUnreadable { .. } | LoadError::TransferError { .. } => "ingest",
            LoadError::ReconciliationError { .. } => "reconcile",
            LoadError::MaintenanceError(_) => "maintenance",
            LoadError::Timeout(_) => "deadline",
            LoadError::Database(_) => "transaction",
            LoadError::Common(_) => "configuration",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_dataset_and_step() {
        let err = LoadError::SourceUnreadable {
            dataset: Dataset::Week,
            path: PathBuf::from("/data/week_unique.csv"),
            source: BomError::Parse("missing header row".to_string()),
        };

        assert_eq!(err.dataset(), Some(Dataset::Week));
        assert_eq!(err.step(), "ingest");
        assert_eq!(
            err.to_string(),
            "Cannot read week source /data/week_unique.csv: Parse error: missing header row"
        );

        let err = LoadError::ReconciliationError {
            dataset: Dataset::Christenings,
            table: "bom.christenings",
            source: sqlx::Error::RowNotFound,
        };
        assert_eq!(err.dataset(), Some(Dataset::Christenings));
        assert!(err.to_string().starts_with("Reconciliation of christenings into bom.christenings"));
    }

    #[test]
    fn test_timeout_has_no_dataset() {
        let err = LoadError::Timeout(Duration::from_secs(5));
        assert_eq!(err.dataset(), None);
        assert_eq!(err.step(), "deadline");
    }
}
