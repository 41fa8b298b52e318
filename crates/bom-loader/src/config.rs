//! Loader configuration
//!
//! Precedence, highest first: command-line flags, environment (a `.env` file
//! is honoured), built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use bom_common::{BomError, Result};

use crate::dataset::Dataset;
use crate::db::DbConfig;

/// Default source directory
pub const DEFAULT_DATA_DIR: &str = ".";

/// Where failure ledger entries of a reconciliation step are written
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum FailureAudit {
    /// Separate autocommitted connection; the entry survives the rollback
    #[default]
    Detached,
    /// Inside the load transaction; the entry is rolled back with the run
    InTransaction,
}

impl std::str::FromStr for FailureAudit {
    type Err = BomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "detached" => Ok(FailureAudit::Detached),
            "in-transaction" | "in_transaction" | "transaction" => Ok(FailureAudit::InTransaction),
            _ => Err(BomError::config(format!("Invalid failure audit mode: {}", s))),
        }
    }
}

/// Settings of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding one extract per dataset
    pub data_dir: PathBuf,

    /// Datasets to stage and reconcile
    pub datasets: Vec<Dataset>,

    /// Report what would be ingested without writing anything
    pub dry_run: bool,

    pub failure_audit: FailureAudit,

    /// Deadline for staging plus reconciliation
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            datasets: Dataset::RECONCILE_ORDER.to_vec(),
            dry_run: false,
            failure_audit: FailureAudit::default(),
            run_timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_datasets(mut self, datasets: impl IntoIterator<Item = Dataset>) -> Self {
        let mut datasets: Vec<Dataset> = datasets.into_iter().collect();
        datasets.sort_by_key(|d| d.reconcile_rank());
        datasets.dedup();
        self.datasets = datasets;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_failure_audit(mut self, mode: FailureAudit) -> Self {
        self.failure_audit = mode;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Path of the extract for `dataset`
    pub fn source_path(&self, dataset: Dataset) -> PathBuf {
        self.data_dir.join(dataset.descriptor().file_name)
    }

    /// Environment overrides:
    /// - `BOM_DATA_DIR`
    /// - `BOM_FAILURE_AUDIT` (`detached` | `in-transaction`)
    /// - `BOM_RUN_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("BOM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(mode) = std::env::var("BOM_FAILURE_AUDIT") {
            config.failure_audit = mode.parse()?;
        }

        if let Ok(secs) = std::env::var("BOM_RUN_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| BomError::config(format!("Invalid BOM_RUN_TIMEOUT_SECS: {}", secs)))?;
            config.run_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.data_dir.is_dir() {
            return Err(BomError::config(format!(
                "Data directory does not exist: {}",
                self.data_dir.display()
            )));
        }

        if self.datasets.is_empty() {
            return Err(BomError::config("No datasets selected"));
        }

        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BomError::config("Run timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// Complete loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub database: DbConfig,
    pub pipeline: PipelineConfig,
}

impl LoaderConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DbConfig::from_env(),
            pipeline: PipelineConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.pipeline.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_audit_from_str() {
        assert_eq!("detached".parse::<FailureAudit>().unwrap(), FailureAudit::Detached);
        assert_eq!(
            "In-Transaction".parse::<FailureAudit>().unwrap(),
            FailureAudit::InTransaction
        );
        assert!("never".parse::<FailureAudit>().is_err());
    }

    #[test]
    fn test_datasets_are_kept_in_dependency_order() {
        let config = PipelineConfig::default().with_datasets([
            Dataset::Bills,
            Dataset::Year,
            Dataset::Bills,
            Dataset::Week,
        ]);
        assert_eq!(config.datasets, vec![Dataset::Year, Dataset::Week, Dataset::Bills]);
    }

    #[test]
    fn test_source_path() {
        let config = PipelineConfig::new("/srv/bom");
        assert_eq!(
            config.source_path(Dataset::Bills),
            PathBuf::from("/srv/bom/all_bills.csv")
        );
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        assert!(config.validate().is_ok());

        let missing = PipelineConfig::new(dir.path().join("nope"));
        assert!(missing.validate().is_err());

        let empty = PipelineConfig::new(dir.path()).with_datasets([]);
        assert!(empty.validate().is_err());

        let zero = PipelineConfig::new(dir.path()).with_run_timeout(Duration::ZERO);
        assert!(zero.validate().is_err());
    }
}
