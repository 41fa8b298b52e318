//! BOM Loader Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads the Bills of Mortality extracts into the canonical `bom` schema.
//!
//! # Pipeline
//!
//! - **Staging**: every extract is coerced and bulk-copied into a temporary
//!   relation of the load transaction
//! - **Reconciliation**: staged rows are deduplicated by business key and
//!   upserted in dependency order (years, weeks, parishes, christenings,
//!   causes of death, bills)
//! - **Ledger**: every step is journaled in `bom.data_load_log`
//! - **Maintenance**: table statistics are refreshed after commit
//!
//! A run commits all datasets or none of them.
//!
//! # Example
//!
//! ```no_run
//! use bom_loader::config::PipelineConfig;
//! use bom_loader::db::{create_pool, DbConfig};
//! use bom_loader::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = create_pool(&DbConfig::new("postgresql://localhost/bom")).await?;
//!     let mut pipeline = Pipeline::new(pool, PipelineConfig::new("./data"));
//!     let report = pipeline.run().await?;
//!     println!("{} rows processed", report.rows_processed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod maintenance;
pub mod pipeline;
pub mod reconcile;
pub mod staging;

pub use config::{FailureAudit, LoaderConfig, PipelineConfig};
pub use dataset::Dataset;
pub use error::{LoadError, LoadResult};
pub use pipeline::{LoadReport, Pipeline, PipelineState};
