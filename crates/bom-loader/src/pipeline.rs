//! Load pipeline
//!
//! Drives one run through its states:
//!
//! ```text
//! Init -> InfraChecked -> Staging -> Reconciling -> Committed -> MaintenanceDone
//!                            \            /
//!                             -> Aborted <-
//! ```
//!
//! Staging and reconciliation share one transaction. Any failure in between
//! drops it, and PostgreSQL rolls back every staged row and every canonical
//! write of the run. Maintenance runs after commit and cannot undo the load.
//!
//! The optional deadline bounds staging and reconciliation only. The commit
//! itself is never cut short, so a reported `Timeout` always means nothing was
//! written.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::{LoadError, LoadResult};
use crate::ingest;
use crate::ledger;
use crate::maintenance::{self, MaintenanceOutcome};
use crate::reconcile::{ReconcileOutcome, ReconciliationEngine};
use crate::staging;

/// State of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    InfraChecked,
    Staging,
    Reconciling,
    Committed,
    MaintenanceDone,
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::InfraChecked => "infra_checked",
            Self::Staging => "staging",
            Self::Reconciling => "reconciling",
            Self::Committed => "committed",
            Self::MaintenanceDone => "maintenance_done",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Rows read from one extract. In a dry run, rows that would be staged.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub dataset: Dataset,
    pub path: PathBuf,
    pub rows: u64,
}

/// Report of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub dry_run: bool,
    pub ingested: Vec<IngestSummary>,
    pub reconciled: Vec<ReconcileOutcome>,
    pub maintenance: Option<MaintenanceOutcome>,
    pub duration: Duration,
}

impl LoadReport {
    pub fn to_json(&self) -> bom_common::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total rows inserted or updated across all datasets
    pub fn rows_processed(&self) -> u64 {
        self.reconciled.iter().map(|r| r.rows_processed).sum()
    }
}

pub struct Pipeline {
    pool: PgPool,
    config: PipelineConfig,
    run_id: Uuid,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(pool: PgPool, config: PipelineConfig) -> Self {
        Self {
            pool,
            config,
            run_id: Uuid::new_v4(),
            state: PipelineState::Init,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "Pipeline state transition");
        self.state = next;
    }

    /// Execute one run.
    ///
    /// Phases:
    /// 1. Ensure the audit ledger exists
    /// 2. Stage every configured dataset (or only count rows in a dry run)
    /// 3. Reconcile in dependency order and commit
    /// 4. Refresh statistics
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&mut self) -> LoadResult<LoadReport> {
        let started = Instant::now();
        info!(
            data_dir = %self.config.data_dir.display(),
            datasets = self.config.datasets.len(),
            dry_run = self.config.dry_run,
            "Starting load run"
        );

        if let Err(e) = ledger::ensure_infrastructure(&self.pool).await {
            error!(error = %e, "Audit ledger unavailable, nothing was loaded");
            return Err(e);
        }
        self.transition(PipelineState::InfraChecked);

        if self.config.dry_run {
            return self.dry_run(started);
        }

        let deadline = self.config.run_timeout;
        let phase = self.stage_and_reconcile();
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, phase)
                .await
                .unwrap_or(Err(LoadError::Timeout(limit))),
            None => phase.await,
        };

        let result = match result {
            Ok((tx, ingested, reconciled)) => match tx.commit().await {
                Ok(()) => {
                    self.transition(PipelineState::Committed);
                    Ok((ingested, reconciled))
                },
                Err(e) => Err(LoadError::from(e)),
            },
            Err(e) => Err(e),
        };

        let (ingested, reconciled) = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                self.transition(PipelineState::Aborted);
                error!(
                    step = e.step(),
                    dataset = ?e.dataset(),
                    error = %e,
                    "Load aborted, transaction rolled back"
                );
                return Err(e);
            },
        };

        let maintenance = maintenance::run_maintenance(&self.pool, self.run_id).await;
        self.transition(PipelineState::MaintenanceDone);

        let report = LoadReport {
            run_id: self.run_id,
            state: self.state,
            dry_run: false,
            ingested,
            reconciled,
            maintenance: Some(maintenance),
            duration: started.elapsed(),
        };

        info!(
            rows_processed = report.rows_processed(),
            duration_ms = report.duration.as_millis() as u64,
            "Load run completed"
        );

        Ok(report)
    }

    /// Stage and reconcile inside a fresh transaction, handing it back
    /// uncommitted.
    async fn stage_and_reconcile(
        &mut self,
    ) -> LoadResult<(Transaction<'static, Postgres>, Vec<IngestSummary>, Vec<ReconcileOutcome>)> {
        let mut tx = self.pool.begin().await?;
        self.transition(PipelineState::Staging);

        staging::reset_staging(&mut tx).await?;

        let mut ingested = Vec::with_capacity(self.config.datasets.len());
        for dataset in self.config.datasets.clone() {
            let path = self.config.source_path(dataset);
            let rows = ingest::ingest(&mut tx, dataset, &path).await?;
            info!(dataset = %dataset, rows = rows, "Staged dataset");
            ingested.push(IngestSummary {
                dataset,
                path,
                rows,
            });
        }

        self.transition(PipelineState::Reconciling);
        let engine =
            ReconciliationEngine::new(self.pool.clone(), self.run_id, self.config.failure_audit);

        let mut reconciled = Vec::with_capacity(ingested.len());
        for dataset in self.config.datasets.clone() {
            reconciled.push(engine.reconcile(&mut tx, dataset).await?);
        }

        Ok((tx, ingested, reconciled))
    }

    fn dry_run(&mut self, started: Instant) -> LoadResult<LoadReport> {
        self.transition(PipelineState::Staging);

        let mut ingested = Vec::with_capacity(self.config.datasets.len());
        for dataset in self.config.datasets.clone() {
            let path = self.config.source_path(dataset);
            let rows = ingest::count_source_rows(dataset, &path).map_err(|source| {
                LoadError::SourceUnreadable {
                    dataset,
                    path: path.clone(),
                    source,
                }
            })?;
            info!(dataset = %dataset, rows = rows, path = %path.display(), "Would stage dataset");
            ingested.push(IngestSummary {
                dataset,
                path,
                rows,
            });
        }

        Ok(LoadReport {
            run_id: self.run_id,
            state: self.state,
            dry_run: true,
            ingested,
            reconciled: Vec::new(),
            maintenance: None,
            duration: started.elapsed(),
        })
    }
}
