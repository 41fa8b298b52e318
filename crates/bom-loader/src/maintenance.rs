//! Post-commit statistics refresh

use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::{LoadError, LoadResult};
use crate::ledger::{self, LedgerEntry, OperationKind, ALL_TABLES};

/// Outcome of the maintenance step as reported to the caller
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// `ANALYZE` every canonical table outside any transaction.
pub async fn refresh_statistics(pool: &PgPool) -> LoadResult<()> {
    for dataset in Dataset::RECONCILE_ORDER {
        let table = dataset.descriptor().canonical_table;
        sqlx::query(&format!("ANALYZE {}", table))
            .execute(pool)
            .await
            .map_err(LoadError::MaintenanceError)?;
    }
    Ok(())
}

/// Refresh statistics and journal one `ANALYZE` entry.
///
/// Never fails: the load is already committed, so errors are logged and
/// reported in the outcome.
pub async fn run_maintenance(pool: &PgPool, run_id: Uuid) -> MaintenanceOutcome {
    let started = Instant::now();
    let result = refresh_statistics(pool).await;
    let duration = started.elapsed();

    let (entry, outcome) = match result {
        Ok(()) => {
            info!(duration_ms = duration.as_millis() as u64, "Refreshed table statistics");
            (
                LedgerEntry::completed(OperationKind::Analyze, ALL_TABLES, duration),
                MaintenanceOutcome {
                    success: true,
                    error: None,
                    duration,
                },
            )
        },
        Err(e) => {
            warn!(error = %e, "Statistics refresh failed; the load stays committed");
            (
                LedgerEntry::failure(OperationKind::Analyze, ALL_TABLES, e.to_string(), duration),
                MaintenanceOutcome {
                    success: false,
                    error: Some(e.to_string()),
                    duration,
                },
            )
        },
    };

    if let Err(e) = ledger::append_entry(pool, &entry.with_run_id(run_id)).await {
        warn!(error = %e, "Could not journal maintenance step");
    }

    outcome
}
