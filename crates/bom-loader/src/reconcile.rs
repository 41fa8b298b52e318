//! Reconciliation engine
//!
//! Merges each staged dataset into its canonical table with one
//! deduplicating upsert. Steps run on the load transaction's connection, in
//! dependency order, each inside its own savepoint.

use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::FailureAudit;
use crate::dataset::Dataset;
use crate::error::{LoadError, LoadResult};
use crate::ledger::{self, LedgerEntry, OperationKind};

const STEP_SAVEPOINT: &str = "reconcile_step";

const RECONCILE_YEARS: &str = r#"
    INSERT INTO bom.year (year)
    SELECT DISTINCT year
    FROM temp_year
    WHERE year IS NOT NULL
    ON CONFLICT (year) DO NOTHING
"#;

const RECONCILE_WEEKS: &str = r#"
    WITH deduplicated AS (
        SELECT DISTINCT ON (joinid)
            year, week_number, start_day, end_day, start_month, end_month,
            unique_identifier, week_id, year_range, joinid, split_year
        FROM temp_week
        WHERE joinid IS NOT NULL
        ORDER BY joinid, year DESC NULLS LAST, row_seq DESC
    )
    INSERT INTO bom.week (
        year, week_number, start_day, end_day, start_month, end_month,
        unique_identifier, week_id, year_range, joinid, split_year
    )
    SELECT
        year, week_number, start_day, end_day, start_month, end_month,
        unique_identifier, week_id, year_range, joinid, split_year
    FROM deduplicated
    ON CONFLICT (joinid) DO UPDATE SET
        year = EXCLUDED.year,
        week_number = EXCLUDED.week_number,
        start_day = EXCLUDED.start_day,
        end_day = EXCLUDED.end_day,
        start_month = EXCLUDED.start_month,
        end_month = EXCLUDED.end_month,
        unique_identifier = EXCLUDED.unique_identifier,
        week_id = EXCLUDED.week_id,
        year_range = EXCLUDED.year_range,
        split_year = EXCLUDED.split_year
"#;

const RECONCILE_PARISHES: &str = r#"
    WITH deduplicated AS (
        SELECT DISTINCT ON (parish_name)
            parish_name, canonical_name, parish_id
        FROM temp_parish
        WHERE parish_name IS NOT NULL
        ORDER BY parish_name, row_seq DESC
    )
    INSERT INTO bom.parishes AS p (parish_name, canonical_name, id)
    SELECT parish_name, canonical_name, parish_id
    FROM deduplicated
    ON CONFLICT (parish_name) DO UPDATE SET
        canonical_name = EXCLUDED.canonical_name,
        id = COALESCE(EXCLUDED.id, p.id)
    WHERE p.canonical_name IS DISTINCT FROM EXCLUDED.canonical_name
       OR (EXCLUDED.id IS NOT NULL AND p.id IS DISTINCT FROM EXCLUDED.id)
"#;

const RECONCILE_CHRISTENINGS: &str = r#"
    WITH deduplicated AS (
        SELECT DISTINCT ON (
            parish_name, week, start_day, start_month, end_day, end_month, year
        )
            parish_name, count, week, start_day, start_month, end_day, end_month,
            year, missing, illegible, source, bill_type, joinid, unique_identifier
        FROM temp_christening c
        WHERE parish_name IS NOT NULL
          AND EXISTS (SELECT 1 FROM bom.week w WHERE w.joinid = c.joinid)
        ORDER BY
            parish_name, week, start_day, start_month, end_day, end_month, year,
            count DESC NULLS LAST, row_seq DESC
    )
    INSERT INTO bom.christenings (
        christening, count, week_number, start_day, start_month, end_day,
        end_month, year, missing, illegible, source, bill_type, joinid,
        unique_identifier
    )
    SELECT
        parish_name, count, week, start_day, start_month, end_day, end_month,
        year, missing, illegible, source, bill_type, joinid, unique_identifier
    FROM deduplicated
    ON CONFLICT (christening, week_number, start_day, start_month, end_day, end_month, year)
    DO UPDATE SET
        count = EXCLUDED.count,
        missing = EXCLUDED.missing,
        illegible = EXCLUDED.illegible,
        source = EXCLUDED.source,
        bill_type = EXCLUDED.bill_type,
        joinid = EXCLUDED.joinid,
        unique_identifier = EXCLUDED.unique_identifier
"#;

const RECONCILE_CAUSES_OF_DEATH: &str = r#"
    WITH deduplicated AS (
        SELECT DISTINCT ON (death, year, joinid)
            death, count, year, joinid, descriptive_text, source_name
        FROM temp_causes_of_death c
        WHERE death IS NOT NULL
          AND EXISTS (SELECT 1 FROM bom.week w WHERE w.joinid = c.joinid)
        ORDER BY death, year, joinid, count DESC NULLS LAST, row_seq DESC
    )
    INSERT INTO bom.causes_of_death (
        death, count, year, week_id, descriptive_text, source_name
    )
    SELECT death, count, year, joinid, descriptive_text, source_name
    FROM deduplicated
    ON CONFLICT (death, year, week_id) DO UPDATE SET
        count = EXCLUDED.count,
        descriptive_text = EXCLUDED.descriptive_text,
        source_name = EXCLUDED.source_name
"#;

const RECONCILE_BILLS: &str = r#"
    WITH deduplicated AS (
        SELECT DISTINCT ON (parish_id, count_type, year, joinid)
            parish_id, count_type, count, year, joinid, bill_type,
            missing, illegible, source, unique_identifier
        FROM temp_bills b
        WHERE parish_id IS NOT NULL
          AND year IS NOT NULL
          AND EXISTS (SELECT 1 FROM bom.week w WHERE w.joinid = b.joinid)
          AND EXISTS (SELECT 1 FROM bom.parishes p WHERE p.id = b.parish_id)
        ORDER BY parish_id, count_type, year, joinid, count DESC NULLS LAST, row_seq DESC
    )
    INSERT INTO bom.bill_of_mortality (
        parish_id, count_type, count, year, week_id, bill_type,
        missing, illegible, source, unique_identifier
    )
    SELECT
        parish_id, count_type, count, year, joinid, bill_type,
        missing, illegible, source, unique_identifier
    FROM deduplicated
    ON CONFLICT (parish_id, count_type, year, week_id) DO UPDATE SET
        count = EXCLUDED.count,
        bill_type = EXCLUDED.bill_type,
        missing = EXCLUDED.missing,
        illegible = EXCLUDED.illegible,
        source = EXCLUDED.source,
        unique_identifier = EXCLUDED.unique_identifier
"#;

/// Upsert statement for `dataset`
pub fn reconcile_statement(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::Year => RECONCILE_YEARS,
        Dataset::Week => RECONCILE_WEEKS,
        Dataset::Parishes => RECONCILE_PARISHES,
        Dataset::Christenings => RECONCILE_CHRISTENINGS,
        Dataset::CausesOfDeath => RECONCILE_CAUSES_OF_DEATH,
        Dataset::Bills => RECONCILE_BILLS,
    }
}

/// Ledger operation recorded for a successful step
pub fn operation_for(dataset: Dataset) -> OperationKind {
    match dataset {
        Dataset::Year => OperationKind::Insert,
        _ => OperationKind::Upsert,
    }
}

/// Result of one reconciliation step
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub dataset: Dataset,
    pub table: &'static str,
    pub operation: OperationKind,
    pub rows_before: i64,
    /// Rows inserted or updated
    pub rows_processed: u64,
    pub rows_after: i64,
    pub duration: Duration,
}

impl ReconcileOutcome {
    fn ledger_entry(&self, run_id: Uuid) -> LedgerEntry {
        LedgerEntry::success(
            self.operation,
            self.table,
            self.rows_before,
            i64::try_from(self.rows_processed).unwrap_or(i64::MAX),
            self.rows_after,
            self.duration,
        )
        .with_run_id(run_id)
    }
}

async fn count_rows(conn: &mut PgConnection, table: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(conn)
        .await
}

/// Runs reconciliation steps and journals them
pub struct ReconciliationEngine {
    pool: PgPool,
    run_id: Uuid,
    failure_audit: FailureAudit,
}

impl ReconciliationEngine {
    pub fn new(pool: PgPool, run_id: Uuid, failure_audit: FailureAudit) -> Self {
        Self {
            pool,
            run_id,
            failure_audit,
        }
    }

    /// Reconcile one dataset on the transaction's connection.
    ///
    /// On failure the step's savepoint is rolled back, a failure entry is
    /// journaled according to the audit mode and the error is returned so the
    /// caller aborts the run.
    #[instrument(skip(self, conn), fields(run_id = %self.run_id))]
    pub async fn reconcile(
        &self,
        conn: &mut PgConnection,
        dataset: Dataset,
    ) -> LoadResult<ReconcileOutcome> {
        let table = dataset.descriptor().canonical_table;
        let started = Instant::now();

        let savepoint = sqlx::query(&format!("SAVEPOINT {}", STEP_SAVEPOINT))
            .execute(&mut *conn)
            .await;
        let result = match savepoint {
            Ok(_) => self.run_step(conn, dataset, started).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                sqlx::query(&format!("RELEASE SAVEPOINT {}", STEP_SAVEPOINT))
                    .execute(&mut *conn)
                    .await
                    .map_err(|source| LoadError::ReconciliationError {
                        dataset,
                        table,
                        source,
                    })?;

                info!(
                    dataset = %dataset,
                    table = table,
                    rows_before = outcome.rows_before,
                    rows_processed = outcome.rows_processed,
                    rows_after = outcome.rows_after,
                    duration_ms = outcome.duration.as_millis() as u64,
                    "Reconciled dataset"
                );
                Ok(outcome)
            },
            Err(source) => {
                warn!(dataset = %dataset, table = table, error = %source, "Reconciliation step failed");

                if let Err(e) = sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", STEP_SAVEPOINT))
                    .execute(&mut *conn)
                    .await
                {
                    warn!(error = %e, "Could not roll back to step savepoint");
                }

                let entry = LedgerEntry::failure(
                    OperationKind::Error,
                    table,
                    source.to_string(),
                    started.elapsed(),
                )
                .with_run_id(self.run_id);
                self.journal_failure(conn, &entry).await;

                Err(LoadError::ReconciliationError {
                    dataset,
                    table,
                    source,
                })
            },
        }
    }

    async fn run_step(
        &self,
        conn: &mut PgConnection,
        dataset: Dataset,
        started: Instant,
    ) -> Result<ReconcileOutcome, sqlx::Error> {
        let table = dataset.descriptor().canonical_table;

        let rows_before = count_rows(&mut *conn, table).await?;

        let rows_processed = sqlx::query(reconcile_statement(dataset))
            .execute(&mut *conn)
            .await?
            .rows_affected();

        let rows_after = count_rows(&mut *conn, table).await?;

        let outcome = ReconcileOutcome {
            dataset,
            table,
            operation: operation_for(dataset),
            rows_before,
            rows_processed,
            rows_after,
            duration: started.elapsed(),
        };

        ledger::append_entry(&mut *conn, &outcome.ledger_entry(self.run_id)).await?;

        Ok(outcome)
    }

    async fn journal_failure(&self, conn: &mut PgConnection, entry: &LedgerEntry) {
        let written = match self.failure_audit {
            FailureAudit::Detached => ledger::append_entry(&self.pool, entry).await,
            FailureAudit::InTransaction => ledger::append_entry(&mut *conn, entry).await,
        };

        match written {
            Ok(load_id) => debug!(
                load_id = load_id,
                mode = ?self.failure_audit,
                "Journaled failed reconciliation step"
            ),
            Err(e) => warn!(
                error = %e,
                table = %entry.table_name,
                "Could not journal failed reconciliation step"
            ),
        }
    }
}
