//! Audit ledger
//!
//! Append-only journal of load operations in `bom.data_load_log`. Entries of
//! one run share a `run_id`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LoadError, LoadResult};

/// Default number of entries returned by [`recent_entries`]
pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// Upper bound for [`recent_entries`]
pub const MAX_HISTORY_LIMIT: i64 = 1000;

/// Table name recorded for the maintenance entry
pub const ALL_TABLES: &str = "all_tables";

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS bom";

const CREATE_LEDGER: &str = r#"
    CREATE TABLE IF NOT EXISTS bom.data_load_log (
        load_id serial PRIMARY KEY,
        load_date timestamptz NOT NULL DEFAULT now(),
        run_id uuid,
        operation text NOT NULL,
        table_name text NOT NULL,
        rows_before bigint,
        rows_processed bigint,
        rows_after bigint,
        success boolean NOT NULL DEFAULT false,
        error_message text,
        duration interval
    )
"#;

// Ledgers created by earlier tooling predate run ids
const ADD_RUN_ID: &str = "ALTER TABLE bom.data_load_log ADD COLUMN IF NOT EXISTS run_id uuid";

/// Kind of journaled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Insert,
    Upsert,
    Analyze,
    Error,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Upsert => "UPSERT",
            Self::Analyze => "ANALYZE",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// An entry to append
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub run_id: Option<Uuid>,
    pub operation: OperationKind,
    pub table_name: String,
    pub rows_before: Option<i64>,
    pub rows_processed: Option<i64>,
    pub rows_after: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl LedgerEntry {
    /// A successful operation with its row counts
    pub fn success(
        operation: OperationKind,
        table_name: impl Into<String>,
        rows_before: i64,
        rows_processed: i64,
        rows_after: i64,
        duration: Duration,
    ) -> Self {
        Self {
            run_id: None,
            operation,
            table_name: table_name.into(),
            rows_before: Some(rows_before),
            rows_processed: Some(rows_processed),
            rows_after: Some(rows_after),
            success: true,
            error_message: None,
            duration,
        }
    }

    /// A successful operation that touches no rows of its own, such as
    /// `ANALYZE`. Counts stay NULL.
    pub fn completed(
        operation: OperationKind,
        table_name: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            run_id: None,
            operation,
            table_name: table_name.into(),
            rows_before: None,
            rows_processed: None,
            rows_after: None,
            success: true,
            error_message: None,
            duration,
        }
    }

    /// A failed operation. Counts are unknown and stay NULL.
    pub fn failure(
        operation: OperationKind,
        table_name: impl Into<String>,
        error_message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            run_id: None,
            operation,
            table_name: table_name.into(),
            rows_before: None,
            rows_processed: None,
            rows_after: None,
            success: false,
            error_message: Some(error_message.into()),
            duration,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// A journaled entry read back from the ledger
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerRecord {
    pub load_id: i32,
    pub load_date: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub operation: String,
    pub table_name: String,
    pub rows_before: Option<i64>,
    pub rows_processed: Option<i64>,
    pub rows_after: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Duration in seconds
    pub duration_secs: Option<f64>,
}

/// PostgreSQL intervals hold whole microseconds; finer `Duration`s fail to
/// encode.
fn whole_micros(duration: Duration) -> Duration {
    Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Create the `bom` schema and the ledger table when missing.
///
/// Idempotent. Nothing else in a run is attempted when this fails.
pub async fn ensure_infrastructure(pool: &PgPool) -> LoadResult<()> {
    for statement in [CREATE_SCHEMA, CREATE_LEDGER, ADD_RUN_ID] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(LoadError::InfraUnavailable)?;
    }

    debug!("Audit ledger ready");
    Ok(())
}

/// Append one entry through `executor`.
///
/// Pass the pool for an autocommitted write, or the transaction's connection
/// to make the entry part of the load.
pub async fn append_entry<'e, E>(executor: E, entry: &LedgerEntry) -> Result<i32, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let load_id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO bom.data_load_log (
            run_id, operation, table_name, rows_before, rows_processed,
            rows_after, success, error_message, duration
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING load_id
        "#,
    )
    .bind(entry.run_id)
    .bind(entry.operation.as_str())
    .bind(&entry.table_name)
    .bind(entry.rows_before)
    .bind(entry.rows_processed)
    .bind(entry.rows_after)
    .bind(entry.success)
    .bind(&entry.error_message)
    .bind(whole_micros(entry.duration))
    .fetch_one(executor)
    .await?;

    debug!(
        load_id = load_id,
        operation = %entry.operation,
        table = %entry.table_name,
        success = entry.success,
        "Appended ledger entry"
    );

    Ok(load_id)
}

/// Most recent entries first, optionally restricted to one run.
///
/// Columns are cast so ledgers with `timestamp` dates and `integer` counts
/// decode the same way.
pub async fn recent_entries(
    pool: &PgPool,
    limit: i64,
    run_id: Option<Uuid>,
) -> Result<Vec<LedgerRecord>, sqlx::Error> {
    let limit = limit.clamp(1, MAX_HISTORY_LIMIT);

    sqlx::query_as::<_, LedgerRecord>(
        r#"
        SELECT
            load_id::int4 AS load_id,
            load_date::timestamptz AS load_date,
            run_id,
            operation::text AS operation,
            table_name::text AS table_name,
            rows_before::int8 AS rows_before,
            rows_processed::int8 AS rows_processed,
            rows_after::int8 AS rows_after,
            COALESCE(success, false) AS success,
            error_message::text AS error_message,
            EXTRACT(EPOCH FROM duration)::float8 AS duration_secs
        FROM bom.data_load_log
        WHERE $1::uuid IS NULL OR run_id = $1
        ORDER BY load_id DESC
        LIMIT $2
        "#,
    )
    .bind(run_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
