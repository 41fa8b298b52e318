//! Staging store
//!
//! Scratch relations that hold one run's raw rows. They are temporary tables
//! created `ON COMMIT DROP` inside the load transaction, so they disappear at
//! commit or rollback and are never visible to other sessions.

use bom_common::value::{encode_copy_row, TypedValue};
use sqlx::PgConnection;
use tracing::debug;

use crate::dataset::Dataset;

/// Drop and recreate every staging relation on the transaction's connection.
///
/// Only the session's own temporary relations are dropped; a permanent table
/// sharing a staging name is left alone.
pub async fn reset_staging(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    for dataset in Dataset::RECONCILE_ORDER {
        let descriptor = dataset.descriptor();

        sqlx::query(&format!(
            "DROP TABLE IF EXISTS pg_temp.{} CASCADE",
            descriptor.staging_table
        ))
        .execute(&mut *conn)
        .await?;

        sqlx::query(&descriptor.staging_ddl())
            .execute(&mut *conn)
            .await?;

        debug!(relation = descriptor.staging_table, "Created staging relation");
    }

    Ok(())
}

/// Transfer `rows` into `relation` with a single `COPY ... FROM STDIN`.
///
/// Returns the number of rows the server accepted. Nothing is sent for an
/// empty batch.
pub async fn bulk_load(
    conn: &mut PgConnection,
    relation: &str,
    columns: &[&str],
    rows: &[Vec<TypedValue>],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }

    let payload = encode_copy_payload(rows);
    let statement = copy_statement(relation, columns);

    let mut copy = conn.copy_in_raw(&statement).await?;
    copy.send(payload.as_bytes()).await?;
    let copied = copy.finish().await?;

    debug!(
        relation = relation,
        rows = copied,
        bytes = payload.len(),
        "COPY into staging finished"
    );

    Ok(copied)
}

fn copy_statement(relation: &str, columns: &[&str]) -> String {
    format!("COPY {} ({}) FROM STDIN", relation, columns.join(", "))
}

fn encode_copy_payload(rows: &[Vec<TypedValue>]) -> String {
    let mut payload = String::with_capacity(rows.len() * 64);
    for row in rows {
        encode_copy_row(row, &mut payload);
    }
    payload
}
