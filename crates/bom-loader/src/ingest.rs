//! Bulk ingest
//!
//! Reads one delimited extract, coerces every field by the dataset's column
//! rules and transfers the buffered rows into the staging relation with one
//! COPY.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bom_common::value::TypedValue;
use bom_common::{BomError, Result};
use csv::StringRecord;
use sqlx::PgConnection;
use tracing::{debug, warn};

use crate::dataset::{coerce_field, Dataset};
use crate::error::{LoadError, LoadResult};
use crate::staging;

/// Rows read from one extract, in the descriptor's column order
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub dataset: Dataset,
    pub rows: Vec<Vec<TypedValue>>,
    /// Header columns the dataset does not define
    pub ignored_columns: Vec<String>,
}

/// Where each descriptor column is found in the extract header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    positions: Vec<Option<usize>>,
    ignored: Vec<String>,
}

impl HeaderMapping {
    pub fn new(dataset: Dataset, header: &StringRecord) -> Result<Self> {
        let normalized: Vec<String> = header.iter().map(normalize_header).collect();
        let descriptor = dataset.descriptor();

        let positions: Vec<Option<usize>> = descriptor
            .columns
            .iter()
            .map(|column| normalized.iter().position(|h| h == column.name))
            .collect();

        if positions.iter().all(Option::is_none) {
            return Err(BomError::Parse(format!(
                "header [{}] names none of the {} columns",
                normalized.join(", "),
                dataset
            )));
        }

        let ignored = normalized
            .into_iter()
            .filter(|h| descriptor.column(h).is_none())
            .collect();

        Ok(Self { positions, ignored })
    }

    /// Build a staging row; fields missing from a short record become NULL.
    pub fn row(&self, dataset: Dataset, record: &StringRecord) -> Vec<TypedValue> {
        dataset
            .descriptor()
            .columns
            .iter()
            .zip(&self.positions)
            .map(|(column, position)| {
                position
                    .and_then(|i| record.get(i))
                    .map(|raw| coerce_field(dataset, column.name, raw))
                    .unwrap_or(TypedValue::Null)
            })
            .collect()
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_ascii_lowercase()
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
}

fn read_header<R: Read>(reader: &mut csv::Reader<R>) -> Result<StringRecord> {
    let header = reader.headers()?.clone();
    if header.is_empty() || header.iter().all(|h| normalize_header(h).is_empty()) {
        return Err(BomError::Parse("missing header row".to_string()));
    }
    Ok(header)
}

/// Parse an extract into staging rows.
pub fn read_records<R: Read>(dataset: Dataset, reader: R) -> Result<StagedBatch> {
    let mut reader = csv_reader(reader);
    let header = read_header(&mut reader)?;
    let mapping = HeaderMapping::new(dataset, &header)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(mapping.row(dataset, &record?));
    }

    Ok(StagedBatch {
        dataset,
        rows,
        ignored_columns: mapping.ignored().to_vec(),
    })
}

/// Open and parse the extract at `path`.
pub fn read_source(dataset: Dataset, path: &Path) -> Result<StagedBatch> {
    let file = File::open(path)?;
    read_records(dataset, BufReader::new(file))
}

/// Count data rows of the extract at `path` without coercing them.
pub fn count_source_rows(dataset: Dataset, path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let mut reader = csv_reader(BufReader::new(file));
    let header = read_header(&mut reader)?;
    HeaderMapping::new(dataset, &header)?;

    let mut count = 0;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

/// Stage the extract for `dataset` on the transaction's connection.
pub async fn ingest(conn: &mut PgConnection, dataset: Dataset, path: &Path) -> LoadResult<u64> {
    let batch = read_source(dataset, path).map_err(|source| LoadError::SourceUnreadable {
        dataset,
        path: path.to_path_buf(),
        source,
    })?;

    if !batch.ignored_columns.is_empty() {
        warn!(
            dataset = %dataset,
            columns = ?batch.ignored_columns,
            "Ignoring header columns the dataset does not define"
        );
    }

    let descriptor = dataset.descriptor();
    debug!(
        dataset = %dataset,
        rows = batch.rows.len(),
        relation = descriptor.staging_table,
        "Parsed extract"
    );

    staging::bulk_load(
        conn,
        descriptor.staging_table,
        &descriptor.column_names(),
        &batch.rows,
    )
    .await
    .map_err(|source| LoadError::TransferError { dataset, source })
}
