//! Dataset descriptors
//!
//! One declarative entry per supported dataset: where its extract lives, which
//! scratch relation it is staged into, the ordered staging columns with their
//! coercion rule, and the canonical table it reconciles into.

use bom_common::value::{coerce, ColumnKind, TypedValue};
use serde::{Deserialize, Serialize};

/// Staging-side check for a plausible year (bounds exclusive)
pub const PLAUSIBLE_YEAR: &str = "year > 1400 AND year < 1800";

/// Columns coerced as integers wherever they appear
const INTEGER_COLUMNS: [&str; 9] = [
    "year",
    "year_id",
    "id",
    "week_number",
    "start_day",
    "end_day",
    "week",
    "count",
    "parish_id",
];

/// Columns coerced as booleans wherever they appear
const BOOLEAN_COLUMNS: [&str; 2] = ["missing", "illegible"];

/// Coercion rule implied by a column name
pub fn kind_for_column(name: &str) -> ColumnKind {
    if INTEGER_COLUMNS.contains(&name) {
        ColumnKind::Integer
    } else if BOOLEAN_COLUMNS.contains(&name) {
        ColumnKind::Boolean
    } else {
        ColumnKind::Text
    }
}

/// A supported dataset
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Year,
    Week,
    Parishes,
    Christenings,
    CausesOfDeath,
    Bills,
}

impl Dataset {
    /// Reconciliation order: every dataset comes after the datasets it references.
    pub const RECONCILE_ORDER: [Dataset; 6] = [
        Dataset::Year,
        Dataset::Week,
        Dataset::Parishes,
        Dataset::Christenings,
        Dataset::CausesOfDeath,
        Dataset::Bills,
    ];

    pub fn descriptor(self) -> &'static DatasetDescriptor {
        match self {
            Dataset::Year => &YEAR,
            Dataset::Week => &WEEK,
            Dataset::Parishes => &PARISHES,
            Dataset::Christenings => &CHRISTENINGS,
            Dataset::CausesOfDeath => &CAUSES_OF_DEATH,
            Dataset::Bills => &BILLS,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Datasets whose canonical rows must exist before this one reconciles
    pub fn parents(self) -> &'static [Dataset] {
        match self {
            Dataset::Year | Dataset::Week | Dataset::Parishes => &[],
            Dataset::Christenings | Dataset::CausesOfDeath => &[Dataset::Week],
            Dataset::Bills => &[Dataset::Week, Dataset::Parishes],
        }
    }

    /// Position in [`Dataset::RECONCILE_ORDER`]
    pub fn reconcile_rank(self) -> usize {
        Self::RECONCILE_ORDER
            .iter()
            .position(|d| *d == self)
            .unwrap_or(Self::RECONCILE_ORDER.len())
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

impl std::str::FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dataset::RECONCILE_ORDER
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown dataset: {}", s))
    }
}

/// One staging column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn int(name: &'static str) -> ColumnSpec {
    ColumnSpec { name, kind: ColumnKind::Integer }
}

const fn flag(name: &'static str) -> ColumnSpec {
    ColumnSpec { name, kind: ColumnKind::Boolean }
}

const fn text(name: &'static str) -> ColumnSpec {
    ColumnSpec { name, kind: ColumnKind::Text }
}

/// Immutable description of a dataset
#[derive(Debug)]
pub struct DatasetDescriptor {
    pub dataset: Dataset,
    /// Logical name, also used in ledger and log output
    pub name: &'static str,
    /// File name under the source directory
    pub file_name: &'static str,
    pub staging_table: &'static str,
    pub canonical_table: &'static str,
    /// Ordered staging columns
    pub columns: &'static [ColumnSpec],
    /// Loose shape checks enforced by the staging relation
    pub staging_checks: &'static [&'static str],
}

impl DatasetDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// `CREATE TEMPORARY TABLE` statement for this dataset's staging relation.
    ///
    /// `row_seq` records staging order and backs the stable tie-break of the
    /// reconciliation step.
    pub fn staging_ddl(&self) -> String {
        let mut parts = vec!["row_seq bigint GENERATED ALWAYS AS IDENTITY".to_string()];
        parts.extend(
            self.columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.kind.sql_type())),
        );
        parts.extend(
            self.staging_checks
                .iter()
                .enumerate()
                .map(|(i, check)| {
                    format!("CONSTRAINT {}_check_{} CHECK ({})", self.staging_table, i + 1, check)
                }),
        );

        format!(
            "CREATE TEMPORARY TABLE {} (\n    {}\n) ON COMMIT DROP",
            self.staging_table,
            parts.join(",\n    ")
        )
    }
}

/// Coerce a raw field for `column` of `dataset`.
///
/// Columns the descriptor does not list fall back to the name-based rule.
pub fn coerce_field(dataset: Dataset, column: &str, raw: &str) -> TypedValue {
    let kind = dataset
        .descriptor()
        .column(column)
        .map(|c| c.kind)
        .unwrap_or_else(|| kind_for_column(column));
    coerce(raw, kind)
}

static YEAR: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::Year,
    name: "year",
    file_name: "year_unique.csv",
    staging_table: "temp_year",
    canonical_table: "bom.year",
    columns: &[int("year"), int("year_id"), int("id")],
    staging_checks: &["year IS NOT NULL", PLAUSIBLE_YEAR],
};

static WEEK: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::Week,
    name: "week",
    file_name: "week_unique.csv",
    staging_table: "temp_week",
    canonical_table: "bom.week",
    columns: &[
        int("year"),
        int("week_number"),
        int("start_day"),
        int("end_day"),
        text("start_month"),
        text("end_month"),
        text("unique_identifier"),
        text("week_id"),
        text("year_range"),
        text("joinid"),
        text("split_year"),
    ],
    staging_checks: &[PLAUSIBLE_YEAR],
};

static PARISHES: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::Parishes,
    name: "parishes",
    file_name: "parishes_unique.csv",
    staging_table: "temp_parish",
    canonical_table: "bom.parishes",
    columns: &[text("parish_name"), text("canonical_name"), int("parish_id")],
    staging_checks: &["parish_name IS NOT NULL", "canonical_name IS NOT NULL"],
};

static CHRISTENINGS: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::Christenings,
    name: "christenings",
    file_name: "christenings_by_parish.csv",
    staging_table: "temp_christening",
    canonical_table: "bom.christenings",
    columns: &[
        int("year"),
        int("week"),
        text("unique_identifier"),
        int("start_day"),
        text("start_month"),
        int("end_day"),
        text("end_month"),
        text("parish_name"),
        int("count"),
        flag("missing"),
        flag("illegible"),
        text("source"),
        text("bill_type"),
        text("joinid"),
        text("start_year"),
        text("end_year"),
        text("count_type"),
    ],
    staging_checks: &[PLAUSIBLE_YEAR],
};

static CAUSES_OF_DEATH: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::CausesOfDeath,
    name: "causes_of_death",
    file_name: "causes_of_death.csv",
    staging_table: "temp_causes_of_death",
    canonical_table: "bom.causes_of_death",
    columns: &[
        text("death"),
        int("count"),
        int("year"),
        text("joinid"),
        text("descriptive_text"),
        text("source_name"),
    ],
    staging_checks: &[],
};

static BILLS: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::Bills,
    name: "bills",
    file_name: "all_bills.csv",
    staging_table: "temp_bills",
    canonical_table: "bom.bill_of_mortality",
    columns: &[
        text("unique_identifier"),
        text("parish_name"),
        text("count_type"),
        int("count"),
        flag("missing"),
        flag("illegible"),
        text("source"),
        text("bill_type"),
        text("start_year"),
        text("end_year"),
        text("joinid"),
        int("parish_id"),
        int("year"),
        text("split_year"),
    ],
    staging_checks: &[],
};
