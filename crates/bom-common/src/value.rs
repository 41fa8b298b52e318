//! Typed staging values
//!
//! Source extracts are plain text. Every field is coerced into a [`TypedValue`]
//! according to the [`ColumnKind`] of the column it lands in before it is
//! handed to the staging relation.
//!
//! Coercion is deliberately lenient: a field that should be an integer but
//! does not parse becomes NULL instead of failing the row. Historical
//! transcriptions contain values such as `"12?"` or `"illegible"` in count
//! columns, and the loader keeps them as missing data rather than rejecting
//! the extract. This is a known data-quality gap, not an oversight.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Text values that coerce to `true` for boolean-like columns (after trim + lowercase).
pub const ACCEPTED_TRUE_VALUES: [&str; 3] = ["true", "t", "1"];

/// NULL marker of the PostgreSQL COPY text format
pub const COPY_NULL: &str = "\\N";

/// Semantic type of a staging column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Identifiers, counts, day and week numbers
    Integer,
    /// Flags such as `missing` and `illegible`
    Boolean,
    /// Everything else, passed through unchanged
    Text,
}

impl ColumnKind {
    /// SQL type used for the staging column
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// A coerced field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedValue {
    Null,
    Integer(i32),
    Boolean(bool),
    Text(String),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Append this value to a COPY text-format buffer.
    pub fn write_copy_text(&self, out: &mut String) {
        match self {
            TypedValue::Null => out.push_str(COPY_NULL),
            TypedValue::Integer(n) => {
                let _ = write!(out, "{}", n);
            },
            TypedValue::Boolean(b) => out.push(if *b { 't' } else { 'f' }),
            TypedValue::Text(s) => escape_copy_text(s, out),
        }
    }
}

/// Coerce one raw field according to its column kind.
///
/// - empty string → NULL for every kind
/// - integer → parsed `i32`, NULL when it does not parse
/// - boolean → `true` iff the normalized text is in [`ACCEPTED_TRUE_VALUES`]
/// - text → unchanged
pub fn coerce(raw: &str, kind: ColumnKind) -> TypedValue {
    if raw.is_empty() {
        return TypedValue::Null;
    }

    match kind {
        ColumnKind::Integer => raw
            .trim()
            .parse::<i32>()
            .map(TypedValue::Integer)
            .unwrap_or(TypedValue::Null),
        ColumnKind::Boolean => {
            let normalized = raw.trim().to_ascii_lowercase();
            TypedValue::Boolean(ACCEPTED_TRUE_VALUES.contains(&normalized.as_str()))
        },
        ColumnKind::Text => TypedValue::Text(raw.to_string()),
    }
}

/// Encode one staging row as a COPY text-format line (tab separated, newline terminated).
pub fn encode_copy_row(values: &[TypedValue], out: &mut String) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        value.write_copy_text(out);
    }
    out.push('\n');
}

fn escape_copy_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_is_null_for_every_kind() {
        assert_eq!(coerce("", ColumnKind::Integer), TypedValue::Null);
        assert_eq!(coerce("", ColumnKind::Boolean), TypedValue::Null);
        assert_eq!(coerce("", ColumnKind::Text), TypedValue::Null);
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(coerce("1665", ColumnKind::Integer), TypedValue::Integer(1665));
        assert_eq!(coerce(" 42 ", ColumnKind::Integer), TypedValue::Integer(42));
        assert_eq!(coerce("-3", ColumnKind::Integer), TypedValue::Integer(-3));
    }

    #[test]
    fn test_malformed_integer_is_swallowed() {
        assert_eq!(coerce("12?", ColumnKind::Integer), TypedValue::Null);
        assert_eq!(coerce("illegible", ColumnKind::Integer), TypedValue::Null);
        assert_eq!(coerce("3.5", ColumnKind::Integer), TypedValue::Null);
        assert_eq!(coerce("99999999999", ColumnKind::Integer), TypedValue::Null);
    }

    #[test]
    fn test_boolean_accepted_set() {
        for raw in ["true", "t", "1", "TRUE", " T "] {
            assert_eq!(coerce(raw, ColumnKind::Boolean), TypedValue::Boolean(true), "{raw}");
        }
        for raw in ["false", "f", "0", "yes", "y"] {
            assert_eq!(coerce(raw, ColumnKind::Boolean), TypedValue::Boolean(false), "{raw}");
        }
    }

    #[test]
    fn test_text_passes_through_unchanged() {
        assert_eq!(
            coerce("  St Mary Woolnoth ", ColumnKind::Text),
            TypedValue::Text("  St Mary Woolnoth ".to_string())
        );
    }

    #[test]
    fn test_copy_row_encoding() {
        let mut out = String::new();
        encode_copy_row(
            &[
                TypedValue::Integer(1603),
                TypedValue::Null,
                TypedValue::Boolean(true),
                TypedValue::Text("a\tb\\c\nd".to_string()),
            ],
            &mut out,
        );
        assert_eq!(out, "1603\t\\N\tt\ta\\tb\\\\c\\nd\n");
    }

    proptest! {
        #[test]
        fn prop_integer_coercion_never_panics(raw in ".*") {
            let value = coerce(&raw, ColumnKind::Integer);
            prop_assert!(matches!(value, TypedValue::Null | TypedValue::Integer(_)));
        }

        #[test]
        fn prop_integers_round_trip(n in any::<i32>()) {
            prop_assert_eq!(coerce(&n.to_string(), ColumnKind::Integer), TypedValue::Integer(n));
        }

        #[test]
        fn prop_escaped_text_has_no_raw_separators(raw in ".+") {
            let mut out = String::new();
            TypedValue::Text(raw).write_copy_text(&mut out);
            prop_assert!(!out.contains('\t'));
            prop_assert!(!out.contains('\n'));
            prop_assert!(!out.contains('\r'));
        }
    }
}
