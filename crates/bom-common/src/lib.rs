//! BOM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Bills of Mortality loader.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Values**: Typed staging values and the lenient text coercion rules
//!
//! # Example
//!
//! ```
//! use bom_common::value::{coerce, ColumnKind, TypedValue};
//!
//! assert_eq!(coerce("1665", ColumnKind::Integer), TypedValue::Integer(1665));
//! assert_eq!(coerce("", ColumnKind::Text), TypedValue::Null);
//! ```

pub mod error;
pub mod logging;
pub mod value;

// Re-export commonly used types
pub use error::{BomError, Result};
pub use value::{ColumnKind, TypedValue};
