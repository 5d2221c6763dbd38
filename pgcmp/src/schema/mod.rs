//! Schema module for pgcmp
//!
//! This module handles catalog extraction and comparison.

pub mod analyzer;
pub mod diff;
pub mod row_counts;
pub mod types;

// Re-export key types
pub use analyzer::{count_rows, extract, snapshot_row_counts, Analyzer, SchemaAnalyzer};
pub use diff::{compare, summarize, Change, ComparisonResult, DiffEntry, FieldDelta, SummaryRow};
pub use row_counts::{RowCountDelta, RowCountEntry};
pub use types::{
    Column, Constraint, ConstraintKind, Function, Index, MaterializedView, Namespace, ObjectKind,
    QualifiedName, RowCountSnapshot, SchemaModel, Sequence, Table, Trigger, View,
};
