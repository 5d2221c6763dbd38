//! Row-count comparison between two snapshots

use serde::Serialize;
use std::collections::BTreeSet;

use crate::schema::diff::{Change, DiffEntry, FieldDelta};
use crate::schema::types::{ObjectKind, QualifiedName, RowCountSnapshot};

/// Counts for one table on both sides; `None` when the table is missing there
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowCountEntry {
    pub table: QualifiedName,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl RowCountEntry {
    pub fn differs(&self) -> bool {
        self.before != self.after
    }

    /// `after - before` when the table exists on both sides
    pub fn change(&self) -> Option<i64> {
        Some(self.after? - self.before?)
    }
}

/// Per-table row counts of two snapshots, in identity order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowCountDelta {
    entries: Vec<RowCountEntry>,
}

impl RowCountDelta {
    /// Every table present in either snapshot
    pub fn between(before: &RowCountSnapshot, after: &RowCountSnapshot) -> Self {
        let tables: BTreeSet<&QualifiedName> = before.tables().chain(after.tables()).collect();
        Self::from_tables(tables, before, after)
    }

    /// Only tables present in both snapshots
    pub fn common_tables(left: &RowCountSnapshot, right: &RowCountSnapshot) -> Self {
        let tables: BTreeSet<&QualifiedName> =
            left.tables().filter(|t| right.contains(t)).collect();
        Self::from_tables(tables, left, right)
    }

    fn from_tables(
        tables: BTreeSet<&QualifiedName>,
        before: &RowCountSnapshot,
        after: &RowCountSnapshot,
    ) -> Self {
        let entries = tables
            .into_iter()
            .map(|table| RowCountEntry {
                table: table.clone(),
                before: before.get(table),
                after: after.get(table),
            })
            .collect();
        Self { entries }
    }

    /// All compared tables, including unchanged ones
    pub fn entries(&self) -> &[RowCountEntry] {
        &self.entries
    }

    pub fn changed(&self) -> impl Iterator<Item = &RowCountEntry> {
        self.entries.iter().filter(|e| e.differs())
    }

    pub fn is_empty(&self) -> bool {
        self.changed().next().is_none()
    }

    /// Differences in the same shape as schema differences
    pub fn differences(&self) -> Vec<DiffEntry> {
        self.changed()
            .map(|entry| {
                let change = match (entry.before, entry.after) {
                    (Some(_), None) => Change::Removed,
                    (None, Some(_)) => Change::Added,
                    (before, after) => Change::Changed {
                        deltas: vec![FieldDelta::new(
                            "row_count",
                            before.map(|c| c.to_string()),
                            after.map(|c| c.to_string()),
                        )],
                    },
                };
                DiffEntry::new(ObjectKind::Table, entry.table.clone(), change)
            })
            .collect()
    }
}
