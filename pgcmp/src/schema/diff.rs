//! Schema difference calculator
//!
//! Compares two catalog snapshots and reports what differs. The left side is
//! the source of truth: objects only the left side has are `Removed` from the
//! right, objects only the right side has were `Added` to it.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use indexmap::IndexMap;

use crate::schema::types::{
    CatalogObject, Column, Constraint, Function, Index, MaterializedView, Namespace, ObjectKind,
    QualifiedName, SchemaModel, Sequence, Table, Trigger, View,
};

/// How an object differs between the two sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    /// Present on the right only
    Added,
    /// Present on the left only
    Removed,
    Changed { deltas: Vec<FieldDelta> },
}

impl Change {
    /// The same change seen from the other side
    pub fn mirrored(&self) -> Change {
        match self {
            Change::Added => Change::Removed,
            Change::Removed => Change::Added,
            Change::Changed { deltas } => Change::Changed {
                deltas: deltas.iter().map(FieldDelta::mirrored).collect(),
            },
        }
    }
}

/// One differing attribute; `None` means absent on that side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDelta {
    pub field: String,
    pub left: Option<String>,
    pub right: Option<String>,
}

impl FieldDelta {
    pub fn new(field: impl Into<String>, left: Option<String>, right: Option<String>) -> Self {
        Self {
            field: field.into(),
            left,
            right,
        }
    }

    pub fn mirrored(&self) -> FieldDelta {
        FieldDelta {
            field: self.field.clone(),
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }
}

/// One reported difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub kind: ObjectKind,
    pub identity: QualifiedName,
    #[serde(flatten)]
    pub change: Change,
}

impl DiffEntry {
    pub fn new(kind: ObjectKind, identity: QualifiedName, change: Change) -> Self {
        Self {
            kind,
            identity,
            change,
        }
    }

    pub fn deltas(&self) -> &[FieldDelta] {
        match &self.change {
            Change::Changed { deltas } => deltas,
            _ => &[],
        }
    }
}

/// Per-kind tally of a [`ComparisonResult`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.changed
    }
}

/// Ordered differences between two snapshots, sorted by kind then identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ComparisonResult {
    entries: Vec<DiffEntry>,
}

impl ComparisonResult {
    /// Build a result from unordered entries
    pub fn from_entries(mut entries: Vec<DiffEntry>) -> Self {
        entries.sort_by(|a, b| (a.kind, &a.identity).cmp(&(b.kind, &b.identity)));
        Self { entries }
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries of one kind, in identity order
    pub fn of_kind(&self, kind: ObjectKind) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Tally per kind; kinds without entries are omitted
    pub fn counts(&self) -> BTreeMap<ObjectKind, ChangeCounts> {
        let mut counts: BTreeMap<ObjectKind, ChangeCounts> = BTreeMap::new();
        for entry in &self.entries {
            let tally = counts.entry(entry.kind).or_default();
            match entry.change {
                Change::Added => tally.added += 1,
                Change::Removed => tally.removed += 1,
                Change::Changed { .. } => tally.changed += 1,
            }
        }
        counts
    }
}

/// Object counts of one kind on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub kind: ObjectKind,
    pub left_count: usize,
    pub right_count: usize,
}

impl SummaryRow {
    pub fn is_different(&self) -> bool {
        self.left_count != self.right_count
    }
}

/// Count objects of every kind on both sides
pub fn summarize(left: &SchemaModel, right: &SchemaModel) -> Vec<SummaryRow> {
    ObjectKind::ALL
        .iter()
        .map(|&kind| SummaryRow {
            kind,
            left_count: left.count(kind),
            right_count: right.count(kind),
        })
        .collect()
}

/// Compare two snapshots.
///
/// Pure and deterministic. Panics if either snapshot holds two objects of the
/// same kind with the same identity.
pub fn compare(left: &SchemaModel, right: &SchemaModel) -> ComparisonResult {
    let mut entries = Vec::new();

    for kind in ObjectKind::ALL {
        match kind {
            ObjectKind::Schema => diff_objects(
                kind,
                &left.namespaces,
                &right.namespaces,
                |_: &Namespace, _: &Namespace, _: &mut Deltas| {},
                &mut entries,
            ),
            ObjectKind::Table => {
                diff_objects(kind, &left.tables, &right.tables, table_fields, &mut entries)
            }
            // Reported through the owning table
            ObjectKind::Column => {}
            ObjectKind::View => {
                diff_objects(kind, &left.views, &right.views, view_fields, &mut entries)
            }
            ObjectKind::MaterializedView => diff_objects(
                kind,
                &left.materialized_views,
                &right.materialized_views,
                materialized_view_fields,
                &mut entries,
            ),
            ObjectKind::Index => {
                diff_objects(kind, &left.indexes, &right.indexes, index_fields, &mut entries)
            }
            ObjectKind::Constraint => diff_objects(
                kind,
                &left.constraints,
                &right.constraints,
                constraint_fields,
                &mut entries,
            ),
            ObjectKind::Trigger => {
                diff_objects(kind, &left.triggers, &right.triggers, trigger_fields, &mut entries)
            }
            ObjectKind::Function => diff_objects(
                kind,
                &left.functions,
                &right.functions,
                function_fields,
                &mut entries,
            ),
            ObjectKind::Sequence => diff_objects(
                kind,
                &left.sequences,
                &right.sequences,
                sequence_fields,
                &mut entries,
            ),
        }
    }

    ComparisonResult::from_entries(entries)
}

/// Collects the deltas of one object pair
#[derive(Default)]
struct Deltas(Vec<FieldDelta>);

impl Deltas {
    fn field<T: PartialEq + Display + ?Sized>(&mut self, field: &str, left: &T, right: &T) {
        if left != right {
            self.0.push(FieldDelta::new(
                field,
                Some(left.to_string()),
                Some(right.to_string()),
            ));
        }
    }

    fn optional<T: PartialEq + Display>(
        &mut self,
        field: &str,
        left: Option<&T>,
        right: Option<&T>,
    ) {
        if left != right {
            self.0.push(FieldDelta::new(
                field,
                left.map(|v| v.to_string()),
                right.map(|v| v.to_string()),
            ));
        }
    }

    /// Element-wise comparison; `field[i]` for each differing position
    fn list(&mut self, field: &str, left: &[String], right: &[String]) {
        for i in 0..left.len().max(right.len()) {
            self.optional(&format!("{}[{}]", field, i), left.get(i), right.get(i));
        }
    }
}

fn diff_objects<T, F>(
    kind: ObjectKind,
    left: &[T],
    right: &[T],
    fields: F,
    out: &mut Vec<DiffEntry>,
) where
    T: CatalogObject,
    F: Fn(&T, &T, &mut Deltas),
{
    let left = index_by_identity(kind, left);
    let right = index_by_identity(kind, right);

    let identities: BTreeSet<&QualifiedName> = left.keys().chain(right.keys()).copied().collect();

    for identity in identities {
        let change = match (left.get(identity).copied(), right.get(identity).copied()) {
            (Some(_), None) => Change::Removed,
            (None, Some(_)) => Change::Added,
            (Some(l), Some(r)) => {
                let mut deltas = Deltas::default();
                fields(l, r, &mut deltas);
                if deltas.0.is_empty() {
                    continue;
                }
                Change::Changed { deltas: deltas.0 }
            }
            (None, None) => continue,
        };
        out.push(DiffEntry::new(kind, identity.clone(), change));
    }
}

fn index_by_identity<T: CatalogObject>(
    kind: ObjectKind,
    objects: &[T],
) -> BTreeMap<&QualifiedName, &T> {
    let mut map = BTreeMap::new();
    for object in objects {
        let identity = object.identity();
        if map.insert(identity, object).is_some() {
            panic!("duplicate {} identity in snapshot: {}", kind, identity);
        }
    }
    map
}

fn table_fields(left: &Table, right: &Table, deltas: &mut Deltas) {
    deltas.field("partitioned", &left.partitioned, &right.partitioned);

    let left_columns = columns_by_name(left);
    let right_columns = columns_by_name(right);

    // Rank of each common column among the common columns, per side
    let left_ranks = common_ranks(&left_columns, &right_columns);
    let right_ranks = common_ranks(&right_columns, &left_columns);
    let reordered = left_ranks != right_ranks;

    let names: BTreeSet<&str> = left_columns
        .keys()
        .chain(right_columns.keys())
        .copied()
        .collect();

    for name in names {
        match (left_columns.get(name), right_columns.get(name)) {
            (Some(l), Some(r)) => {
                column_fields(name, l, r, deltas);
                if reordered && left_ranks.get(name) != right_ranks.get(name) {
                    deltas.field(&format!("column {}.position", name), &l.position, &r.position);
                }
            }
            (l, r) => deltas.optional(
                &format!("column {}", name),
                l.map(|c| c.describe()).as_ref(),
                r.map(|c| c.describe()).as_ref(),
            ),
        }
    }
}

fn columns_by_name(table: &Table) -> IndexMap<&str, &Column> {
    let mut columns: Vec<&Column> = table.columns.iter().collect();
    columns.sort_by_key(|c| c.position);
    columns.into_iter().map(|c| (c.name.as_str(), c)).collect()
}

fn common_ranks<'a>(
    side: &IndexMap<&'a str, &Column>,
    other: &IndexMap<&str, &Column>,
) -> BTreeMap<&'a str, usize> {
    side.keys()
        .filter(|name| other.contains_key(*name))
        .enumerate()
        .map(|(rank, name)| (*name, rank))
        .collect()
}

fn column_fields(name: &str, left: &Column, right: &Column, deltas: &mut Deltas) {
    deltas.field(&format!("column {}.type", name), &left.data_type, &right.data_type);
    deltas.field(&format!("column {}.nullable", name), &left.nullable, &right.nullable);
    deltas.optional(
        &format!("column {}.default", name),
        left.default.as_ref(),
        right.default.as_ref(),
    );
    deltas.optional(
        &format!("column {}.identity", name),
        left.identity.as_ref(),
        right.identity.as_ref(),
    );
    deltas.field(&format!("column {}.generated", name), &left.generated, &right.generated);
}

fn view_fields(left: &View, right: &View, deltas: &mut Deltas) {
    deltas.field("definition", &left.definition, &right.definition);
}

fn materialized_view_fields(left: &MaterializedView, right: &MaterializedView, deltas: &mut Deltas) {
    deltas.field("definition", &left.definition, &right.definition);
    deltas.field("populated", &left.populated, &right.populated);
}

fn index_fields(left: &Index, right: &Index, deltas: &mut Deltas) {
    deltas.field("table", &left.table, &right.table);
    deltas.list("key", &left.keys, &right.keys);
    deltas.field("include", &left.include.join(", "), &right.include.join(", "));
    deltas.field("unique", &left.unique, &right.unique);
    deltas.field("primary", &left.primary, &right.primary);
    deltas.field("method", &left.method, &right.method);
    deltas.optional("predicate", left.predicate.as_ref(), right.predicate.as_ref());
}

fn constraint_fields(left: &Constraint, right: &Constraint, deltas: &mut Deltas) {
    deltas.field("kind", &left.kind, &right.kind);
    deltas.field("definition", &left.definition, &right.definition);
    deltas.optional(
        "referenced_table",
        left.referenced_table.as_ref(),
        right.referenced_table.as_ref(),
    );
}

fn trigger_fields(left: &Trigger, right: &Trigger, deltas: &mut Deltas) {
    deltas.field("timing", &left.timing, &right.timing);
    deltas.field("events", &left.events_text(), &right.events_text());
    deltas.field("orientation", &left.orientation, &right.orientation);
    deltas.field("function", &left.function, &right.function);
}

fn function_fields(left: &Function, right: &Function, deltas: &mut Deltas) {
    deltas.field("kind", &left.kind, &right.kind);
    deltas.field("arguments", &left.arguments, &right.arguments);
    deltas.field("return_type", &left.return_type, &right.return_type);
    deltas.field("language", &left.language, &right.language);
    deltas.field("volatility", &left.volatility, &right.volatility);
    deltas.field("strict", &left.strict, &right.strict);
    deltas.field("security_definer", &left.security_definer, &right.security_definer);
    deltas.field("body", &left.body, &right.body);
}

fn sequence_fields(left: &Sequence, right: &Sequence, deltas: &mut Deltas) {
    deltas.field("data_type", &left.data_type, &right.data_type);
    deltas.field("start", &left.start, &right.start);
    deltas.field("min", &left.min, &right.min);
    deltas.field("max", &left.max, &right.max);
    deltas.field("increment", &left.increment, &right.increment);
    deltas.field("cycle", &left.cycle, &right.cycle);
}
