//! Type definitions for database catalog objects

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of catalog objects, in report precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Schema,
    Table,
    /// Columns are reported through their table; the kind exists for summary counts
    Column,
    View,
    MaterializedView,
    Index,
    Constraint,
    Trigger,
    Function,
    Sequence,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 10] = [
        ObjectKind::Schema,
        ObjectKind::Table,
        ObjectKind::Column,
        ObjectKind::View,
        ObjectKind::MaterializedView,
        ObjectKind::Index,
        ObjectKind::Constraint,
        ObjectKind::Trigger,
        ObjectKind::Function,
        ObjectKind::Sequence,
    ];

    /// Singular lowercase name, as used in XML element names
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Schema => "schema",
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::View => "view",
            ObjectKind::MaterializedView => "materialized_view",
            ObjectKind::Index => "index",
            ObjectKind::Constraint => "constraint",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Function => "function",
            ObjectKind::Sequence => "sequence",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Schema => "schemas",
            ObjectKind::Table => "tables",
            ObjectKind::Column => "columns",
            ObjectKind::View => "views",
            ObjectKind::MaterializedView => "materialized_views",
            ObjectKind::Index => "indexes",
            ObjectKind::Constraint => "constraints",
            ObjectKind::Trigger => "triggers",
            ObjectKind::Function => "functions",
            ObjectKind::Sequence => "sequences",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a catalog object within one snapshot.
///
/// `table` is set for objects whose names are only unique per table
/// (constraints, triggers); `signature` is set for functions, which may be
/// overloaded. Schemas themselves use an empty `name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    pub schema: String,
    pub table: Option<String>,
    pub name: String,
    pub signature: Option<String>,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: None,
            name: name.into(),
            signature: None,
        }
    }

    /// Identity of a schema (namespace)
    pub fn schema(schema: impl Into<String>) -> Self {
        Self::new(schema, "")
    }

    /// Identity of an object scoped to a table
    pub fn in_table(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::new(schema, name)
        }
    }

    /// Identity of a function or procedure
    pub fn with_signature(
        schema: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            signature: Some(signature.into()),
            ..Self::new(schema, name)
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.schema)?;
        if let Some(table) = &self.table {
            write!(f, ".{}", table)?;
        }
        if !self.name.is_empty() {
            write!(f, ".{}", self.name)?;
        }
        if let Some(signature) = &self.signature {
            write!(f, "({})", signature)?;
        }
        Ok(())
    }
}

impl Serialize for QualifiedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Anything stored in a [`SchemaModel`] and matched by identity
pub trait CatalogObject {
    fn identity(&self) -> &QualifiedName;
}

macro_rules! catalog_object {
    ($($ty:ty),* $(,)?) => {
        $(impl CatalogObject for $ty {
            fn identity(&self) -> &QualifiedName {
                &self.name
            }
        })*
    };
}

catalog_object!(Namespace, Table, View, MaterializedView, Index, Constraint, Trigger, Function, Sequence);

/// A complete catalog snapshot of one database
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaModel {
    pub server_version_major: i32,
    pub namespaces: Vec<Namespace>,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub materialized_views: Vec<MaterializedView>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
    pub triggers: Vec<Trigger>,
    pub functions: Vec<Function>,
    pub sequences: Vec<Sequence>,
}

impl SchemaModel {
    /// Create a new empty snapshot
    pub fn new(server_version_major: i32) -> Self {
        Self {
            server_version_major,
            ..Self::default()
        }
    }

    pub fn add_namespace(&mut self, namespace: Namespace) {
        self.namespaces.push(namespace);
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.push(table);
    }

    pub fn add_view(&mut self, view: View) {
        self.views.push(view);
    }

    pub fn add_materialized_view(&mut self, view: MaterializedView) {
        self.materialized_views.push(view);
    }

    pub fn add_index(&mut self, index: Index) {
        self.indexes.push(index);
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn add_trigger(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn add_sequence(&mut self, sequence: Sequence) {
        self.sequences.push(sequence);
    }

    /// Sort every collection by identity and each table's columns by position
    pub fn sort(&mut self) {
        fn by_identity<T: CatalogObject>(objects: &mut [T]) {
            objects.sort_by(|a, b| a.identity().cmp(b.identity()));
        }

        by_identity(&mut self.namespaces);
        by_identity(&mut self.tables);
        by_identity(&mut self.views);
        by_identity(&mut self.materialized_views);
        by_identity(&mut self.indexes);
        by_identity(&mut self.constraints);
        by_identity(&mut self.triggers);
        by_identity(&mut self.functions);
        by_identity(&mut self.sequences);

        for table in &mut self.tables {
            table.columns.sort_by_key(|c| c.position);
        }
    }

    /// Number of objects of the given kind
    pub fn count(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Schema => self.namespaces.len(),
            ObjectKind::Table => self.tables.len(),
            ObjectKind::Column => self.tables.iter().map(|t| t.columns.len()).sum(),
            ObjectKind::View => self.views.len(),
            ObjectKind::MaterializedView => self.materialized_views.len(),
            ObjectKind::Index => self.indexes.len(),
            ObjectKind::Constraint => self.constraints.len(),
            ObjectKind::Trigger => self.triggers.len(),
            ObjectKind::Function => self.functions.len(),
            ObjectKind::Sequence => self.sequences.len(),
        }
    }

    pub fn table(&self, name: &QualifiedName) -> Option<&Table> {
        self.tables.iter().find(|t| &t.name == name)
    }
}

/// A schema (namespace)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub name: QualifiedName,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            name: QualifiedName::schema(name),
        }
    }
}

/// Represents a database table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: QualifiedName,
    pub partitioned: bool,
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a new table with the given name
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            name: QualifiedName::new(schema, name),
            partitioned: false,
            columns: Vec::new(),
        }
    }

    /// Add a column to the table
    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    /// Append a column at the next position; used when building tables by hand
    pub fn with_column(mut self, name: &str, data_type: &str) -> Self {
        let position = self.columns.len() as i32 + 1;
        self.columns.push(Column::new(name, data_type).position(position));
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Identity column behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Always,
    ByDefault,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKind::Always => f.write_str("ALWAYS"),
            IdentityKind::ByDefault => f.write_str("BY DEFAULT"),
        }
    }
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, or the generation expression for generated columns
    pub default: Option<String>,
    /// Dense 1-based position, skipping dropped columns
    pub position: i32,
    pub identity: Option<IdentityKind>,
    pub generated: bool,
}

impl Column {
    /// Create a new nullable column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
            position: 0,
            identity: None,
            generated: false,
        }
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set a default value for the column
    pub fn default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    /// One-line description of the column, e.g. `integer NOT NULL DEFAULT 0`
    pub fn describe(&self) -> String {
        let mut out = self.data_type.clone();
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(identity) = self.identity {
            out.push_str(&format!(" GENERATED {} AS IDENTITY", identity));
        }
        match (&self.default, self.generated) {
            (Some(expr), true) => out.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr)),
            (Some(expr), false) => out.push_str(&format!(" DEFAULT {}", expr)),
            (None, _) => {}
        }
        out
    }
}

/// Represents a database view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct View {
    pub name: QualifiedName,
    pub definition: String,
}

/// Represents a materialized view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedView {
    pub name: QualifiedName,
    pub definition: String,
    pub populated: bool,
}

/// Represents an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    pub name: QualifiedName,
    pub table: String,
    /// Key columns or expressions in index order
    pub keys: Vec<String>,
    /// Non-key columns from `INCLUDE (...)`
    pub include: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    pub method: String,
    pub predicate: Option<String>,
}

/// Kinds of table constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    Exclusion,
}

impl ConstraintKind {
    /// Decode `pg_constraint.contype`
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(ConstraintKind::PrimaryKey),
            "f" => Some(ConstraintKind::ForeignKey),
            "u" => Some(ConstraintKind::Unique),
            "c" => Some(ConstraintKind::Check),
            "x" => Some(ConstraintKind::Exclusion),
            _ => None,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::Check => "CHECK",
            ConstraintKind::Exclusion => "EXCLUDE",
        };
        f.write_str(text)
    }
}

/// Represents a table constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    pub name: QualifiedName,
    pub kind: ConstraintKind,
    pub definition: String,
    /// `schema.table` for foreign keys
    pub referenced_table: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerTiming::Before => f.write_str("BEFORE"),
            TriggerTiming::After => f.write_str("AFTER"),
            TriggerTiming::InsteadOf => f.write_str("INSTEAD OF"),
        }
    }
}

/// Trigger events; the derived order is the canonical one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Insert => f.write_str("INSERT"),
            TriggerEvent::Update => f.write_str("UPDATE"),
            TriggerEvent::Delete => f.write_str("DELETE"),
            TriggerEvent::Truncate => f.write_str("TRUNCATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrientation {
    Row,
    Statement,
}

impl fmt::Display for TriggerOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerOrientation::Row => f.write_str("ROW"),
            TriggerOrientation::Statement => f.write_str("STATEMENT"),
        }
    }
}

/// Represents a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trigger {
    pub name: QualifiedName,
    pub timing: TriggerTiming,
    /// Kept sorted and free of duplicates
    pub events: Vec<TriggerEvent>,
    pub orientation: TriggerOrientation,
    /// Qualified name of the invoked function
    pub function: String,
}

impl Trigger {
    /// Build a trigger from the packed `pg_trigger.tgtype` bits
    pub fn from_tgtype(name: QualifiedName, tgtype: i32, function: String) -> Self {
        const ROW: i32 = 1 << 0;
        const BEFORE: i32 = 1 << 1;
        const INSERT: i32 = 1 << 2;
        const DELETE: i32 = 1 << 3;
        const UPDATE: i32 = 1 << 4;
        const TRUNCATE: i32 = 1 << 5;
        const INSTEAD: i32 = 1 << 6;

        let timing = if tgtype & INSTEAD != 0 {
            TriggerTiming::InsteadOf
        } else if tgtype & BEFORE != 0 {
            TriggerTiming::Before
        } else {
            TriggerTiming::After
        };

        let events = [
            (INSERT, TriggerEvent::Insert),
            (UPDATE, TriggerEvent::Update),
            (DELETE, TriggerEvent::Delete),
            (TRUNCATE, TriggerEvent::Truncate),
        ]
        .into_iter()
        .filter(|(bit, _)| tgtype & bit != 0)
        .map(|(_, event)| event)
        .collect();

        let orientation = if tgtype & ROW != 0 {
            TriggerOrientation::Row
        } else {
            TriggerOrientation::Statement
        };

        Self {
            name,
            timing,
            events,
            orientation,
            function,
        }
    }

    /// Events joined the way `CREATE TRIGGER` spells them
    pub fn events_text(&self) -> String {
        self.events
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

impl Volatility {
    /// Decode `pg_proc.provolatile`
    pub fn from_code(code: &str) -> Self {
        match code {
            "i" => Volatility::Immutable,
            "s" => Volatility::Stable,
            _ => Volatility::Volatile,
        }
    }
}

impl fmt::Display for Volatility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Volatility::Immutable => f.write_str("IMMUTABLE"),
            Volatility::Stable => f.write_str("STABLE"),
            Volatility::Volatile => f.write_str("VOLATILE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Function,
    Procedure,
}

impl fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutineKind::Function => f.write_str("FUNCTION"),
            RoutineKind::Procedure => f.write_str("PROCEDURE"),
        }
    }
}

/// Represents a function or procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
    /// Carries the input argument types as its signature
    pub name: QualifiedName,
    /// Full argument list including names, modes and defaults
    pub arguments: String,
    pub return_type: String,
    pub body: String,
    pub language: String,
    pub volatility: Volatility,
    pub strict: bool,
    pub security_definer: bool,
    pub kind: RoutineKind,
}

/// Represents a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sequence {
    pub name: QualifiedName,
    pub data_type: String,
    pub start: i64,
    pub min: i64,
    pub max: i64,
    pub increment: i64,
    pub cycle: bool,
}

/// Row counts for every table in scope, taken at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RowCountSnapshot {
    counts: BTreeMap<QualifiedName, i64>,
}

impl RowCountSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: QualifiedName, count: i64) {
        self.counts.insert(table, count);
    }

    pub fn get(&self, table: &QualifiedName) -> Option<i64> {
        self.counts.get(table).copied()
    }

    pub fn contains(&self, table: &QualifiedName) -> bool {
        self.counts.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Tables in identity order
    pub fn tables(&self) -> impl Iterator<Item = &QualifiedName> {
        self.counts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QualifiedName, i64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }
}

impl FromIterator<(QualifiedName, i64)> for RowCountSnapshot {
    fn from_iter<I: IntoIterator<Item = (QualifiedName, i64)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}
