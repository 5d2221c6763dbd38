//! Database schema analyzer
//!
//! Reads the PostgreSQL system catalogs and builds a normalized
//! [`SchemaModel`]. Every query is scoped to the non-system schemas allowed by
//! the [`SchemaFilter`], and runs on the connection it is handed so that
//! callers holding a transaction see their own uncommitted state.

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::{FromRow, PgConnection};
use std::time::Duration;

use crate::config::SchemaFilter;
use crate::db::connection::DatabaseConnection;
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Constraint, ConstraintKind, Function, IdentityKind, Index, MaterializedView,
    Namespace, QualifiedName, RoutineKind, RowCountSnapshot, SchemaModel, Sequence, Table,
    Trigger, View, Volatility,
};
use crate::utils::normalize::{
    normalize_constraint_definition, normalize_default, normalize_expression, normalize_optional,
    normalize_type_name,
};

/// Schema analyzer trait
#[async_trait]
pub trait Analyzer {
    /// Analyze the whole catalog in scope
    async fn analyze_schema(&mut self) -> Result<SchemaModel>;

    /// Schemas in scope, already filtered
    async fn analyze_namespaces(&mut self) -> Result<Vec<Namespace>>;

    /// Analyze table definitions, columns included
    async fn analyze_tables(&mut self, schemas: &[String]) -> Result<Vec<Table>>;

    /// Analyze view and materialized view definitions
    async fn analyze_views(
        &mut self,
        schemas: &[String],
    ) -> Result<(Vec<View>, Vec<MaterializedView>)>;

    async fn analyze_indexes(&mut self, schemas: &[String]) -> Result<Vec<Index>>;

    async fn analyze_constraints(&mut self, schemas: &[String]) -> Result<Vec<Constraint>>;

    async fn analyze_triggers(&mut self, schemas: &[String]) -> Result<Vec<Trigger>>;

    async fn analyze_functions(&mut self, schemas: &[String]) -> Result<Vec<Function>>;

    async fn analyze_sequences(&mut self, schemas: &[String]) -> Result<Vec<Sequence>>;
}

/// Schema analyzer for one side of the comparison
pub struct SchemaAnalyzer {
    connection: DatabaseConnection,
    filter: SchemaFilter,
    statement_timeout: Option<Duration>,
}

impl SchemaAnalyzer {
    /// Create a new schema analyzer
    pub fn new(connection: DatabaseConnection, filter: SchemaFilter) -> Self {
        Self {
            connection,
            filter,
            statement_timeout: None,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Extract a snapshot inside a read-only repeatable-read transaction
    pub async fn analyze(&self) -> Result<SchemaModel> {
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let result = async {
            set_statement_timeout(&mut tx, self.statement_timeout).await?;
            extract(&mut tx, &self.filter).await
        }
        .await;

        if let Err(e) = tx.rollback().await {
            tracing::warn!(database = %self.connection.label(), error = %e, "Rollback of read-only snapshot failed");
        }

        let model = result.map_err(|e| e.context(self.connection.label()))?;
        tracing::info!(
            database = %self.connection.label(),
            tables = model.tables.len(),
            views = model.views.len(),
            functions = model.functions.len(),
            "Extracted schema"
        );
        Ok(model)
    }

    /// Row counts of every table in scope, all taken from one snapshot
    pub async fn row_counts(&self) -> Result<RowCountSnapshot> {
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let result = async {
            set_statement_timeout(&mut tx, self.statement_timeout).await?;
            snapshot_row_counts(&mut tx, &self.filter).await
        }
        .await;

        if let Err(e) = tx.rollback().await {
            tracing::warn!(database = %self.connection.label(), error = %e, "Rollback of read-only snapshot failed");
        }

        result.map_err(|e| e.context(self.connection.label()))
    }

    pub async fn server_version(&self) -> Result<i32> {
        let mut conn = self.connection.pool().acquire().await?;
        server_version_major(&mut conn).await
    }
}

/// Extract a snapshot on a connection the caller already controls
pub async fn extract(conn: &mut PgConnection, filter: &SchemaFilter) -> Result<SchemaModel> {
    PostgresAnalyzer { conn, filter }.analyze_schema().await
}

/// Major version of the server, e.g. `16`
pub async fn server_version_major(conn: &mut PgConnection) -> Result<i32> {
    let version: i32 =
        sqlx::query_scalar("SELECT current_setting('server_version_num')::int4 / 10000")
            .fetch_one(conn)
            .await?;
    Ok(version)
}

/// Count the rows of one table as seen by `conn`
pub async fn count_rows(conn: &mut PgConnection, table: &QualifiedName) -> Result<i64> {
    let sql = format!(
        "SELECT count(*) FROM {}.{}",
        quote_ident(&table.schema),
        quote_ident(&table.name)
    );

    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(conn)
        .await
        .map_err(|e| Error::from(e).context(&format!("counting rows of {}", table)))
}

/// Count the rows of every table in scope
pub async fn snapshot_row_counts(
    conn: &mut PgConnection,
    filter: &SchemaFilter,
) -> Result<RowCountSnapshot> {
    let schemas: Vec<String> = PostgresAnalyzer {
        conn: &mut *conn,
        filter,
    }
    .analyze_namespaces()
    .await?
    .into_iter()
    .map(|n| n.name.schema)
    .collect();

    let tables: Vec<TableRow> = sqlx::query_as(TABLES_SQL)
        .bind(&schemas)
        .fetch_all(&mut *conn)
        .await?;

    let mut snapshot = RowCountSnapshot::new();
    for row in tables {
        let table = QualifiedName::new(row.schema_name, row.table_name);
        let count = count_rows(conn, &table).await?;
        snapshot.insert(table, count);
    }

    tracing::debug!(tables = snapshot.len(), "Counted rows");
    Ok(snapshot)
}

/// Apply a transaction-local `statement_timeout`
pub async fn set_statement_timeout(
    conn: &mut PgConnection,
    timeout: Option<Duration>,
) -> Result<()> {
    if let Some(timeout) = timeout {
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", timeout.as_millis()))
            .execute(conn)
            .await?;
    }
    Ok(())
}

/// Quote an identifier the way `quote_ident` does, unconditionally
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// Row types for catalog queries

#[derive(FromRow)]
struct NamespaceRow {
    schema_name: String,
}

#[derive(FromRow)]
struct TableRow {
    schema_name: String,
    table_name: String,
    partitioned: bool,
}

#[derive(FromRow)]
struct ColumnRow {
    schema_name: String,
    table_name: String,
    column_name: String,
    data_type: String,
    nullable: bool,
    column_default: Option<String>,
    position: i32,
    identity: String,
    generated: String,
}

#[derive(FromRow)]
struct ViewRow {
    schema_name: String,
    view_name: String,
    kind: String,
    definition: Option<String>,
    populated: bool,
}

#[derive(FromRow)]
struct IndexRow {
    schema_name: String,
    index_name: String,
    table_name: String,
    keys: Vec<String>,
    include: Vec<String>,
    is_unique: bool,
    is_primary: bool,
    method: String,
    predicate: Option<String>,
}

#[derive(FromRow)]
struct ConstraintRow {
    schema_name: String,
    table_name: String,
    constraint_name: String,
    kind: String,
    definition: String,
    referenced_table: Option<String>,
}

#[derive(FromRow)]
struct TriggerRow {
    schema_name: String,
    table_name: String,
    trigger_name: String,
    tgtype: i32,
    function_name: String,
}

#[derive(FromRow)]
struct FunctionRow {
    schema_name: String,
    function_name: String,
    signature: String,
    arguments: String,
    return_type: String,
    body: Option<String>,
    language: String,
    volatility: String,
    strict: bool,
    security_definer: bool,
    kind: String,
}

#[derive(FromRow)]
struct SequenceRow {
    schema_name: String,
    sequence_name: String,
    data_type: String,
    start_value: i64,
    min_value: i64,
    max_value: i64,
    increment: i64,
    cycle: bool,
}

const NAMESPACES_SQL: &str = r#"
    SELECT n.nspname::text AS schema_name
    FROM pg_catalog.pg_namespace n
    WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg\_toast%'
      AND n.nspname NOT LIKE 'pg\_temp\_%'
    ORDER BY n.nspname
"#;

const TABLES_SQL: &str = r#"
    SELECT n.nspname::text AS schema_name,
           c.relname::text AS table_name,
           c.relkind = 'p' AS partitioned
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname::text = ANY($1)
    ORDER BY 1, 2
"#;

/// PostgreSQL catalog analyzer over a borrowed connection
struct PostgresAnalyzer<'c> {
    conn: &'c mut PgConnection,
    filter: &'c SchemaFilter,
}

#[async_trait]
impl<'c> Analyzer for PostgresAnalyzer<'c> {
    async fn analyze_schema(&mut self) -> Result<SchemaModel> {
        let version = server_version_major(self.conn).await?;
        let mut model = SchemaModel::new(version);

        let namespaces = self.analyze_namespaces().await?;
        let schemas: Vec<String> = namespaces.iter().map(|n| n.name.schema.clone()).collect();
        for namespace in namespaces {
            model.add_namespace(namespace);
        }

        for table in self.analyze_tables(&schemas).await? {
            model.add_table(table);
        }

        let (views, materialized_views) = self.analyze_views(&schemas).await?;
        for view in views {
            model.add_view(view);
        }
        for view in materialized_views {
            model.add_materialized_view(view);
        }

        for index in self.analyze_indexes(&schemas).await? {
            model.add_index(index);
        }
        for constraint in self.analyze_constraints(&schemas).await? {
            model.add_constraint(constraint);
        }
        for trigger in self.analyze_triggers(&schemas).await? {
            model.add_trigger(trigger);
        }
        for function in self.analyze_functions(&schemas).await? {
            model.add_function(function);
        }
        for sequence in self.analyze_sequences(&schemas).await? {
            model.add_sequence(sequence);
        }

        model.sort();
        Ok(model)
    }

    async fn analyze_namespaces(&mut self) -> Result<Vec<Namespace>> {
        let rows: Vec<NamespaceRow> = sqlx::query_as(NAMESPACES_SQL)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter(|row| self.filter.allows(&row.schema_name))
            .map(|row| Namespace::new(&row.schema_name))
            .collect())
    }

    async fn analyze_tables(&mut self, schemas: &[String]) -> Result<Vec<Table>> {
        let table_rows: Vec<TableRow> = sqlx::query_as(TABLES_SQL)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut tables: IndexMap<(String, String), Table> = table_rows
            .into_iter()
            .map(|row| {
                let mut table = Table::new(&row.schema_name, &row.table_name);
                table.partitioned = row.partitioned;
                ((row.schema_name, row.table_name), table)
            })
            .collect();

        // Positions are renumbered so dropped columns leave no gaps
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS table_name,
                   a.attname::text AS column_name,
                   pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
                   NOT a.attnotnull AS nullable,
                   pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS column_default,
                   (row_number() OVER (PARTITION BY a.attrelid ORDER BY a.attnum))::int4 AS position,
                   a.attidentity::text AS identity,
                   a.attgenerated::text AS generated
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE c.relkind IN ('r', 'p')
              AND a.attnum > 0
              AND NOT a.attisdropped
              AND n.nspname::text = ANY($1)
            ORDER BY 1, 2, a.attnum
        "#;

        let column_rows: Vec<ColumnRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        for col in column_rows {
            let Some(table) = tables.get_mut(&(col.schema_name, col.table_name)) else {
                continue;
            };

            let identity = match col.identity.as_str() {
                "a" => Some(IdentityKind::Always),
                "d" => Some(IdentityKind::ByDefault),
                _ => None,
            };

            table.add_column(Column {
                name: col.column_name,
                data_type: normalize_type_name(&col.data_type),
                nullable: col.nullable,
                default: normalize_default(col.column_default.as_deref()),
                position: col.position,
                identity,
                generated: !col.generated.is_empty(),
            });
        }

        Ok(tables.into_values().collect())
    }

    async fn analyze_views(
        &mut self,
        schemas: &[String],
    ) -> Result<(Vec<View>, Vec<MaterializedView>)> {
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS view_name,
                   c.relkind::text AS kind,
                   pg_catalog.pg_get_viewdef(c.oid, true) AS definition,
                   c.relispopulated AS populated
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('v', 'm')
              AND n.nspname::text = ANY($1)
        "#;

        let rows: Vec<ViewRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut views = Vec::new();
        let mut materialized_views = Vec::new();
        for row in rows {
            let name = QualifiedName::new(row.schema_name, row.view_name);
            let definition = normalize_view_definition(row.definition.as_deref().unwrap_or(""));
            if row.kind == "m" {
                materialized_views.push(MaterializedView {
                    name,
                    definition,
                    populated: row.populated,
                });
            } else {
                views.push(View { name, definition });
            }
        }

        Ok((views, materialized_views))
    }

    async fn analyze_indexes(&mut self, schemas: &[String]) -> Result<Vec<Index>> {
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   ic.relname::text AS index_name,
                   tc.relname::text AS table_name,
                   ARRAY(
                       SELECT pg_catalog.pg_get_indexdef(i.indexrelid, k, true)
                       FROM generate_series(1, i.indnkeyatts::int4) AS k
                       ORDER BY k
                   ) AS keys,
                   ARRAY(
                       SELECT pg_catalog.pg_get_indexdef(i.indexrelid, k, true)
                       FROM generate_series(i.indnkeyatts::int4 + 1, i.indnatts::int4) AS k
                       ORDER BY k
                   ) AS include,
                   i.indisunique AS is_unique,
                   i.indisprimary AS is_primary,
                   am.amname::text AS method,
                   pg_catalog.pg_get_expr(i.indpred, i.indrelid, true) AS predicate
            FROM pg_catalog.pg_index i
            JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
            JOIN pg_catalog.pg_class tc ON tc.oid = i.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = ic.relnamespace
            JOIN pg_catalog.pg_am am ON am.oid = ic.relam
            WHERE n.nspname::text = ANY($1)
              AND tc.relkind IN ('r', 'p', 'm')
        "#;

        let rows: Vec<IndexRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Index {
                name: QualifiedName::new(row.schema_name, row.index_name),
                table: row.table_name,
                keys: row.keys.iter().map(|k| normalize_expression(k)).collect(),
                include: row.include.iter().map(|k| normalize_expression(k)).collect(),
                unique: row.is_unique,
                primary: row.is_primary,
                method: row.method,
                predicate: normalize_optional(row.predicate.as_deref()),
            })
            .collect())
    }

    async fn analyze_constraints(&mut self, schemas: &[String]) -> Result<Vec<Constraint>> {
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS table_name,
                   con.conname::text AS constraint_name,
                   con.contype::text AS kind,
                   pg_catalog.pg_get_constraintdef(con.oid, true) AS definition,
                   CASE WHEN con.contype = 'f'
                        THEN fn.nspname::text || '.' || fc.relname::text
                   END AS referenced_table
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
            LEFT JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
            WHERE con.contype IN ('p', 'f', 'u', 'c', 'x')
              AND n.nspname::text = ANY($1)
        "#;

        let rows: Vec<ConstraintRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut constraints = Vec::with_capacity(rows.len());
        for row in rows {
            let kind = ConstraintKind::from_code(&row.kind).ok_or_else(|| {
                Error::QueryError(format!(
                    "unknown constraint type '{}' on {}",
                    row.kind, row.constraint_name
                ))
            })?;

            constraints.push(Constraint {
                name: QualifiedName::in_table(row.schema_name, row.table_name, row.constraint_name),
                kind,
                definition: normalize_constraint_definition(&row.definition),
                referenced_table: row.referenced_table,
            });
        }

        Ok(constraints)
    }

    async fn analyze_triggers(&mut self, schemas: &[String]) -> Result<Vec<Trigger>> {
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS table_name,
                   t.tgname::text AS trigger_name,
                   t.tgtype::int4 AS tgtype,
                   pn.nspname::text || '.' || p.proname::text AS function_name
            FROM pg_catalog.pg_trigger t
            JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_proc p ON p.oid = t.tgfoid
            JOIN pg_catalog.pg_namespace pn ON pn.oid = p.pronamespace
            WHERE NOT t.tgisinternal
              AND n.nspname::text = ANY($1)
        "#;

        let rows: Vec<TriggerRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                Trigger::from_tgtype(
                    QualifiedName::in_table(row.schema_name, row.table_name, row.trigger_name),
                    row.tgtype,
                    row.function_name,
                )
            })
            .collect())
    }

    async fn analyze_functions(&mut self, schemas: &[String]) -> Result<Vec<Function>> {
        // Functions installed by extensions belong to the extension, not the schema
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   p.proname::text AS function_name,
                   pg_catalog.oidvectortypes(p.proargtypes) AS signature,
                   pg_catalog.pg_get_function_arguments(p.oid) AS arguments,
                   COALESCE(pg_catalog.pg_get_function_result(p.oid), '') AS return_type,
                   p.prosrc AS body,
                   l.lanname::text AS language,
                   p.provolatile::text AS volatility,
                   p.proisstrict AS strict,
                   p.prosecdef AS security_definer,
                   p.prokind::text AS kind
            FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
            JOIN pg_catalog.pg_language l ON l.oid = p.prolang
            WHERE p.prokind IN ('f', 'p')
              AND n.nspname::text = ANY($1)
              AND NOT EXISTS (
                  SELECT 1 FROM pg_catalog.pg_depend d
                  WHERE d.classid = 'pg_catalog.pg_proc'::regclass
                    AND d.objid = p.oid
                    AND d.deptype = 'e'
              )
        "#;

        let rows: Vec<FunctionRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Function {
                name: QualifiedName::with_signature(
                    row.schema_name,
                    row.function_name,
                    normalize_type_name(&row.signature),
                ),
                arguments: normalize_expression(&row.arguments),
                return_type: normalize_type_name(&row.return_type),
                body: normalize_expression(row.body.as_deref().unwrap_or("")),
                language: row.language,
                volatility: Volatility::from_code(&row.volatility),
                strict: row.strict,
                security_definer: row.security_definer,
                kind: if row.kind == "p" {
                    RoutineKind::Procedure
                } else {
                    RoutineKind::Function
                },
            })
            .collect())
    }

    async fn analyze_sequences(&mut self, schemas: &[String]) -> Result<Vec<Sequence>> {
        let sql = r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS sequence_name,
                   pg_catalog.format_type(s.seqtypid, NULL) AS data_type,
                   s.seqstart AS start_value,
                   s.seqmin AS min_value,
                   s.seqmax AS max_value,
                   s.seqincrement AS increment,
                   s.seqcycle AS cycle
            FROM pg_catalog.pg_sequence s
            JOIN pg_catalog.pg_class c ON c.oid = s.seqrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname::text = ANY($1)
        "#;

        let rows: Vec<SequenceRow> = sqlx::query_as(sql)
            .bind(schemas)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Sequence {
                name: QualifiedName::new(row.schema_name, row.sequence_name),
                data_type: normalize_type_name(&row.data_type),
                start: row.start_value,
                min: row.min_value,
                max: row.max_value,
                increment: row.increment,
                cycle: row.cycle,
            })
            .collect())
    }
}

/// View definitions end with a `;` that some server versions omit
fn normalize_view_definition(definition: &str) -> String {
    normalize_expression(definition.trim().trim_end_matches(';'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_always_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("Order Items"), "\"Order Items\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn trailing_semicolons_do_not_affect_view_definitions() {
        assert_eq!(
            normalize_view_definition(" SELECT id\n   FROM users;"),
            normalize_view_definition("SELECT id FROM users")
        );
    }
}
