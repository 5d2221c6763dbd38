//! Trial application of SQL scripts
//!
//! A script is executed inside a transaction that is always rolled back, so
//! the target database is left exactly as it was found. Scripts that manage
//! transactions themselves are refused before anything runs.

use sqlx::{Executor, PgConnection};
use std::time::Duration;

use crate::config::SchemaFilter;
use crate::db::connection::DatabaseConnection;
use crate::error::{Error, Result};
use crate::schema::analyzer::{extract, set_statement_timeout, snapshot_row_counts};
use crate::schema::row_counts::RowCountDelta;
use crate::schema::types::{RowCountSnapshot, SchemaModel};
use crate::utils::normalize::split_statements;

/// What was observed inside the rolled-back transaction
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub before: RowCountSnapshot,
    pub after: RowCountSnapshot,
    /// Schema as it looked after the script, when requested
    pub schema: Option<SchemaModel>,
}

impl SandboxOutcome {
    pub fn delta(&self) -> RowCountDelta {
        RowCountDelta::between(&self.before, &self.after)
    }
}

/// Runs scripts against one database without ever committing
pub struct TransactionSandbox<'a> {
    connection: &'a DatabaseConnection,
    filter: SchemaFilter,
    statement_timeout: Option<Duration>,
}

impl<'a> TransactionSandbox<'a> {
    pub fn new(connection: &'a DatabaseConnection, filter: SchemaFilter) -> Self {
        Self {
            connection,
            filter,
            statement_timeout: None,
        }
    }

    /// Bound every statement in the transaction, the script included
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Apply `script` and report how row counts changed
    pub async fn try_apply(&self, script: &str) -> Result<RowCountDelta> {
        let outcome = self.apply(script).await?;
        Ok(outcome.delta())
    }

    /// Apply `script` and keep both snapshots
    pub async fn apply(&self, script: &str) -> Result<SandboxOutcome> {
        self.run(script, false).await
    }

    /// Apply `script`, then also extract the resulting schema before rolling back
    pub async fn try_apply_and_extract(&self, script: &str) -> Result<SandboxOutcome> {
        self.run(script, true).await
    }

    async fn run(&self, script: &str, extract_schema: bool) -> Result<SandboxOutcome> {
        if let Some(statement) = transaction_control(script) {
            return Err(Error::SqlApplyError(format!(
                "script contains transaction control statement `{}`; remove it and let the sandbox own the transaction",
                statement
            )));
        }

        let label = self.connection.label();
        let mut tx = self.connection.pool().begin().await?;
        tracing::debug!(database = %label, "Sandbox transaction started");

        // The transaction rolls back on drop if this future is cancelled
        let result = trial(
            &mut tx,
            script,
            &self.filter,
            self.statement_timeout,
            extract_schema,
        )
        .await;

        match (tx.rollback().await, result) {
            (Ok(()), result) => {
                tracing::info!(database = %label, ok = result.is_ok(), "Sandbox transaction rolled back");
                result
            }
            (Err(e), Ok(_)) => Err(Error::from(e).context("rolling back sandbox transaction")),
            (Err(e), Err(original)) => {
                tracing::warn!(database = %label, error = %e, "Rollback after failed script also failed");
                Err(original)
            }
        }
    }
}

async fn trial(
    conn: &mut PgConnection,
    script: &str,
    filter: &SchemaFilter,
    statement_timeout: Option<Duration>,
    extract_schema: bool,
) -> Result<SandboxOutcome> {
    // Both snapshots must each see a single instant
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *conn)
        .await?;
    set_statement_timeout(conn, statement_timeout).await?;

    let before = snapshot_row_counts(conn, filter).await?;
    tracing::debug!(tables = before.len(), "Row counts before script");

    // A bare &str goes through the simple query protocol, which accepts
    // several statements in one string
    let applied = (&mut *conn).execute(script).await.map_err(Error::apply)?;
    tracing::info!(rows_affected = applied.rows_affected(), "Script applied");

    let after = snapshot_row_counts(conn, filter).await?;
    tracing::debug!(tables = after.len(), "Row counts after script");

    let schema = if extract_schema {
        Some(extract(conn, filter).await?)
    } else {
        None
    };

    Ok(SandboxOutcome {
        before,
        after,
        schema,
    })
}

/// First top-level statement that would end or replace the enclosing transaction.
///
/// Statements inside a `BEGIN ATOMIC ... END` routine body are skipped.
fn transaction_control(script: &str) -> Option<String> {
    let mut atomic_body = false;

    for statement in split_statements(script) {
        let words: Vec<String> = statement
            .split_whitespace()
            .map(|w| w.to_ascii_uppercase())
            .collect();
        let first = words.first().map(String::as_str).unwrap_or("");
        let second = words.get(1).map(String::as_str).unwrap_or("");

        if atomic_body {
            if words.len() == 1 && first == "END" {
                atomic_body = false;
            }
            continue;
        }

        let controls = match (first, second) {
            ("ROLLBACK", "TO") => false,
            ("BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "ABORT", _) => true,
            ("START" | "PREPARE", "TRANSACTION") => true,
            _ => false,
        };
        if controls {
            return Some(statement);
        }

        let opens_atomic = first == "CREATE"
            && words.windows(2).any(|w| w[0] == "BEGIN" && w[1] == "ATOMIC")
            && words.last().map(String::as_str) != Some("END");
        if opens_atomic {
            atomic_body = true;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("BEGIN; INSERT INTO t VALUES (1); COMMIT;", "BEGIN")]
    #[case("insert into t values (1);\ncommit", "commit")]
    #[case("START TRANSACTION ISOLATION LEVEL SERIALIZABLE; SELECT 1", "START TRANSACTION ISOLATION LEVEL SERIALIZABLE")]
    #[case("UPDATE t SET a = 1; END", "END")]
    #[case("DELETE FROM t; ROLLBACK", "ROLLBACK")]
    #[case("SELECT 1; -- done\nabort;", "abort")]
    #[case("PREPARE TRANSACTION 'x'", "PREPARE TRANSACTION 'x'")]
    #[case("COMMIT PREPARED 'x'", "COMMIT PREPARED 'x'")]
    fn transaction_control_is_detected(#[case] script: &str, #[case] expected: &str) {
        assert_eq!(transaction_control(script).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("INSERT INTO t VALUES ('COMMIT; BEGIN')")]
    #[case("CREATE FUNCTION f() RETURNS trigger AS $$ BEGIN RETURN NEW; END $$ LANGUAGE plpgsql")]
    #[case("DO $$ BEGIN PERFORM 1; END $$")]
    #[case("SAVEPOINT s; UPDATE t SET a = 1; ROLLBACK TO SAVEPOINT s; RELEASE SAVEPOINT s")]
    #[case("PREPARE q AS SELECT 1; EXECUTE q")]
    #[case("/* COMMIT; */ SELECT 1")]
    #[case("CREATE FUNCTION f() RETURNS int LANGUAGE sql BEGIN ATOMIC SELECT 1; SELECT 2; END; SELECT 3")]
    #[case("ALTER TABLE t ADD COLUMN \"begin\" int")]
    fn ordinary_statements_pass(#[case] script: &str) {
        assert_eq!(transaction_control(script), None);
    }

    #[test]
    fn statements_after_an_atomic_body_are_checked() {
        let script = "CREATE FUNCTION f() RETURNS int LANGUAGE sql BEGIN ATOMIC SELECT 1; END; COMMIT";
        assert_eq!(transaction_control(script).as_deref(), Some("COMMIT"));
    }
}
