//! pgcmp: compare the schemas and row counts of two PostgreSQL databases
//!
//! The left database is the source of truth and the right database is the one
//! being checked. A migration script can be trial-applied to the right side
//! inside a transaction that is always rolled back.

pub mod config;
pub mod db;
pub mod error;
pub mod report;
pub mod schema;
pub mod utils;

use std::future::Future;

// Re-export main types for easier access
pub use config::Config;
pub use db::connection::DatabaseConnection;
pub use db::sandbox::{SandboxOutcome, TransactionSandbox};
pub use error::{Error, Result};
pub use report::{ComparisonReport, OutputFormat};
pub use schema::analyzer::SchemaAnalyzer;
pub use schema::diff::{compare, ComparisonResult};
pub use schema::row_counts::RowCountDelta;
pub use schema::types::SchemaModel;

use report::{DatabaseInfo, RowCountMode};
use schema::diff::summarize;

/// No differences were found
pub const EXIT_NO_DIFFERENCES: i32 = 0;
/// The comparison could not be completed
pub const EXIT_ERROR: i32 = 1;
/// Schema or row-count differences were found
pub const EXIT_DIFFERENCES: i32 = 2;

/// The main client for comparing two databases
pub struct PgCmpClient {
    config: Config,
    left: DatabaseConnection,
    right: DatabaseConnection,
}

impl PgCmpClient {
    /// Connect to both databases, left first
    pub async fn connect(left_url: &str, right_url: &str, config: Config) -> Result<Self> {
        let left = DatabaseConnection::connect(left_url, &config.database)
            .await
            .map_err(|e| e.context("left database"))?;
        let right = DatabaseConnection::connect(right_url, &config.database)
            .await
            .map_err(|e| e.context("right database"))?;

        Ok(Self::from_connections(left, right, config))
    }

    pub fn from_connections(
        left: DatabaseConnection,
        right: DatabaseConnection,
        config: Config,
    ) -> Self {
        Self {
            config,
            left,
            right,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn analyzer(&self, connection: &DatabaseConnection) -> SchemaAnalyzer {
        SchemaAnalyzer::new(connection.clone(), self.config.comparison.schema_filter())
            .with_statement_timeout(self.config.comparison.statement_timeout())
    }

    fn sandbox(&self) -> TransactionSandbox<'_> {
        TransactionSandbox::new(&self.right, self.config.comparison.schema_filter())
            .with_statement_timeout(self.config.comparison.statement_timeout())
    }

    /// Run two independent operations, concurrently unless configured otherwise.
    /// The first failure is returned and the other operation is dropped.
    async fn join<A, B>(
        &self,
        a: impl Future<Output = Result<A>>,
        b: impl Future<Output = Result<B>>,
    ) -> Result<(A, B)> {
        if self.config.comparison.concurrent_extraction {
            tokio::try_join!(a, b)
        } else {
            let a = a.await?;
            let b = b.await?;
            Ok((a, b))
        }
    }

    /// Extract both schemas
    pub async fn extract_both(&self) -> Result<(SchemaModel, SchemaModel)> {
        let left = self.analyzer(&self.left);
        let right = self.analyzer(&self.right);
        self.join(left.analyze(), right.analyze()).await
    }

    /// Compare the two schemas as they are now
    pub async fn compare_schemas(&self) -> Result<ComparisonReport> {
        let (left, right) = self.extract_both().await?;
        Ok(self.schema_report(&left, &right))
    }

    /// Trial-apply `script` to the right database and compare the resulting
    /// schema against the left one; row-count changes made by the script are
    /// included in the report
    pub async fn validate_migration(&self, script: &str) -> Result<ComparisonReport> {
        let left = self.analyzer(&self.left);
        let sandbox = self.sandbox();
        let right = async {
            sandbox
                .try_apply_and_extract(script)
                .await
                .map_err(|e| e.context("right database"))
        };

        let (left_model, outcome) = self.join(left.analyze(), right).await?;
        let right_model = outcome.schema.as_ref().ok_or_else(|| {
            Error::QueryError("sandbox returned no schema snapshot".to_string())
        })?;

        let delta = outcome.delta();
        tracing::info!(
            tables = delta.entries().len(),
            changed = delta.changed().count(),
            "Sandbox row counts"
        );

        Ok(self
            .schema_report(&left_model, right_model)
            .with_row_counts(RowCountMode::Migration, delta))
    }

    /// Compare row counts of the tables both databases have. With a script,
    /// the right side is counted after trial-applying it.
    pub async fn compare_row_counts(&self, script: Option<&str>) -> Result<ComparisonReport> {
        let left = self.analyzer(&self.left);
        let right = self.analyzer(&self.right);
        let sandbox = self.sandbox();

        let right_counts = async {
            match script {
                Some(script) => sandbox
                    .apply(script)
                    .await
                    .map(|outcome| outcome.after)
                    .map_err(|e| e.context("right database")),
                None => right.row_counts().await,
            }
        };

        let (left_counts, right_counts) = self.join(left.row_counts(), right_counts).await?;
        let (left_version, right_version) =
            self.join(left.server_version(), right.server_version()).await?;

        let delta = RowCountDelta::common_tables(&left_counts, &right_counts);
        let report = ComparisonReport::new(
            self.info(&self.left, left_version),
            self.info(&self.right, right_version),
        )
        .with_row_counts(RowCountMode::CrossDatabase, delta);

        warn_on_version_mismatch(&report);
        Ok(report)
    }

    fn schema_report(&self, left: &SchemaModel, right: &SchemaModel) -> ComparisonReport {
        let differences = compare(left, right);
        tracing::info!(differences = differences.len(), "Compared schemas");

        let report = ComparisonReport::new(
            self.info(&self.left, left.server_version_major),
            self.info(&self.right, right.server_version_major),
        )
        .with_schema_diff(summarize(left, right), differences);

        warn_on_version_mismatch(&report);
        report
    }

    fn info(&self, connection: &DatabaseConnection, server_version: i32) -> DatabaseInfo {
        DatabaseInfo {
            url: connection.label().to_string(),
            server_version,
        }
    }

    /// Close both pools
    pub async fn close(&self) {
        self.left.close().await;
        self.right.close().await;
    }
}

fn warn_on_version_mismatch(report: &ComparisonReport) {
    if let Some(warning) = &report.version_warning {
        tracing::warn!("{}", warning);
    }
}
