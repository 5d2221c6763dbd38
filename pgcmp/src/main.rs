use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use pgcmp::config::{self, Config, LoggingConfig};
use pgcmp::utils::logging::init_logging;
use pgcmp::{OutputFormat, PgCmpClient, EXIT_ERROR};

/// Compare the schema and row counts of two PostgreSQL databases
#[derive(Parser)]
#[command(name = "pgcmp")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Exit codes: 0 no differences, 1 error, 2 differences found")]
struct Cli {
    /// Source-of-truth database URL
    left: String,

    /// Database URL to check against the left one
    right: String,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trial-apply this SQL file to the right database (always rolled back)
    #[arg(long, value_name = "FILE")]
    apply_sql_file: Option<PathBuf>,

    /// Compare row counts of common tables instead of schemas
    #[arg(long)]
    row_counts: bool,

    /// Report format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Shorthand for --format xml
    #[arg(long, conflicts_with = "format")]
    xml: bool,

    /// Only compare this schema (repeatable)
    #[arg(long = "schema", value_name = "NAME")]
    schemas: Vec<String>,

    /// Skip this schema (repeatable)
    #[arg(long = "exclude-schema", value_name = "NAME")]
    exclude_schemas: Vec<String>,

    /// Extract the two databases one after the other
    #[arg(long)]
    sequential: bool,

    /// Cancel any statement running longer than this many seconds
    #[arg(long, value_name = "SECS")]
    statement_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load the config file, then let flags override it
    fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => config::load_from_file(&path.to_string_lossy())
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if !self.schemas.is_empty() {
            config.comparison.include_schemas = self.schemas.clone();
        }
        config
            .comparison
            .exclude_schemas
            .extend(self.exclude_schemas.iter().cloned());
        if self.sequential {
            config.comparison.concurrent_extraction = false;
        }
        if self.statement_timeout.is_some() {
            config.comparison.statement_timeout_seconds = self.statement_timeout;
        }
        if self.xml {
            config.output.format = OutputFormat::Xml;
        } else if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(level) = &self.log_level {
            let logging = config.logging.get_or_insert_with(LoggingConfig::default);
            logging.level = level.clone();
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(error = %e, "Comparison failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.resolve_config()?;
    init_logging(&config.logging).context("initializing logging")?;

    let script = match &cli.apply_sql_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };

    let format = config.output.format;
    let client = PgCmpClient::connect(&cli.left, &cli.right, config).await?;

    let report = if cli.row_counts {
        client.compare_row_counts(script.as_deref()).await
    } else if let Some(script) = &script {
        client.validate_migration(script).await
    } else {
        client.compare_schemas().await
    };
    client.close().await;
    let report = report?;

    println!("{}", report.render(format)?);
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "pgcmp",
            "postgres://a/db",
            "postgres://b/db",
            "--schema",
            "public",
            "--schema",
            "billing",
            "--exclude-schema",
            "audit",
            "--sequential",
            "--xml",
            "--statement-timeout",
            "30",
        ]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.comparison.include_schemas, vec!["public", "billing"]);
        assert_eq!(config.comparison.exclude_schemas, vec!["audit"]);
        assert!(!config.comparison.concurrent_extraction);
        assert_eq!(config.comparison.statement_timeout_seconds, Some(30));
        assert_eq!(config.output.format, OutputFormat::Xml);
    }

    #[test]
    fn xml_conflicts_with_format() {
        let result = Cli::try_parse_from([
            "pgcmp", "postgres://a/db", "postgres://b/db", "--xml", "--format", "json",
        ]);
        assert!(result.is_err());
    }
}
