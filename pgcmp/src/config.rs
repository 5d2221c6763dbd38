//! Configuration handling for pgcmp

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::report::OutputFormat;

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;

    Ok(config)
}

/// Represents the complete pgcmp configuration
///
/// Every section is optional; missing sections fall back to their defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub comparison: ComparisonConfig,
    pub output: OutputConfig,
    pub logging: Option<LoggingConfig>,
}

/// Database connection configuration, shared by both sides
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub pool_size: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            connect_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// What gets compared and how
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Only these schemas are compared; empty means every non-system schema
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
    pub concurrent_extraction: bool,
    pub statement_timeout_seconds: Option<u64>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            include_schemas: Vec::new(),
            exclude_schemas: Vec::new(),
            concurrent_extraction: true,
            statement_timeout_seconds: None,
        }
    }
}

impl ComparisonConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_seconds.map(Duration::from_secs)
    }

    /// Schema filter applied by the catalog extractor
    pub fn schema_filter(&self) -> SchemaFilter {
        SchemaFilter {
            include: self.include_schemas.clone(),
            exclude: self.exclude_schemas.clone(),
        }
    }
}

/// Narrows extraction to a subset of the non-system schemas
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl SchemaFilter {
    pub fn allows(&self, schema: &str) -> bool {
        if self.exclude.iter().any(|s| s == schema) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|s| s == schema)
    }
}

/// Report output configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Log to stdout instead of stderr; mixes logs into the report
    #[serde(default)]
    pub stdout: bool,
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            format: default_log_format(),
            stdout: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.database.pool_size, 2);
        assert_eq!(config.database.connect_timeout_seconds, 30);
        assert!(config.comparison.concurrent_extraction);
        assert_eq!(config.comparison.statement_timeout(), None);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.logging.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config_str = r#"
        [database]
        pool_size = 4
        connect_timeout_seconds = 5

        [comparison]
        include_schemas = ["public", "billing"]
        exclude_schemas = ["audit"]
        concurrent_extraction = false
        statement_timeout_seconds = 60

        [output]
        format = "xml"

        [logging]
        level = "debug"
        format = "json"
        "#;

        let config: Config = toml::from_str(config_str).unwrap();

        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.database.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.comparison.include_schemas, vec!["public", "billing"]);
        assert!(!config.comparison.concurrent_extraction);
        assert_eq!(config.comparison.statement_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.output.format, OutputFormat::Xml);

        let logging = config.logging.unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, "json");
        assert!(!logging.stdout);
    }

    #[test]
    fn schema_filter_excludes_before_including() {
        let filter = SchemaFilter {
            include: vec!["public".into(), "audit".into()],
            exclude: vec!["audit".into()],
        };

        assert!(filter.allows("public"));
        assert!(!filter.allows("audit"));
        assert!(!filter.allows("billing"));
        assert!(SchemaFilter::default().allows("billing"));
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[output]\nformat = \"yaml\"");
        assert!(result.is_err());
    }
}
