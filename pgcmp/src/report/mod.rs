//! Comparison reports
//!
//! A [`ComparisonReport`] gathers everything one run found; the submodules
//! render it as plain text or XML, and JSON comes straight from serde.

pub mod text;
pub mod xml;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::diff::{ComparisonResult, SummaryRow};
use crate::schema::row_counts::RowCountDelta;
use crate::{EXIT_DIFFERENCES, EXIT_NO_DIFFERENCES};

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Xml,
    Json,
}

/// One side of the comparison as shown in reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    /// Connection URL with the password masked
    pub url: String,
    pub server_version: i32,
}

/// Which row counts a report carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowCountMode {
    /// Right side before and after a trial script
    Migration,
    /// Left side against right side, common tables only
    CrossDatabase,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowCountReport {
    pub mode: RowCountMode,
    pub delta: RowCountDelta,
}

/// Everything one comparison run found
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub left: DatabaseInfo,
    pub right: DatabaseInfo,
    pub version_warning: Option<String>,
    /// Empty when no schema comparison was made
    pub summary: Vec<SummaryRow>,
    pub differences: Option<ComparisonResult>,
    pub row_counts: Option<RowCountReport>,
}

impl ComparisonReport {
    pub fn new(left: DatabaseInfo, right: DatabaseInfo) -> Self {
        let version_warning = version_warning(left.server_version, right.server_version);
        Self {
            left,
            right,
            version_warning,
            summary: Vec::new(),
            differences: None,
            row_counts: None,
        }
    }

    pub fn with_schema_diff(mut self, summary: Vec<SummaryRow>, differences: ComparisonResult) -> Self {
        self.summary = summary;
        self.differences = Some(differences);
        self
    }

    pub fn with_row_counts(mut self, mode: RowCountMode, delta: RowCountDelta) -> Self {
        self.row_counts = Some(RowCountReport { mode, delta });
        self
    }

    /// Schema differences plus tables whose row counts differ
    pub fn number_of_differences(&self) -> usize {
        let schema = self.differences.as_ref().map_or(0, ComparisonResult::len);
        let rows = self
            .row_counts
            .as_ref()
            .map_or(0, |r| r.delta.changed().count());
        schema + rows
    }

    pub fn has_differences(&self) -> bool {
        self.number_of_differences() > 0
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        if self.has_differences() {
            EXIT_DIFFERENCES
        } else {
            EXIT_NO_DIFFERENCES
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(text::render(self)),
            OutputFormat::Xml => Ok(xml::render(self)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

/// Warning shown when the two servers run different major versions
pub fn version_warning(left: i32, right: i32) -> Option<String> {
    (left != right).then(|| {
        format!(
            "Server versions differ (left: PostgreSQL {}, right: PostgreSQL {}); \
             catalog output may differ between versions",
            left, right
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_versions_produce_no_warning() {
        assert_eq!(version_warning(16, 16), None);
        assert!(version_warning(15, 16).unwrap().contains("PostgreSQL 15"));
    }
}
