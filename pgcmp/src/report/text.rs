//! Plain text report

use std::fmt::{self, Display, Formatter};

use crate::report::{ComparisonReport, RowCountMode, RowCountReport};
use crate::schema::diff::{Change, ComparisonResult, DiffEntry};
use crate::schema::row_counts::RowCountEntry;
use crate::schema::types::ObjectKind;

const RULE: &str = "============================================================";

/// Render a report for a terminal
pub fn render(report: &ComparisonReport) -> String {
    TextReport(report).to_string()
}

struct TextReport<'a>(&'a ComparisonReport);

impl Display for TextReport<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_report(f, self.0)
    }
}

fn write_report(out: &mut Formatter<'_>, report: &ComparisonReport) -> fmt::Result {
    let title = match (&report.differences, &report.row_counts) {
        (None, Some(_)) => "PostgreSQL Row Count Comparison Report",
        _ => "PostgreSQL Schema Comparison Report",
    };
    writeln!(out, "{}", title)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Left:  {} (PostgreSQL {})", report.left.url, report.left.server_version)?;
    writeln!(out, "Right: {} (PostgreSQL {})", report.right.url, report.right.server_version)?;
    if let Some(warning) = &report.version_warning {
        writeln!(out, "WARNING: {}", warning)?;
    }

    if !report.has_differences() {
        writeln!(out)?;
        match (&report.differences, &report.row_counts) {
            (Some(_), Some(_)) => {
                writeln!(out, "✓ No differences found. Schemas and row counts are identical.")?;
            }
            (None, Some(_)) => {
                writeln!(out, "✓ No differences found. Row counts are identical.")?;
            }
            _ => {
                writeln!(out, "✓ No differences found. Schemas are identical.")?;
            }
        }
        if let Some(rows) = &report.row_counts {
            if rows.mode == RowCountMode::CrossDatabase {
                write_row_counts(out, rows)?;
            }
        }
        return Ok(());
    }

    if let Some(differences) = &report.differences {
        for kind in ObjectKind::ALL {
            let entries: Vec<&DiffEntry> = differences.of_kind(kind).collect();
            if !entries.is_empty() {
                write_section(out, kind, &entries)?;
            }
        }
    }

    if let Some(rows) = &report.row_counts {
        write_row_counts(out, rows)?;
    }

    write_summary(out, report)
}

fn heading(out: &mut Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, " {}", title)?;
    writeln!(out, "{}", RULE)
}

fn write_section(out: &mut Formatter<'_>, kind: ObjectKind, entries: &[&DiffEntry]) -> fmt::Result {
    let title = kind.plural().replace('_', " ").to_uppercase();
    heading(out, &format!("{} ({} difference(s))", title, entries.len()))?;

    for entry in entries {
        match &entry.change {
            Change::Removed => {
                writeln!(out, "  ← LEFT ONLY: {}", entry.identity)?;
            }
            Change::Added => {
                writeln!(out, "  → RIGHT ONLY: {}", entry.identity)?;
            }
            Change::Changed { deltas } => {
                writeln!(out, "  ≠ DIFFERENT: {}", entry.identity)?;
                for delta in deltas {
                    writeln!(out, "      {}:", delta.field)?;
                    writeln!(out, "        ← {}", delta.left.as_deref().unwrap_or("(absent)"))?;
                    writeln!(out, "        → {}", delta.right.as_deref().unwrap_or("(absent)"))?;
                }
            }
        }
    }
    Ok(())
}

fn write_row_counts(out: &mut Formatter<'_>, rows: &RowCountReport) -> fmt::Result {
    match rows.mode {
        RowCountMode::Migration => {
            let changed: Vec<&RowCountEntry> = rows.delta.changed().collect();
            if changed.is_empty() {
                return Ok(());
            }
            heading(out, &format!("ROW COUNTS ({} difference(s))", changed.len()))?;
            for entry in changed {
                match (entry.before, entry.after) {
                    (Some(before), Some(after)) => {
                        writeln!(
                            out,
                            "  ≠ {}: {} → {} ({:+})",
                            entry.table,
                            before,
                            after,
                            after - before
                        )?;
                    }
                    (Some(before), None) => {
                        writeln!(out, "  ← {}: table removed ({} rows)", entry.table, before)?;
                    }
                    (None, Some(after)) => {
                        writeln!(out, "  → {}: table added ({} rows)", entry.table, after)?;
                    }
                    (None, None) => {}
                }
            }
        }
        RowCountMode::CrossDatabase => {
            heading(out, "ROW COUNTS")?;
            let width = rows
                .delta
                .entries()
                .iter()
                .map(|e| e.table.to_string().len())
                .max()
                .unwrap_or(0)
                .max("Table".len());

            writeln!(out, "  {:<width$}  {:>12}  {:>12}  Status", "Table", "Left", "Right", width = width)?;
            for entry in rows.delta.entries() {
                writeln!(
                    out,
                    "  {:<width$}  {:>12}  {:>12}  {}",
                    entry.table.to_string(),
                    count_text(entry.before),
                    count_text(entry.after),
                    if entry.differs() { "differs" } else { "match" },
                    width = width
                )?;
            }
        }
    }
    Ok(())
}

fn count_text(count: Option<i64>) -> String {
    count.map_or_else(|| "-".to_string(), |c| c.to_string())
}

fn write_summary(out: &mut Formatter<'_>, report: &ComparisonReport) -> fmt::Result {
    heading(out, "SUMMARY")?;

    if !report.summary.is_empty() {
        writeln!(out, "  {:<20} {:>8} {:>8}", "Object type", "Left", "Right")?;
        for row in &report.summary {
            let marker = if row.is_different() { "  *" } else { "" };
            writeln!(
                out,
                "  {:<20} {:>8} {:>8}{}",
                row.kind.plural().replace('_', " "),
                row.left_count,
                row.right_count,
                marker
            )?;
        }
        writeln!(out)?;
    }

    if let Some(differences) = &report.differences {
        write_tally(out, differences)?;
    }
    if let Some(rows) = &report.row_counts {
        let changed = rows.delta.changed().count();
        if changed > 0 {
            writeln!(out, "  Row counts: {} table(s) differ", changed)?;
        }
    }

    writeln!(out, "  Total differences: {}", report.number_of_differences())
}

fn write_tally(out: &mut Formatter<'_>, differences: &ComparisonResult) -> fmt::Result {
    for (kind, counts) in differences.counts() {
        let mut parts = Vec::new();
        if counts.removed > 0 {
            parts.push(format!("{} left-only", counts.removed));
        }
        if counts.added > 0 {
            parts.push(format!("{} right-only", counts.added));
        }
        if counts.changed > 0 {
            parts.push(format!("{} different", counts.changed));
        }
        let mut name = kind.plural().replace('_', " ");
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        writeln!(out, "  {}: {}", name, parts.join(", "))?;
    }
    Ok(())
}
