//! XML report
//!
//! Schema comparisons render as a `<database_comparison>` document; a pure
//! row-count comparison renders as `<row_count_comparison>`.

use crate::report::{ComparisonReport, RowCountMode, RowCountReport};
use crate::schema::diff::{Change, DiffEntry};
use crate::schema::types::ObjectKind;

/// Render a report as an indented XML document
pub fn render(report: &ComparisonReport) -> String {
    let mut xml = XmlWriter::new();

    match (&report.differences, &report.row_counts) {
        (None, Some(rows)) if rows.mode == RowCountMode::CrossDatabase => {
            xml.open("row_count_comparison");
            write_connections(&mut xml, report);
            write_version_warning(&mut xml, report);
            write_cross_database_counts(&mut xml, rows);
            xml.leaf("number_of_differences", &report.number_of_differences().to_string());
            xml.close("row_count_comparison");
        }
        _ => {
            xml.open("database_comparison");
            write_connections(&mut xml, report);
            write_version_warning(&mut xml, report);
            write_summary(&mut xml, report);
            write_differences(&mut xml, report);
            if let Some(rows) = &report.row_counts {
                match rows.mode {
                    RowCountMode::Migration => write_migration_counts(&mut xml, rows),
                    RowCountMode::CrossDatabase => write_cross_database_counts(&mut xml, rows),
                }
            }
            xml.leaf("number_of_differences", &report.number_of_differences().to_string());
            xml.close("database_comparison");
        }
    }

    xml.finish()
}

fn write_connections(xml: &mut XmlWriter, report: &ComparisonReport) {
    xml.open("connections");
    xml.leaf("left", &report.left.url);
    xml.leaf("right", &report.right.url);
    xml.close("connections");
}

fn write_version_warning(xml: &mut XmlWriter, report: &ComparisonReport) {
    if let Some(warning) = &report.version_warning {
        xml.leaf("version_warning", warning);
    }
}

fn write_summary(xml: &mut XmlWriter, report: &ComparisonReport) {
    if report.summary.is_empty() {
        return;
    }
    xml.open("summary");
    for row in &report.summary {
        xml.open("item");
        xml.leaf("type", row.kind.as_str());
        xml.leaf("left_count", &row.left_count.to_string());
        xml.leaf("right_count", &row.right_count.to_string());
        xml.leaf("different", bool_text(row.is_different()));
        xml.close("item");
    }
    xml.close("summary");
}

fn write_differences(xml: &mut XmlWriter, report: &ComparisonReport) {
    let Some(differences) = &report.differences else {
        return;
    };

    for kind in ObjectKind::ALL {
        // Column changes are reported inside their table
        if kind == ObjectKind::Column {
            continue;
        }
        let entries: Vec<&DiffEntry> = differences.of_kind(kind).collect();
        if entries.is_empty() {
            xml.empty(kind.plural());
            continue;
        }

        xml.open(kind.plural());
        for entry in entries {
            xml.open(kind.as_str());
            xml.leaf("name", &entry.identity.to_string());
            xml.leaf("action", action(&entry.change));
            for delta in entry.deltas() {
                xml.open("detail");
                xml.leaf("field", &delta.field);
                if let Some(left) = &delta.left {
                    xml.leaf("left", left);
                }
                if let Some(right) = &delta.right {
                    xml.leaf("right", right);
                }
                xml.close("detail");
            }
            xml.close(kind.as_str());
        }
        xml.close(kind.plural());
    }
}

fn write_migration_counts(xml: &mut XmlWriter, rows: &RowCountReport) {
    xml.open("row_counts");
    for entry in rows.delta.changed() {
        xml.open("row_count");
        xml.leaf("name", &entry.table.to_string());
        match (entry.before, entry.after) {
            (Some(before), Some(after)) => {
                xml.leaf("action", "modified");
                xml.leaf("before_count", &before.to_string());
                xml.leaf("after_count", &after.to_string());
                xml.leaf("change", &format!("{:+}", after - before));
            }
            (Some(before), None) => {
                xml.leaf("action", "removed");
                xml.leaf("rows_removed", &before.to_string());
            }
            (None, Some(after)) => {
                xml.leaf("action", "added");
                xml.leaf("rows_added", &after.to_string());
            }
            (None, None) => {}
        }
        xml.close("row_count");
    }
    xml.close("row_counts");
}

fn write_cross_database_counts(xml: &mut XmlWriter, rows: &RowCountReport) {
    xml.open("tables");
    for entry in rows.delta.entries() {
        xml.open("table");
        xml.leaf("name", &entry.table.to_string());
        if let Some(left) = entry.before {
            xml.leaf("left_count", &left.to_string());
        }
        if let Some(right) = entry.after {
            xml.leaf("right_count", &right.to_string());
        }
        xml.leaf("differs", bool_text(entry.differs()));
        xml.close("table");
    }
    xml.close("tables");
}

fn action(change: &Change) -> &'static str {
    match change {
        Change::Added => "added",
        Change::Removed => "removed",
        Change::Changed { .. } => "modified",
    }
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Minimal indenting writer; element names are trusted, text is escaped
struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            out: String::from("<?xml version=\"1.0\" ?>\n"),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open(&mut self, tag: &str) {
        self.indent();
        self.out.push_str(&format!("<{}>\n", tag));
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str(&format!("</{}>\n", tag));
    }

    fn empty(&mut self, tag: &str) {
        self.indent();
        self.out.push_str(&format!("<{}/>\n", tag));
    }

    fn leaf(&mut self, tag: &str, text: &str) {
        self.indent();
        self.out
            .push_str(&format!("<{tag}>{}</{tag}>\n", escape(text), tag = tag));
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Escape text content; characters XML 1.0 cannot carry are dropped
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}
