//! Fixability table filter.
//!
//! The table is caret-separated with a named header row. When it cannot be
//! read as such, filtering degrades to letting every suggestion through and
//! says so in the log.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::data::{FixSuggestion, FixabilityRow};

pub const REQUIRED_COLUMNS: [&str; 5] = [
    "Source File",
    "Line Number",
    "Matched Method",
    "Duplicate",
    "Unfixable",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixabilityFilter {
    /// Only suggestions keyed in `fixable` pass.
    Table {
        fixable: HashSet<(String, usize)>,
        rows: usize,
    },
    /// No usable table; every suggestion passes.
    Degraded { reason: String },
}

impl FixabilityFilter {
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => Self::degraded(format!("cannot read {}: {}", path.display(), e)),
        }
    }

    pub fn parse(text: &str) -> Self {
        match parse_rows(text) {
            Ok(rows) => {
                let total = rows.len();
                let fixable: HashSet<_> = rows
                    .into_iter()
                    .filter(FixabilityRow::is_fixable)
                    .map(|row| (row.relpath_under_src, row.line))
                    .collect();
                info!("Fixability table: {} rows, {} fixable", total, fixable.len());
                FixabilityFilter::Table { fixable, rows: total }
            }
            Err(reason) => Self::degraded(reason),
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("Fixability filtering disabled, treating all suggestions as fixable: {}", reason);
        FixabilityFilter::Degraded { reason }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FixabilityFilter::Degraded { .. })
    }

    pub fn allows(&self, suggestion: &FixSuggestion) -> bool {
        match self {
            FixabilityFilter::Degraded { .. } => true,
            FixabilityFilter::Table { fixable, .. } => {
                fixable.contains(&(suggestion.relpath_under_src(), suggestion.line))
            }
        }
    }
}

/// Parses table rows, or explains why the text is not a usable table.
///
/// Rows shorter than the header or with a non-numeric line are skipped.
pub fn parse_rows(text: &str) -> Result<Vec<FixabilityRow>, String> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines.next().ok_or_else(|| "table is empty".to_string())?;
    if !header.contains('^') {
        return Err("first line is not a ^-separated header".to_string());
    }

    let columns: Vec<&str> = header.split('^').map(str::trim).collect();
    let position = |name: &str| columns.iter().position(|c| *c == name);
    let mut idx = [0usize; REQUIRED_COLUMNS.len()];
    for (slot, name) in idx.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = position(name).ok_or_else(|| format!("header is missing column {name:?}"))?;
    }
    let [file_col, line_col, method_col, duplicate_col, unfixable_col] = idx;

    let mut rows = Vec::new();
    for line in lines {
        let parts: Vec<&str> = line.split('^').map(str::trim).collect();
        if parts.len() < columns.len() {
            continue;
        }
        let Ok(line_number) = parts[line_col].parse::<usize>() else {
            continue;
        };
        rows.push(FixabilityRow {
            relpath_under_src: normalize_source_file(parts[file_col]),
            line: line_number,
            matched_method: parts[method_col].to_string(),
            duplicate: parse_flag(parts[duplicate_col]),
            unfixable: parse_flag(parts[unfixable_col]),
        });
    }

    Ok(rows)
}

/// `None` for a literal null, otherwise whether the cell says true.
fn parse_flag(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(cell.eq_ignore_ascii_case("true"))
    }
}

fn normalize_source_file(cell: &str) -> String {
    let normalized = cell.replace('\\', "/");
    match normalized.split_once("/src/") {
        Some((_, rest)) => rest.to_string(),
        None => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(path: &str, line: usize) -> FixSuggestion {
        FixSuggestion {
            index: 0,
            filepath: path.to_string(),
            line,
            suggestion_text: String::new(),
            is_escape: false,
            unfixable: false,
            escape_info: Vec::new(),
        }
    }

    const TABLE: &str = "\
Index^Source File^Line Number^Matched Method^Duplicate^Unfixable^Comments
0^a/Reader.java^25^read^false^false^Try-catch Fix;
1^a/Pool.java^12^UNMATCHED^false^false^x
2^a/Sock.java^7^open^true^false^x
3^a/Conn.java^9^open^false^NULL^NULL
4^a/Short.java^1
5^a/Bad.java^abc^m^false^false^x
";

    #[test]
    fn test_exclusion_rules() {
        let filter = FixabilityFilter::parse(TABLE);
        assert!(!filter.is_degraded());
        assert!(filter.allows(&suggestion("/w/p/src/a/Reader.java", 25)));
        assert!(!filter.allows(&suggestion("/w/p/src/a/Reader.java", 26)));
        assert!(!filter.allows(&suggestion("/w/p/src/a/Pool.java", 12)));
        assert!(!filter.allows(&suggestion("/w/p/src/a/Sock.java", 7)));
        assert!(!filter.allows(&suggestion("/w/p/src/a/Conn.java", 9)));
    }

    #[test]
    fn test_short_and_non_numeric_rows_are_skipped() {
        let rows = parse_rows(TABLE).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].duplicate, Some(false));
        assert_eq!(rows[3].unfixable, None);
    }

    #[test]
    fn test_column_order_is_irrelevant() {
        let table = "Unfixable^Duplicate^Matched Method^Line Number^Source File\nfalse^false^m^5^proj\\src\\x\\A.java\n";
        let filter = FixabilityFilter::parse(table);
        assert!(filter.allows(&suggestion("/w/proj/src/x/A.java", 5)));
    }

    #[test]
    fn test_missing_column_degrades() {
        let filter = FixabilityFilter::parse("Source File^Line Number^Matched Method^Duplicate\na^1^m^false\n");
        assert!(filter.is_degraded());
        assert!(filter.allows(&suggestion("/anything.java", 1)));
    }

    #[test]
    fn test_headerless_or_missing_table_degrades() {
        assert!(FixabilityFilter::parse("not a table\n").is_degraded());
        assert!(FixabilityFilter::parse("").is_degraded());
        assert!(FixabilityFilter::load(Path::new("/nonexistent/debug.txt")).is_degraded());
    }
}
