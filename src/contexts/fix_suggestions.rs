//! Parser for the heuristic fixer's numbered suggestion report.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::data::{EscapeInfo, FixSuggestion};

pub const ESCAPE_SENTINEL: &str = "+++ NOTE: Resource escapes";
pub const UNFIXABLE_SENTINEL: &str = "Nothing to be done";
const NOTE_PREFIX: &str = "+++ NOTE";

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\]\s*(.+?);\s*Line\s+number\s+(\d+)\s*$")
            .expect("valid suggestion header regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-{10,}\s*$").expect("valid separator regex"))
}

fn add_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)\+\+\+ Add following code (above|below) line:(\d+)\s\(([^)\n]+)\)\n(.*?)(// where variable [^\n]*)",
        )
        .expect("valid add-block regex")
    })
}

fn delete_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\+\+\+ Delete Line number (\d+)\s\(([^)\n]+)\)")
            .expect("valid delete-line regex")
    })
}

struct OpenBlock<'a> {
    index: usize,
    filepath: String,
    line: usize,
    body: Vec<&'a str>,
}

impl OpenBlock<'_> {
    fn finish(self) -> FixSuggestion {
        let suggestion_text = self.body.join("\n").trim().to_string();
        let is_escape = suggestion_text.contains(ESCAPE_SENTINEL);
        let unfixable = suggestion_text.contains(UNFIXABLE_SENTINEL);
        let escape_info = if is_escape && !unfixable {
            parse_escape_info(&suggestion_text, &self.filepath)
        } else {
            Vec::new()
        };

        FixSuggestion {
            index: self.index,
            filepath: self.filepath,
            line: self.line,
            suggestion_text,
            is_escape,
            unfixable,
            escape_info,
        }
    }
}

/// Parses a fix report into suggestions, in report order.
///
/// A suggestion starts at `N] <filepath>; Line number <line>` and runs until a
/// line of ten or more dashes, the next header, or end of input.
pub fn parse_fix_suggestions(content: &str) -> Vec<FixSuggestion> {
    let mut suggestions = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for line in content.lines() {
        if let Some(cap) = header_re().captures(line) {
            if let Some(block) = open.take() {
                suggestions.push(block.finish());
            }
            match (cap[1].parse::<usize>(), cap[3].parse::<usize>()) {
                (Ok(index), Ok(line_number)) => {
                    open = Some(OpenBlock {
                        index,
                        filepath: cap[2].trim().to_string(),
                        line: line_number,
                        body: Vec::new(),
                    });
                }
                _ => warn!("Skipping malformed suggestion header: {}", line.trim()),
            }
            continue;
        }

        if separator_re().is_match(line) {
            if let Some(block) = open.take() {
                suggestions.push(block.finish());
            }
            continue;
        }

        if let Some(block) = open.as_mut() {
            block.body.push(line);
        }
    }

    if let Some(block) = open.take() {
        suggestions.push(block.finish());
    }

    debug!("Parsed {} fix suggestions", suggestions.len());
    suggestions
}

/// Extracts the caller-side Add/Delete edits of an escaping suggestion.
///
/// Adds come first, then Deletes, each in order of appearance and without
/// repeating a `(caller file, line, text)` triple. Any `+++ NOTE` lines of the
/// suggestion are prefixed to every entry's text.
pub fn parse_escape_info(suggestion: &str, suggestion_path: &str) -> Vec<EscapeInfo> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for cap in add_re().captures_iter(suggestion) {
        let Ok(line) = cap[2].parse::<usize>() else { continue };
        let filepath = caller_path(suggestion_path, &cap[3]);
        let text = cap[0].trim().to_string();
        if seen.insert((filepath.clone(), line, text.clone())) {
            entries.push(EscapeInfo { filepath, line, suggestion_text: text });
        }
    }

    for cap in delete_re().captures_iter(suggestion) {
        let Ok(line) = cap[1].parse::<usize>() else { continue };
        let filepath = caller_path(suggestion_path, &cap[2]);
        let text = format!("Delete Line number {line}");
        if seen.insert((filepath.clone(), line, text.clone())) {
            entries.push(EscapeInfo { filepath, line, suggestion_text: text });
        }
    }

    let notes: Vec<&str> = suggestion
        .lines()
        .filter(|l| l.starts_with(NOTE_PREFIX))
        .map(str::trim)
        .collect();
    if !notes.is_empty() {
        let notes = notes.join("\n");
        for entry in &mut entries {
            entry.suggestion_text = format!("{}\n{}", notes, entry.suggestion_text);
        }
    }

    entries
}

/// Resolves a caller path relative to the project that owns `suggestion_path`.
fn caller_path(suggestion_path: &str, caller: &str) -> String {
    let caller = caller.trim().trim_start_matches('/');
    match suggestion_path.find("/src/") {
        Some(pos) => format!("{}/src/{}", &suggestion_path[..pos], caller),
        None => Path::new(suggestion_path)
            .parent()
            .map(|dir| dir.join(caller).to_string_lossy().into_owned())
            .unwrap_or_else(|| caller.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
0] /w/proj/src/a/Reader.java; Line number 25
vim +25 /w/proj/src/a/Reader.java
Wrap the stream in try-with-resources.
--------------------------------------------
1] /w/proj/src/a/Pool.java; Line number 12
+++ NOTE: Resource escapes to caller
+++ Add following code below line:40 (b/Client.java)
try { conn.close(); } catch (Exception e) {}
// where variable conn is the returned resource
+++ Delete Line number 44 (b/Client.java)
+++ Delete Line number 44 (b/Client.java)
--------------------------------------------
2] /w/proj/src/a/Sock.java; Line number 7
+++ NOTE: Resource escapes to caller
Nothing to be done
";

    #[test]
    fn test_blocks_and_flags() {
        let suggestions = parse_fix_suggestions(REPORT);
        assert_eq!(suggestions.len(), 3);

        assert_eq!(suggestions[0].index, 0);
        assert_eq!(suggestions[0].filepath, "/w/proj/src/a/Reader.java");
        assert_eq!(suggestions[0].line, 25);
        assert!(suggestions[0].suggestion_text.ends_with("try-with-resources."));
        assert!(!suggestions[0].is_escape);
        assert!(!suggestions[0].unfixable);

        assert!(suggestions[1].is_escape);
        assert!(!suggestions[1].unfixable);

        assert!(suggestions[2].is_escape);
        assert!(suggestions[2].unfixable);
        assert!(suggestions[2].escape_info.is_empty());
    }

    #[test]
    fn test_unfixable_without_escape_marker() {
        let suggestions = parse_fix_suggestions("4] /p/src/A.java; Line number 3\nNothing to be done\n");
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].unfixable);
        assert!(!suggestions[0].is_escape);
    }

    #[test]
    fn test_escape_entries_resolve_caller_and_dedupe() {
        let suggestions = parse_fix_suggestions(REPORT);
        let info = &suggestions[1].escape_info;
        assert_eq!(info.len(), 2);

        assert_eq!(info[0].filepath, "/w/proj/src/b/Client.java");
        assert_eq!(info[0].line, 40);
        assert!(info[0].suggestion_text.starts_with("+++ NOTE: Resource escapes to caller\n+++ Add"));
        assert!(info[0].suggestion_text.ends_with("// where variable conn is the returned resource"));

        assert_eq!(info[1].line, 44);
        assert!(info[1].suggestion_text.ends_with("\nDelete Line number 44"));
    }

    #[test]
    fn test_next_header_closes_block_without_separator() {
        let text = "0] /p/src/A.java; Line number 3\nfirst\n1] /p/src/B.java; Line number 9\nsecond\n";
        let suggestions = parse_fix_suggestions(text);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].suggestion_text, "first");
        assert_eq!(suggestions[1].suggestion_text, "second");
    }

    #[test]
    fn test_text_outside_blocks_is_ignored() {
        assert!(parse_fix_suggestions("summary\n----------\n").is_empty());
    }
}
