use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::MethodRange;

/// One warning block from a checker log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub filepath: String,
    pub line: usize,
    /// Header line plus every continuation line up to the next header, trimmed.
    pub raw_block: String,
    /// The block reports a non-final owning field that may be overwritten.
    pub is_owning_overwrite: bool,
    /// Enclosing method name. Never set by the log parser; callers that resolve
    /// it themselves enable the method branch of `same_issue_as`.
    pub method: Option<String>,
    /// Byte span of the block inside the log it was read from.
    pub span: Range<usize>,
}

/// Caller-side edit extracted from a suggestion whose resource escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeInfo {
    pub filepath: String,
    pub line: usize,
    pub suggestion_text: String,
}

/// One numbered entry of a fix-suggestion report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixSuggestion {
    pub index: usize,
    pub filepath: String,
    pub line: usize,
    pub suggestion_text: String,
    pub is_escape: bool,
    pub unfixable: bool,
    pub escape_info: Vec<EscapeInfo>,
}

impl FixSuggestion {
    pub fn relpath_under_src(&self) -> String {
        relpath_under_src(&self.filepath)
    }
}

/// One row of the fixability table, keyed like `FixSuggestion::relpath_under_src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixabilityRow {
    pub relpath_under_src: String,
    pub line: usize,
    pub matched_method: String,
    /// `None` when the table says `null`.
    pub duplicate: Option<bool>,
    pub unfixable: Option<bool>,
}

impl FixabilityRow {
    pub fn is_fixable(&self) -> bool {
        !self.matched_method.eq_ignore_ascii_case("UNMATCHED")
            && self.duplicate == Some(false)
            && self.unfixable == Some(false)
    }
}

/// Everything needed to turn a model reply for one task back into a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub project_name: String,
    pub task_index: usize,
    pub file_path: PathBuf,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    /// SHA-256 of the source file when the prompt was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    pub recorded_at: String,
}

impl TaskMetadata {
    pub fn new(
        project_name: &str,
        task_index: usize,
        file_path: &Path,
        range: Option<MethodRange>,
        source_sha256: Option<String>,
    ) -> Self {
        Self {
            project_name: project_name.to_string(),
            task_index,
            file_path: file_path.to_path_buf(),
            start_line: range.map(|r| r.start_line),
            end_line: range.map(|r| r.end_line),
            source_sha256,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// The replacement window, present only when both bounds are known.
    pub fn method_range(&self) -> Option<MethodRange> {
        match (self.start_line, self.end_line) {
            (Some(start_line), Some(end_line)) => Some(MethodRange { start_line, end_line }),
            _ => None,
        }
    }

    /// Same file and same window, the grouping key used when merging prompts.
    pub fn same_window(&self, other: &TaskMetadata) -> bool {
        self.file_path == other.file_path
            && self.start_line == other.start_line
            && self.end_line == other.end_line
    }
}

/// A unified diff produced for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub project_name: String,
    pub relative_path: String,
    pub line: Option<usize>,
    pub diff_text: String,
}

/// Path below the first `/src/` segment, or the file name when there is none.
pub fn relpath_under_src(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    match normalized.split_once("/src/") {
        Some((_, rest)) => rest.to_string(),
        None => Path::new(&normalized)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(normalized),
    }
}
