//! Turns a model's replacement code into a unified diff against the original file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::debug;

use super::unified_diff::{unified_diff, DEFAULT_CONTEXT};
use super::workspace::Workspace;
use crate::data::{relpath_under_src, MethodRange, PatchRecord, TaskMetadata};
use crate::error::{PipelineError, Result};

fn line_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]*//__LINE\d+__//").expect("valid line marker regex"))
}

/// Removes the `//__LINE<n>__//` tags that prompt synthesis put on flagged lines.
pub fn strip_line_markers(text: &str) -> String {
    line_marker_re().replace_all(text, "").into_owned()
}

/// Replaces lines `start..=end` (1-based) of `original` with `replacement`.
pub fn splice_window(original: &str, range: MethodRange, replacement: &str) -> Result<String> {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let MethodRange { start_line: start, end_line: end } = range;
    if start == 0 || start > end || end > lines.len() {
        return Err(PipelineError::InvalidWindow { start, end, len: lines.len() });
    }

    let mut modified: String = lines[..start - 1].concat();
    modified.push_str(replacement);
    if end < lines.len() && !replacement.is_empty() && !replacement.ends_with('\n') {
        modified.push('\n');
    }
    modified.push_str(&lines[end..].concat());
    Ok(modified)
}

/// The file as it reads with the model's code in place.
///
/// Without a window the replacement is the whole file.
pub fn apply_replacement(original: &str, range: Option<MethodRange>, replacement: &str) -> Result<String> {
    let replacement = strip_line_markers(replacement);
    match range {
        Some(range) => splice_window(original, range, &replacement),
        None => Ok(replacement),
    }
}

/// Diffs the replaced file against `original`. Identical content yields `None`.
pub fn synthesize_patch(meta: &TaskMetadata, original: &str, replacement: &str) -> Result<Option<PatchRecord>> {
    let modified = apply_replacement(original, meta.method_range(), replacement)?;
    let path = meta.file_path.to_string_lossy();
    let diff_text = unified_diff(original, &modified, &path, DEFAULT_CONTEXT);
    if diff_text.is_empty() {
        debug!("No differences for {}${}", meta.project_name, meta.task_index);
        return Ok(None);
    }
    Ok(Some(PatchRecord {
        project_name: meta.project_name.clone(),
        relative_path: relpath_under_src(&path),
        line: meta.start_line,
        diff_text,
    }))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchLayout {
    /// Every record appended to `patches/<project>/<project>.patch`.
    #[default]
    Accumulated,
    /// One `patches/<project>/patch_<task>.diff` per task.
    PerTask,
}

/// Writes patch records into the work directory according to a layout.
pub struct PatchSink<'a> {
    workspace: &'a Workspace,
    layout: PatchLayout,
}

impl<'a> PatchSink<'a> {
    pub fn new(workspace: &'a Workspace, layout: PatchLayout) -> Self {
        Self { workspace, layout }
    }

    /// Removes patches left from an earlier run of `project`.
    pub fn reset(&self, project: &str) -> Result<()> {
        let dir = self.workspace.patches_dir(project);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn write(&self, record: &PatchRecord, task_index: usize) -> Result<PathBuf> {
        let dir = self.workspace.patches_dir(&record.project_name);
        fs::create_dir_all(&dir)?;
        let path = match self.layout {
            PatchLayout::Accumulated => {
                let path = dir.join(format!("{}.patch", record.project_name));
                let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
                file.write_all(record.diff_text.as_bytes())?;
                path
            }
            PatchLayout::PerTask => {
                let path = dir.join(format!("patch_{task_index}.diff"));
                fs::write(&path, &record.diff_text)?;
                path
            }
        };
        debug!("Patch for {}${} written to {}", record.project_name, task_index, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    const ORIGINAL: &str = "class A {\n  void m() {\n    open();\n  }\n  void n() {}\n}\n";

    fn meta(range: Option<MethodRange>) -> TaskMetadata {
        TaskMetadata::new("p", 1, Path::new("/w/p/src/pkg/A.java"), range, None)
    }

    #[test]
    fn test_strip_line_markers() {
        assert_eq!(strip_line_markers("    open();   //__LINE3__//\n"), "    open();\n");
        assert_eq!(strip_line_markers("x();\t//__LINE12__// tail"), "x(); tail");
    }

    #[test]
    fn test_splice_window() {
        let window = MethodRange { start_line: 2, end_line: 4 };
        let out = splice_window(ORIGINAL, window, "  void m() {}\n").unwrap();
        assert_eq!(out, "class A {\n  void m() {}\n  void n() {}\n}\n");
    }

    #[test]
    fn test_splice_rejects_bad_windows() {
        let err = splice_window(ORIGINAL, MethodRange { start_line: 5, end_line: 9 }, "x\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWindow { len: 6, .. }));
        assert!(splice_window(ORIGINAL, MethodRange { start_line: 0, end_line: 1 }, "x\n").is_err());
    }

    #[test]
    fn test_patch_from_method_replacement() {
        let m = meta(Some(MethodRange { start_line: 2, end_line: 4 }));
        let replacement = "  void m() {\n    try (R r = open()) {}   //__LINE3__//\n  }\n";
        let record = synthesize_patch(&m, ORIGINAL, replacement).unwrap().unwrap();
        assert_eq!(record.relative_path, "pkg/A.java");
        assert_eq!(record.line, Some(2));
        assert!(record.diff_text.starts_with("--- /w/p/src/pkg/A.java\n+++ /w/p/src/pkg/A.java\n"));
        assert!(record.diff_text.contains("-    open();\n+    try (R r = open()) {}\n"));
        assert!(!record.diff_text.contains("__LINE"));
    }

    #[test]
    fn test_whole_file_replacement_without_window() {
        let record = synthesize_patch(&meta(None), ORIGINAL, &ORIGINAL.replace("open", "close"))
            .unwrap()
            .unwrap();
        assert!(record.diff_text.contains("+    close();\n"));
    }

    #[test]
    fn test_identical_replacement_is_a_noop() {
        let m = meta(Some(MethodRange { start_line: 2, end_line: 4 }));
        let unchanged = "  void m() {\n    open();   //__LINE3__//\n  }\n";
        assert!(synthesize_patch(&m, ORIGINAL, unchanged).unwrap().is_none());
    }

    #[test]
    fn test_sink_layouts() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let record = PatchRecord {
            project_name: "p".into(),
            relative_path: "A.java".into(),
            line: None,
            diff_text: "--- a\n+++ a\n".into(),
        };

        let sink = PatchSink::new(&ws, PatchLayout::Accumulated);
        let first = sink.write(&record, 1).unwrap();
        let second = sink.write(&record, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&first).unwrap(), "--- a\n+++ a\n--- a\n+++ a\n");

        let per_task = PatchSink::new(&ws, PatchLayout::PerTask).write(&record, 7).unwrap();
        assert!(per_task.ends_with("p/patch_7.diff"));

        sink.reset("p").unwrap();
        assert!(!ws.patches_dir("p").exists());
    }
}
