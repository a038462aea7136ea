use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::Result;

/// Inclusive, 1-based line window of a method declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRange {
    pub start_line: usize,
    pub end_line: usize,
}

impl MethodRange {
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Output of one whole-project compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CompileOutput {
    pub fn error_count(&self) -> usize {
        count_errors(&self.stderr)
    }
}

fn error_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) errors?").expect("valid error summary regex"))
}

/// Sums every `N error`/`N errors` summary in a compiler log.
pub fn count_errors(log: &str) -> usize {
    error_summary_re()
        .captures_iter(log)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .sum()
}

/// Compiles a whole project.
pub trait Compiler {
    /// Compiles every source under `project_root`.
    ///
    /// # Returns
    /// * `Ok(CompileOutput)` - The compiler ran to completion, successfully or not
    /// * `Err(PipelineError::ToolTimeout)` - The compiler exceeded its time budget
    fn compile(&self, project_root: &Path) -> Result<CompileOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    DryRun,
    Forward,
    Reverse,
}

/// Applies unified diffs to a source tree.
pub trait PatchTool {
    /// Applies `patch_file` inside `work_dir`, stripping `strip` leading path components.
    ///
    /// # Arguments
    /// * `patch_file` - Unified diff to apply
    /// * `work_dir` - Directory the stripped paths are resolved against
    /// * `strip` - Number of leading path components to drop (`-p`)
    /// * `mode` - Check only, apply, or undo a previous apply
    fn apply(&self, patch_file: &Path, work_dir: &Path, strip: usize, mode: PatchMode)
    -> Result<()>;
}

/// Resolves the method declaration enclosing a line.
pub trait MethodLocator: Send + Sync {
    /// Returns `None` when no method encloses `line` or the file cannot be analyzed.
    fn locate(&self, file_path: &Path, line: usize) -> Option<MethodRange>;
}
