//! Applies patch files one at a time and keeps only those that leave the
//! project's compile error count unchanged.

use serde::Serialize;
use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::workspace::Workspace;
use crate::data::{Compiler, PatchMode, PatchTool};
use crate::error::{PipelineError, Result};

/// Strip depth used when a patch path has no `src` segment.
pub const FALLBACK_STRIP_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatchState {
    Pending,
    DryRun,
    Applied,
    Validated,
    Reverted,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatchCounters {
    pub total_patches: usize,
    pub failed_patches: usize,
    pub compilation_regressions: usize,
}

impl AddAssign for PatchCounters {
    fn add_assign(&mut self, other: Self) {
        self.total_patches += other.total_patches;
        self.failed_patches += other.failed_patches;
        self.compilation_regressions += other.compilation_regressions;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub patch: PathBuf,
    pub state: PatchState,
    pub strip_depth: usize,
    pub errors_after: Option<usize>,
    pub detail: Option<String>,
}

impl PatchOutcome {
    fn new(patch: &Path) -> Self {
        Self {
            patch: patch.to_path_buf(),
            state: PatchState::Pending,
            strip_depth: FALLBACK_STRIP_DEPTH,
            errors_after: None,
            detail: None,
        }
    }
}

/// Strip depth for `patch -p`, from the first `--- ` header of the patch.
///
/// The path is split on `/`; the depth is the index of its `src` segment
/// plus one, or `FALLBACK_STRIP_DEPTH` when there is none.
pub fn compute_strip_depth(patch_text: &str) -> usize {
    patch_text
        .lines()
        .find(|l| l.starts_with("--- "))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|path| path.split('/').position(|segment| segment == "src"))
        .map(|index| index + 1)
        .unwrap_or(FALLBACK_STRIP_DEPTH)
}

/// Rewrites `path` with CRLF line endings turned into LF and returns the text.
pub fn normalize_line_endings(path: &Path) -> Result<String> {
    let text = String::from_utf8_lossy(&fs::read(path)?).into_owned();
    if text.contains("\r\n") {
        let normalized = text.replace("\r\n", "\n");
        fs::write(path, &normalized)?;
        return Ok(normalized);
    }
    Ok(text)
}

/// `*.patch` and `*.diff` files directly in `dir`, sorted by name.
pub fn list_patch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut patches: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(path.extension().and_then(|e| e.to_str()), Some("patch" | "diff"))
        })
        .collect();
    patches.sort();
    Ok(patches)
}

pub struct PatchApplyValidator<'a> {
    compiler: &'a dyn Compiler,
    patch_tool: &'a dyn PatchTool,
    workspace: &'a Workspace,
}

impl<'a> PatchApplyValidator<'a> {
    pub fn new(compiler: &'a dyn Compiler, patch_tool: &'a dyn PatchTool, workspace: &'a Workspace) -> Self {
        Self { compiler, patch_tool, workspace }
    }

    /// Applies `patches` in order against `project_root`.
    ///
    /// The baseline error count is taken once, before the first patch, and
    /// only when there is something to apply. A patch failure never stops
    /// the remaining patches.
    pub fn validate_project(
        &self,
        project: &str,
        project_root: &Path,
        patches: &[PathBuf],
        counters: &mut PatchCounters,
    ) -> Result<Vec<PatchOutcome>> {
        if patches.is_empty() {
            info!("No patches to apply for {}", project);
            return Ok(Vec::new());
        }

        let baseline = self.compiler.compile(project_root)?.error_count();
        info!("Baseline for {}: {} compile errors", project, baseline);

        let work_dir = project_root.join("src");
        let outcomes = patches
            .iter()
            .map(|patch| self.apply_one(project, project_root, &work_dir, patch, baseline, counters))
            .collect();
        Ok(outcomes)
    }

    fn apply_one(
        &self,
        project: &str,
        project_root: &Path,
        work_dir: &Path,
        patch: &Path,
        baseline: usize,
        counters: &mut PatchCounters,
    ) -> PatchOutcome {
        counters.total_patches += 1;
        let mut outcome = PatchOutcome::new(patch);

        let text = match normalize_line_endings(patch) {
            Ok(text) => text,
            Err(e) => return self.fail(project, outcome, counters, e.to_string()),
        };
        outcome.strip_depth = compute_strip_depth(&text);
        let strip = outcome.strip_depth;

        outcome.state = PatchState::DryRun;
        if let Err(e) = self.patch_tool.apply(patch, work_dir, strip, PatchMode::DryRun) {
            return self.fail(project, outcome, counters, e.to_string());
        }

        if let Err(e) = self.patch_tool.apply(patch, work_dir, strip, PatchMode::Forward) {
            return self.fail(project, outcome, counters, e.to_string());
        }
        outcome.state = PatchState::Applied;
        debug!("Applied {} with -p{}", patch.display(), strip);

        let output = match self.compiler.compile(project_root) {
            Ok(output) => output,
            Err(e) => {
                // The tree must not keep a patch that was never validated.
                if let Err(revert) = self.patch_tool.apply(patch, work_dir, strip, PatchMode::Reverse) {
                    warn!("Could not revert {}: {}", patch.display(), revert);
                }
                return self.fail(project, outcome, counters, e.to_string());
            }
        };

        let errors = output.error_count();
        outcome.errors_after = Some(errors);
        if errors == baseline {
            outcome.state = PatchState::Validated;
            info!("Patch {} validated", patch.display());
            return outcome;
        }

        warn!(
            "Patch {} changed the error count from {} to {}, reverting",
            patch.display(),
            baseline,
            errors
        );
        counters.compilation_regressions += 1;
        self.workspace.log_compilation_regression(project, &output.stderr);
        match self.patch_tool.apply(patch, work_dir, strip, PatchMode::Reverse) {
            Ok(()) => {
                outcome.state = PatchState::Reverted;
                outcome
            }
            Err(e) => self.fail(project, outcome, counters, e.to_string()),
        }
    }

    fn fail(
        &self,
        project: &str,
        mut outcome: PatchOutcome,
        counters: &mut PatchCounters,
        detail: String,
    ) -> PatchOutcome {
        warn!("Failed to apply patch {}: {}", outcome.patch.display(), detail);
        counters.failed_patches += 1;
        self.workspace.log_failed_patch(project, &outcome.patch, &detail);
        outcome.state = PatchState::Failed;
        outcome.detail = Some(detail);
        outcome
    }
}

/// Error for a patch tool that exited unsuccessfully.
pub fn apply_failure(patch: &Path, detail: impl Into<String>) -> PipelineError {
    PipelineError::ApplyFailure { patch: patch.to_path_buf(), detail: detail.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CompileOutput;
    use std::cell::RefCell;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_compute_strip_depth() {
        assert_eq!(compute_strip_depth("--- /x/y/src/a/b/File.java\n+++ /x/y/src/a/b/File.java\n"), 4);
        assert_eq!(compute_strip_depth("--- /x/y/a/b/File.java\n"), FALLBACK_STRIP_DEPTH);
        assert_eq!(compute_strip_depth("no header"), FALLBACK_STRIP_DEPTH);
        // Only a whole `src` segment counts.
        assert_eq!(compute_strip_depth("--- /x/srcs/src/A.java\n"), 4);
    }

    #[test]
    fn test_normalize_line_endings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.patch");
        fs::write(&path, "--- a\r\n+++ a\r\n").unwrap();
        assert_eq!(normalize_line_endings(&path).unwrap(), "--- a\n+++ a\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "--- a\n+++ a\n");
    }

    #[test]
    fn test_list_patch_files_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["patch_2.diff", "p.patch", "notes.txt", "patch_1.diff"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<String> = list_patch_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["p.patch", "patch_1.diff", "patch_2.diff"]);
    }

    /// Replays scripted tool results and records every call.
    #[derive(Default)]
    struct Scripted {
        compile_errors: RefCell<Vec<Result<usize>>>,
        patch_results: RefCell<Vec<Result<()>>>,
        calls: RefCell<Vec<String>>,
    }

    impl Compiler for Scripted {
        fn compile(&self, _project_root: &Path) -> Result<CompileOutput> {
            self.calls.borrow_mut().push("compile".into());
            let errors = self.compile_errors.borrow_mut().remove(0)?;
            Ok(CompileOutput {
                success: errors == 0,
                stdout: String::new(),
                stderr: if errors == 0 { String::new() } else { format!("{errors} errors\n") },
            })
        }
    }

    impl PatchTool for Scripted {
        fn apply(&self, patch: &Path, _work_dir: &Path, strip: usize, mode: PatchMode) -> Result<()> {
            self.calls.borrow_mut().push(format!("{mode:?} -p{strip}"));
            let mut results = self.patch_results.borrow_mut();
            if results.is_empty() {
                return Ok(());
            }
            results.remove(0).map_err(|e| apply_failure(patch, e.to_string()))
        }
    }

    fn patch_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "--- /w/p/src/A.java\n+++ /w/p/src/A.java\n").unwrap();
        path
    }

    #[test]
    fn test_validated_patch_is_kept() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        let tool = Scripted { compile_errors: RefCell::new(vec![Ok(2), Ok(2)]), ..Default::default() };
        let mut counters = PatchCounters::default();

        let outcomes = PatchApplyValidator::new(&tool, &tool, &ws)
            .validate_project("p", dir.path(), &[patch_file(&dir, "a.patch")], &mut counters)
            .unwrap();

        assert_eq!(outcomes[0].state, PatchState::Validated);
        assert_eq!(outcomes[0].strip_depth, 4);
        assert_eq!(*tool.calls.borrow(), vec!["compile", "DryRun -p4", "Forward -p4", "compile"]);
        assert_eq!(counters, PatchCounters { total_patches: 1, failed_patches: 0, compilation_regressions: 0 });
    }

    #[test]
    fn test_regression_reverts_and_counts_once() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        let tool = Scripted { compile_errors: RefCell::new(vec![Ok(0), Ok(1)]), ..Default::default() };
        let mut counters = PatchCounters::default();

        let outcomes = PatchApplyValidator::new(&tool, &tool, &ws)
            .validate_project("p", dir.path(), &[patch_file(&dir, "a.patch")], &mut counters)
            .unwrap();

        assert_eq!(outcomes[0].state, PatchState::Reverted);
        assert_eq!(outcomes[0].errors_after, Some(1));
        assert_eq!(tool.calls.borrow().last().map(String::as_str), Some("Reverse -p4"));
        assert_eq!(counters.compilation_regressions, 1);
        assert_eq!(counters.failed_patches, 0);
        let log = fs::read_to_string(ws.logs_dir().join("compilation_errors.log")).unwrap();
        assert!(log.starts_with("Outputs differ after applying patches for p.\nAfter:\n1 errors"));
    }

    #[test]
    fn test_dry_run_rejection_skips_real_apply_and_continues() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        let tool = Scripted {
            compile_errors: RefCell::new(vec![Ok(0), Ok(0)]),
            patch_results: RefCell::new(vec![Err(PipelineError::MalformedDiff("hunk".into()))]),
            ..Default::default()
        };
        let mut counters = PatchCounters::default();
        let patches = [patch_file(&dir, "a.patch"), patch_file(&dir, "b.patch")];

        let outcomes = PatchApplyValidator::new(&tool, &tool, &ws)
            .validate_project("p", dir.path(), &patches, &mut counters)
            .unwrap();

        assert_eq!(outcomes[0].state, PatchState::Failed);
        assert_eq!(outcomes[1].state, PatchState::Validated);
        assert_eq!(
            *tool.calls.borrow(),
            vec!["compile", "DryRun -p4", "DryRun -p4", "Forward -p4", "compile"]
        );
        assert_eq!(counters, PatchCounters { total_patches: 2, failed_patches: 1, compilation_regressions: 0 });
        assert!(ws.logs_dir().join("failed_patches/p.log").exists());
    }

    #[test]
    fn test_compile_timeout_after_apply_reverts_and_fails() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        let timeout = PipelineError::ToolTimeout { tool: "javac".into(), timeout: Duration::from_secs(1) };
        let tool = Scripted { compile_errors: RefCell::new(vec![Ok(0), Err(timeout)]), ..Default::default() };
        let mut counters = PatchCounters::default();

        let outcomes = PatchApplyValidator::new(&tool, &tool, &ws)
            .validate_project("p", dir.path(), &[patch_file(&dir, "a.patch")], &mut counters)
            .unwrap();

        assert_eq!(outcomes[0].state, PatchState::Failed);
        assert_eq!(tool.calls.borrow().last().map(String::as_str), Some("Reverse -p4"));
        assert_eq!(counters.failed_patches, 1);
    }

    #[test]
    fn test_no_patches_means_no_baseline_compile() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let tool = Scripted::default();
        let mut counters = PatchCounters::default();
        let outcomes = PatchApplyValidator::new(&tool, &tool, &ws)
            .validate_project("p", dir.path(), &[], &mut counters)
            .unwrap();
        assert!(outcomes.is_empty());
        assert!(tool.calls.borrow().is_empty());
    }
}
