//! On-disk layout of a pipeline work directory and its append-only run logs.
//!
//! Writing a run log never aborts the pipeline; a failed append is reported
//! through `tracing` and processing continues.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

const LOGS_DIR: &str = "logs";
const STATE_DIR: &str = ".rlpatch";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPrompts {
    pub project_name: String,
    pub skipped_prompts: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prompts_dir(&self, project: &str) -> PathBuf {
        self.root.join("prompts").join(project)
    }

    pub fn prompt_file(&self, project: &str, task_index: usize) -> PathBuf {
        self.prompts_dir(project).join(format!("prompt{task_index}.txt"))
    }

    pub fn batch_input_dir(&self) -> PathBuf {
        self.root.join("batch_input")
    }

    pub fn batch_input_file(&self, project: &str) -> PathBuf {
        self.batch_input_dir().join(project).join(format!("{project}.jsonl"))
    }

    /// Part `n` (1-based) of the cross-project batch.
    pub fn merged_batch_file(&self, part: usize) -> PathBuf {
        self.batch_input_dir().join(format!("merged_batch_{part}.jsonl"))
    }

    pub fn patches_dir(&self, project: &str) -> PathBuf {
        self.root.join("patches").join(project)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("task_metadata.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn log_unmatched_method(&self, line: usize, file: &Path) {
        self.append_log(
            &self.logs_dir().join("unmatched_methods.log"),
            &format!("Method not found for suggestion {} in {}\n", line, file.display()),
        );
    }

    pub fn log_token_limit_error(&self, custom_id: &str, message: &str) {
        self.append_log(
            &self.logs_dir().join("token_limit_errors.log"),
            &format!("Error for custom_id {custom_id}: {message}\n"),
        );
    }

    pub fn log_compilation_regression(&self, project: &str, stderr: &str) {
        self.append_log(
            &self.logs_dir().join("compilation_errors.log"),
            &format!("Outputs differ after applying patches for {project}.\nAfter:\n{stderr}\n\n"),
        );
    }

    pub fn log_failed_patch(&self, project: &str, patch: &Path, detail: &str) {
        self.append_log(
            &self.logs_dir().join("failed_patches").join(format!("{project}.log")),
            &format!("Failed to apply patch {}: {}\n", patch.display(), detail),
        );
    }

    /// Replaces `project`'s entry in `skipped_prompts.json`, keeping other projects.
    pub fn record_skipped_prompts(&self, project: &str, indices: &[usize]) -> Result<()> {
        let path = self.logs_dir().join("skipped_prompts.json");
        let mut entries: Vec<SkippedPrompts> = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        entries.retain(|e| e.project_name != project);
        if !indices.is_empty() {
            entries.push(SkippedPrompts {
                project_name: project.to_string(),
                skipped_prompts: indices.to_vec(),
            });
        }
        fs::create_dir_all(self.logs_dir())?;
        fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    fn append_log(&self, path: &Path, text: &str) {
        if let Err(e) = append(path, text) {
            warn!("Could not append to {}: {}", path.display(), e);
        }
    }
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}
