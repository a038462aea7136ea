//! Per-project orchestration of the preparation, synthesis and apply stages.

use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::batch::{
    clean_model_output, prepare_batch, split_custom_id, write_jsonl, BatchResponse, PreparedBatch,
};
use super::fix_suggestions::parse_fix_suggestions;
use super::fixability::FixabilityFilter;
use super::matching::{match_suggestions, MatchedPair};
use super::patch_synthesis::{synthesize_patch, PatchLayout, PatchSink};
use super::patch_validation::{list_patch_files, PatchApplyValidator, PatchCounters, PatchOutcome};
use super::prompt::{
    merge_colocated, work_items, write_prompt_files, write_prompt_json, ProjectPrompts, PromptSynthesizer,
};
use super::warning_log::load_warning_log;
use super::workspace::Workspace;
use crate::config::PipelineConfig;
use crate::data::{Compiler, Finding, FixSuggestion, MethodLocator, PatchTool};
use crate::error::{PipelineError, Result};
use crate::metadata_store::{hash_text, MetadataStore};

/// What preparation did for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectReport {
    pub project: String,
    pub findings: usize,
    pub suggestions: usize,
    /// Suggestions that are neither unfixable nor rejected by the fixability table.
    pub fixable: usize,
    pub matched: usize,
    pub tasks: usize,
    pub merged_groups: usize,
    pub active_prompts: usize,
    pub batch_requests: usize,
    pub skipped: Vec<usize>,
    pub filter_degraded: bool,
}

#[derive(Debug)]
pub struct PreparedProject {
    pub report: ProjectReport,
    pub prompts: ProjectPrompts,
    /// Metadata recorded for this project only.
    pub metadata: MetadataStore,
    pub batch: PreparedBatch,
}

/// Parsed inputs of one project: its warning log, fix report and fixability table.
#[derive(Debug)]
pub struct ProjectInputs {
    pub findings: Vec<Finding>,
    pub suggestions: Vec<FixSuggestion>,
    pub filter: FixabilityFilter,
}

impl ProjectInputs {
    /// The warning log and the fix report must exist; a missing fixability
    /// table only degrades filtering.
    pub fn load(config: &PipelineConfig, project: &str) -> Result<Self> {
        let warnings_path = config.warnings_log(project);
        if !warnings_path.is_file() {
            return Err(PipelineError::MissingInputFile(warnings_path));
        }
        let fixes_path = config.fixes_report(project);
        if !fixes_path.is_file() {
            return Err(PipelineError::MissingInputFile(fixes_path));
        }

        Ok(ProjectInputs {
            findings: load_warning_log(&warnings_path),
            suggestions: parse_fix_suggestions(&fs::read_to_string(&fixes_path)?),
            filter: FixabilityFilter::load(&config.fixability_table(project)),
        })
    }

    pub fn matched_pairs(&self) -> Vec<MatchedPair<'_>> {
        match_suggestions(&self.suggestions, &self.findings, Some(&self.filter))
    }

    /// Suggestions that are neither unfixable nor rejected by the fixability table.
    pub fn fixable_count(&self) -> usize {
        self.suggestions.iter().filter(|s| !s.unfixable && self.filter.allows(s)).count()
    }
}

/// Runs parsing, filtering, matching, prompt synthesis and merging for `project`,
/// then writes its prompt files and batch request file.
pub fn prepare_project(
    workspace: &Workspace,
    config: &PipelineConfig,
    project: &str,
    locator: &dyn MethodLocator,
) -> Result<PreparedProject> {
    let inputs = ProjectInputs::load(config, project)?;
    let fixable = inputs.fixable_count();
    let pairs = inputs.matched_pairs();
    debug!(
        "{}: {} findings, {} suggestions, {} fixable, {} matched",
        project,
        inputs.findings.len(),
        inputs.suggestions.len(),
        fixable,
        pairs.len()
    );

    let items = work_items(&pairs);
    let mut metadata = MetadataStore::default();
    let mut prompts = PromptSynthesizer::new(project, locator, workspace).synthesize(&items, &mut metadata)?;
    let tasks = prompts.len();
    let groups = merge_colocated(project, &mut prompts, &mut metadata)?;

    let prompts_dir = workspace.prompts_dir(project);
    if prompts_dir.exists() {
        fs::remove_dir_all(&prompts_dir)?;
    }
    write_prompt_files(workspace, project, &prompts)?;

    let batch = prepare_batch(project, &prompts, &config.batch_settings());
    write_jsonl(&workspace.batch_input_file(project), &batch.requests)?;

    let report = ProjectReport {
        project: project.to_string(),
        findings: inputs.findings.len(),
        suggestions: inputs.suggestions.len(),
        fixable,
        matched: pairs.len(),
        tasks,
        merged_groups: groups.len(),
        active_prompts: prompts.active_count(),
        batch_requests: batch.requests.len(),
        skipped: batch.skipped.clone(),
        filter_degraded: inputs.filter.is_degraded(),
    };
    info!(
        "Prepared {}: {} prompts from {} matched pairs ({} merged groups)",
        project, report.active_prompts, report.matched, report.merged_groups
    );
    Ok(PreparedProject { report, prompts, metadata, batch })
}

/// Writes one standalone prompt JSON per matched pair of `project` into `out`.
pub fn export_prompt_json(config: &PipelineConfig, project: &str, out: &Path) -> Result<Vec<PathBuf>> {
    let inputs = ProjectInputs::load(config, project)?;
    let pairs = inputs.matched_pairs();
    let written = write_prompt_json(out, project, &pairs)?;
    info!("Wrote {} prompt files for {} to {}", written.len(), project, out.display());
    Ok(written)
}

/// Accumulated state of a multi-project run.
#[derive(Debug, Default)]
pub struct RunContext {
    pub metadata: MetadataStore,
    pub reports: Vec<ProjectReport>,
}

impl RunContext {
    /// Starts from the metadata already persisted in `workspace`.
    pub fn load(workspace: &Workspace) -> Result<Self> {
        Ok(RunContext { metadata: MetadataStore::load(&workspace.metadata_path())?, ..Default::default() })
    }

    /// Takes over a prepared project's metadata, replacing any from an earlier run,
    /// and records its skipped prompts.
    pub fn absorb(&mut self, workspace: &Workspace, prepared: PreparedProject) -> Result<()> {
        let project = prepared.report.project.clone();
        let dropped = self.metadata.clear_project(&project);
        if dropped > 0 {
            debug!("Replacing {} earlier task records for {}", dropped, project);
        }
        self.metadata.merge(prepared.metadata)?;
        workspace.record_skipped_prompts(&project, &prepared.report.skipped)?;
        self.reports.push(prepared.report);
        Ok(())
    }

    pub fn save(&self, workspace: &Workspace) -> Result<()> {
        self.metadata.save(&workspace.metadata_path())
    }
}

/// Project names, from every `*.txt` in the fix report directory, sorted.
pub fn discover_projects(config: &PipelineConfig) -> Result<Vec<String>> {
    let dir = config.rlfixer_results_dir.join("fixes");
    if !dir.is_dir() {
        return Err(PipelineError::MissingInputFile(dir));
    }
    let mut projects: Vec<String> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    projects.sort();
    Ok(projects)
}

/// `path` itself, or every `*.jsonl` directly inside it, sorted.
pub fn response_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(PipelineError::MissingInputFile(path.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SynthesisReport {
    pub responses: usize,
    pub patches_written: usize,
    pub unchanged: usize,
    pub api_errors: usize,
    pub missing_metadata: usize,
    pub drifted: usize,
    pub failed: usize,
    pub patch_files: Vec<PathBuf>,
}

/// Turns model responses into patch files under `patches/<project>/`.
///
/// Each project's earlier patches are removed the first time one of its
/// responses is seen. API errors go to `token_limit_errors.log`; responses
/// without metadata, or whose source changed since the prompt was built,
/// are skipped.
pub fn synthesize_responses(
    workspace: &Workspace,
    store: &MetadataStore,
    responses: &[BatchResponse],
    layout: PatchLayout,
) -> Result<SynthesisReport> {
    let sink = PatchSink::new(workspace, layout);
    let mut reset: HashSet<String> = HashSet::new();
    let mut report = SynthesisReport::default();

    for response in responses {
        report.responses += 1;
        if let Some(error) = &response.error {
            workspace.log_token_limit_error(&response.custom_id, &error.message);
            report.api_errors += 1;
            continue;
        }
        let Some(meta) = split_custom_id(&response.custom_id)
            .and_then(|(project, index)| store.get(project, index))
        else {
            warn!("No task metadata for {}, skipping", response.custom_id);
            report.missing_metadata += 1;
            continue;
        };
        let Some(content) = response.content() else {
            warn!("Response {} carries no content", response.custom_id);
            report.failed += 1;
            continue;
        };

        if reset.insert(meta.project_name.clone()) {
            sink.reset(&meta.project_name)?;
        }

        let original = match fs::read(&meta.file_path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(source) => {
                let e = PipelineError::SourceUnavailable { path: meta.file_path.clone(), source };
                warn!("Skipping {}: {}", response.custom_id, e);
                report.failed += 1;
                continue;
            }
        };
        if let Some(expected) = &meta.source_sha256 {
            if hash_text(&original) != *expected {
                warn!(
                    "{} changed since prompt {} was built, skipping",
                    meta.file_path.display(),
                    response.custom_id
                );
                report.drifted += 1;
                continue;
            }
        }

        match synthesize_patch(meta, &original, &clean_model_output(content)) {
            Ok(Some(record)) => {
                let path = sink.write(&record, meta.task_index)?;
                report.patches_written += 1;
                if !report.patch_files.contains(&path) {
                    report.patch_files.push(path);
                }
            }
            Ok(None) => report.unchanged += 1,
            Err(e) => {
                warn!("Cannot build a patch for {}: {}", response.custom_id, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Synthesized {} patches from {} responses ({} errors, {} skipped)",
        report.patches_written,
        report.responses,
        report.api_errors,
        report.missing_metadata + report.drifted + report.failed
    );
    Ok(report)
}

/// Validates every patch for the project at `project_root`.
///
/// Patches come from `patches_dir` when given, else from the work
/// directory's `patches/<project>/`, where the project is named after the
/// root directory.
pub fn apply_project(
    workspace: &Workspace,
    compiler: &dyn Compiler,
    patch_tool: &dyn PatchTool,
    project_root: &Path,
    patches_dir: Option<&Path>,
    counters: &mut PatchCounters,
) -> Result<Vec<PatchOutcome>> {
    let project = project_root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = match patches_dir {
        Some(dir) => dir.to_path_buf(),
        None => workspace.patches_dir(&project),
    };
    let patches = list_patch_files(&dir)?;
    info!("Applying {} patches from {} to {}", patches.len(), dir.display(), project_root.display());
    PatchApplyValidator::new(compiler, patch_tool, workspace).validate_project(
        &project,
        project_root,
        &patches,
        counters,
    )
}
