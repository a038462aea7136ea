use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod progress;

use progress::Progress;
use rlpatch::config::PipelineConfig;
use rlpatch::contexts::batch::{merge_batch_files, read_responses};
use rlpatch::contexts::patch_validation::{PatchCounters, PatchState};
use rlpatch::contexts::pipeline::{
    apply_project, discover_projects, export_prompt_json, prepare_project, response_files,
    synthesize_responses, RunContext,
};
use rlpatch::contexts::warning_log::load_warning_log;
use rlpatch::contexts::{compare_runs, Workspace};
use rlpatch::data::Finding;
use rlpatch::metadata_store::MetadataStore;
use rlpatch::tools::{build_compiler, build_method_locator, build_patch_tool};
use rlpatch::PipelineError;

pub struct Config {
    pub verbose: bool,
    pub pipeline: PipelineConfig,
    pub workspace: Workspace,
}

impl Config {
    /// Configuration file and environment first, then command-line overrides.
    pub fn load(path: Option<&Path>, work_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let mut pipeline = PipelineConfig::load(path).context("Failed to load configuration")?;
        if let Some(dir) = work_dir {
            pipeline.work_dir = dir;
        }
        let workspace = Workspace::new(pipeline.work_dir.clone());
        Ok(Config { verbose, pipeline, workspace })
    }
}

fn resolve_projects(projects: Vec<String>, config: &Config) -> Result<Vec<String>> {
    if !projects.is_empty() {
        return Ok(projects);
    }
    discover_projects(&config.pipeline).context("Failed to list projects from the fix report directory")
}

pub async fn prepare(projects: Vec<String>, config: &Config) -> Result<()> {
    let projects = resolve_projects(projects, config)?;
    if projects.is_empty() {
        println!("No projects found to prepare");
        return Ok(());
    }
    println!("Preparing prompts for {} project(s)", projects.len());

    let workspace = &config.workspace;
    let mut run = RunContext::load(workspace).context("Failed to load task metadata")?;
    let locator = build_method_locator(&config.pipeline);

    let mut handles = Vec::with_capacity(projects.len());
    for project in projects {
        let workspace = workspace.clone();
        let pipeline = config.pipeline.clone();
        let locator = Arc::clone(&locator);
        let name = project.clone();
        let handle = tokio::task::spawn_blocking(move || {
            prepare_project(&workspace, &pipeline, &name, locator.as_ref())
        });
        handles.push((project, handle));
    }

    let mut progress = Progress::new("prepare", handles.len());
    let mut batch_files = Vec::new();
    for (project, handle) in handles {
        progress.begin(&project);
        let prepared = match handle.await.context("Preparation task panicked")? {
            Ok(prepared) => prepared,
            Err(e) => {
                eprintln!("✗ {}: {}", project, e);
                progress.end(false);
                continue;
            }
        };

        let report = &prepared.report;
        if report.filter_degraded {
            println!("  ! fixability table unusable, suggestions were not filtered");
        }
        if config.verbose {
            println!(
                "  {} findings, {} suggestions ({} fixable), {} matched",
                report.findings, report.suggestions, report.fixable, report.matched
            );
        }
        println!(
            "✓ {}: {} prompts from {} tasks, {} merged groups, {} skipped",
            project,
            report.active_prompts,
            report.tasks,
            report.merged_groups,
            report.skipped.len()
        );
        progress.tally("Prompts", report.active_prompts);
        progress.tally("Skipped", report.skipped.len());
        if report.batch_requests > 0 {
            batch_files.push(workspace.batch_input_file(&project));
        }

        run.absorb(workspace, prepared)
            .with_context(|| format!("Failed to record task metadata for {}", project))?;
        progress.end(true);
    }

    run.save(workspace).context("Failed to save task metadata")?;

    if !batch_files.is_empty() {
        let merged = merge_batch_files(workspace, &batch_files, config.pipeline.batch_splits)
            .context("Failed to merge batch request files")?;
        for path in merged {
            println!("Batch requests written to {}", path.display());
        }
    }

    progress.finish();
    Ok(())
}

pub async fn prompt_json(projects: Vec<String>, out: PathBuf, config: &Config) -> Result<()> {
    let projects = resolve_projects(projects, config)?;
    let mut progress = Progress::new("prompt-json", projects.len());

    for project in &projects {
        progress.begin(project);
        match export_prompt_json(&config.pipeline, project, &out) {
            Ok(written) => {
                println!("✓ {}: {} prompt files", project, written.len());
                progress.tally("Files", written.len());
                progress.end(true);
            }
            Err(e) => {
                eprintln!("✗ {}: {}", project, e);
                progress.end(false);
            }
        }
    }

    progress.finish();
    Ok(())
}

pub async fn synthesize(responses: PathBuf, config: &Config) -> Result<()> {
    let workspace = &config.workspace;
    let store = MetadataStore::load(&workspace.metadata_path()).context("Failed to load task metadata")?;
    if store.is_empty() {
        println!("No task metadata in {}; run `prepare` first", workspace.root().display());
        return Ok(());
    }

    let files = response_files(&responses)
        .with_context(|| format!("Failed to read responses from {}", responses.display()))?;
    let mut progress = Progress::new("synthesize", files.len());

    // Patches of a project are reset once per run, so every file is read before synthesis.
    let mut all = Vec::new();
    for file in &files {
        progress.begin(&file.display().to_string());
        match read_responses(file) {
            Ok(parsed) => {
                progress.tally("Responses", parsed.len());
                all.extend(parsed);
                progress.end(true);
            }
            Err(e) => {
                eprintln!("✗ {}: {}", file.display(), e);
                progress.end(false);
            }
        }
    }

    let report = synthesize_responses(workspace, &store, &all, config.pipeline.patch_layout)
        .context("Failed to synthesize patches")?;
    if config.verbose {
        for path in &report.patch_files {
            println!("  {}", path.display());
        }
    }
    println!(
        "✓ {} patches, {} unchanged, {} API errors",
        report.patches_written, report.unchanged, report.api_errors
    );
    progress.tally("Patches", report.patches_written);
    progress.tally("Errors", report.api_errors);
    progress.tally("Skipped", report.missing_metadata + report.drifted + report.failed);

    progress.finish();
    Ok(())
}

pub async fn apply(project_root: PathBuf, patches: Option<PathBuf>, config: &Config) -> Result<()> {
    if !project_root.is_dir() {
        anyhow::bail!("Project root does not exist: {}", project_root.display());
    }

    let compiler = build_compiler(&config.pipeline);
    let patch_tool = build_patch_tool(&config.pipeline);
    let mut counters = PatchCounters::default();

    let outcomes = apply_project(
        &config.workspace,
        compiler.as_ref(),
        patch_tool.as_ref(),
        &project_root,
        patches.as_deref(),
        &mut counters,
    )
    .with_context(|| format!("Failed to apply patches to {}", project_root.display()))?;

    let mut progress = Progress::new("apply", outcomes.len());
    for outcome in &outcomes {
        let name = outcome.patch.display().to_string();
        progress.begin(&name);
        match outcome.state {
            PatchState::Validated => println!("✓ applied with -p{}", outcome.strip_depth),
            PatchState::Reverted => println!(
                "↺ reverted: error count became {}",
                outcome.errors_after.unwrap_or_default()
            ),
            _ => eprintln!("✗ {}", outcome.detail.as_deref().unwrap_or("failed")),
        }
        progress.end(outcome.state == PatchState::Validated);
    }

    progress.tally("Patches", counters.total_patches);
    progress.tally("Rejected", counters.failed_patches);
    progress.tally("Regressions", counters.compilation_regressions);
    progress.finish();
    Ok(())
}

pub async fn compare(before: PathBuf, after: PathBuf, config: &Config) -> Result<()> {
    for path in [&before, &after] {
        if !path.is_file() {
            return Err(PipelineError::MissingInputFile(path.clone()).into());
        }
    }
    let old = load_warning_log(&before);
    let new = load_warning_log(&after);

    let comparison = compare_runs(&old, &new);
    println!("Resolved ({}):", comparison.resolved.len());
    for finding in &comparison.resolved {
        println!("  {}:{}{}", finding.filepath, finding.line, owning_tag(finding));
    }
    println!("Persisting ({}):", comparison.persisting.len());
    if config.verbose {
        for (was, now) in &comparison.persisting {
            println!("  {}:{} -> {}:{}{}", was.filepath, was.line, now.filepath, now.line, owning_tag(now));
        }
    }
    println!("Introduced ({}):", comparison.introduced.len());
    for finding in &comparison.introduced {
        println!("  {}:{}{}", finding.filepath, finding.line, owning_tag(finding));
    }
    Ok(())
}

fn owning_tag(finding: &Finding) -> &'static str {
    if finding.is_owning_overwrite { " [owning field overwrite]" } else { "" }
}
