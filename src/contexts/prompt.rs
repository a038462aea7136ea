//! Repair prompt synthesis and merging of prompts that target the same method.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::matching::MatchedPair;
use super::workspace::Workspace;
use crate::data::{MethodLocator, MethodRange, TaskMetadata};
use crate::error::Result;
use crate::metadata_store::{hash_text, MetadataStore};

const WARNING_LABEL: &str = "CF Warning";
const SUGGESTION_LABEL: &str = "Fix Suggestion from RLFixer";

pub const PROMPT_INTRO: &str = "You are given a Java source code where a (or more than one) potential resource leak has been detected. \
The Checker Framework (CF) has provided a warning indicating the issue, and a leak repair tool, \
RLFixer, has suggested a potential fix.\n\n";

pub const TASK_INSTRUCTIONS: &str = "Task:\n\
Please apply the fix suggested by RLFixer to resolve the resource leak in the provided method, \
ensuring that the resource is properly managed and the method's functionality remains intact.\
\n\nAlso, you may need to declare additional temporary variables for the resource to close the same resource being declared if the resource leaked is not assigned to a variable in the original code.\
\n\nIMPORTANT NOTES:\n\
- Ensure the generated code is **compilation-ready** and does not introduce any errors.\
- If you declare additional temporary resource variables, use fully qualified names for any new resource classes (e.g., `java.io.FileInputStream`) to avoid import issues.\n\
- If you introduce a `try-finally` or `try-with-resources` block, **DO NOT CHANGE THE ORIGINAL INDENTATION OF THE CODE**.\n\
- All variables used in try/catch/finally blocks must be declared and initialized (to null if necessary) outside those blocks to avoid uninitialized variable errors.\n\
- All exceptions from your inserted code (finalizer method's) must be caught locally (do NOT change the method signature to pass exceptions).\n\
- Always declare resource variables outside the try block and initialize them to null.\n\
- In the finally block, always check if the resource variable is not null before calling .close() on it.\n\
- Do not introduce unused variables, unreachable code, or redundant statements.\n\
- If you need to call a method that declares throws Throwable (such as finalize()), always catch Throwable (not just Exception) in the catch block to avoid compilation errors.\n\
- Before returning the code, double-check for any common Java compilation errors such as uninitialized variables, missing imports,try block without catch/finally, or incorrect exception handling.\n\n\
Please refactor the provided Java 'Source code' to resolve the resource leak as suggested, but return only the modified code with no explanations or comments. \
Do return the whole modified method if the input source code is a method. \
If the input source code is the whole file, then return the whole java file with the modified method.";

/// One diagnostic and the fix suggested for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSection {
    pub warning: String,
    pub suggestion: String,
}

/// A repair request, kept in parts so several can be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPrompt {
    pub intro: String,
    pub sections: Vec<PromptSection>,
    pub source_code: String,
    pub task: String,
}

impl RepairPrompt {
    pub fn new(warning: &str, suggestion: &str, source_code: &str) -> Self {
        Self {
            intro: PROMPT_INTRO.to_string(),
            sections: vec![PromptSection {
                warning: warning.to_string(),
                suggestion: suggestion.to_string(),
            }],
            source_code: source_code.to_string(),
            task: TASK_INSTRUCTIONS.to_string(),
        }
    }

    /// Combines prompts for one method: the first member's intro, every
    /// member's sections in order, then the last member's source and task.
    pub fn merge(members: &[&RepairPrompt]) -> Option<RepairPrompt> {
        let first = members.first()?;
        let last = members.last()?;
        Some(RepairPrompt {
            intro: first.intro.clone(),
            sections: members.iter().flat_map(|m| m.sections.iter().cloned()).collect(),
            source_code: last.source_code.clone(),
            task: last.task.clone(),
        })
    }

    /// The prompt text. Sections are numbered only when there is more than one.
    pub fn render(&self) -> String {
        let numbered = self.sections.len() > 1;
        let mut text = self.intro.clone();
        for (k, section) in self.sections.iter().enumerate() {
            let (warning_label, suggestion_label) = if numbered {
                (format!("{} {}", WARNING_LABEL, k + 1), format!("{} {}", SUGGESTION_LABEL, k + 1))
            } else {
                (WARNING_LABEL.to_string(), SUGGESTION_LABEL.to_string())
            };
            text.push_str(&format!("{warning_label}:\n{}\n\n", section.warning));
            text.push_str(&format!("{suggestion_label}:\n{}\n\n", section.suggestion));
        }
        text.push_str(&format!("Source code:\n{}\n\n", self.source_code));
        text.push_str(&self.task);
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSlot {
    Active(RepairPrompt),
    /// Left behind by a prompt that was merged into a later one.
    Placeholder,
}

/// A project's prompts; the slot at position `i` is task index `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPrompts {
    slots: Vec<PromptSlot>,
}

impl ProjectPrompts {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn next_index(&self) -> usize {
        self.slots.len() + 1
    }

    /// Appends a prompt and returns its task index.
    pub fn push(&mut self, prompt: RepairPrompt) -> usize {
        self.slots.push(PromptSlot::Active(prompt));
        self.slots.len()
    }

    pub fn get(&self, task_index: usize) -> Option<&PromptSlot> {
        self.slots.get(task_index.checked_sub(1)?)
    }

    pub fn active(&self, task_index: usize) -> Option<&RepairPrompt> {
        match self.get(task_index)? {
            PromptSlot::Active(prompt) => Some(prompt),
            PromptSlot::Placeholder => None,
        }
    }

    fn clear(&mut self, task_index: usize) {
        if let Some(slot) = task_index.checked_sub(1).and_then(|i| self.slots.get_mut(i)) {
            *slot = PromptSlot::Placeholder;
        }
    }

    /// Active prompts with their task indices, in index order.
    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &RepairPrompt)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            PromptSlot::Active(prompt) => Some((i + 1, prompt)),
            PromptSlot::Placeholder => None,
        })
    }

    pub fn active_count(&self) -> usize {
        self.iter_active().count()
    }
}

/// One unit of prompt work: a diagnostic, its suggestion and the site to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub warning: String,
    pub suggestion: String,
    pub file_path: PathBuf,
    pub line: usize,
}

/// Expands matched pairs into work items.
///
/// An escaping suggestion yields one item per caller-side edit, located at
/// the caller. One with no extracted edits yields nothing.
pub fn work_items(pairs: &[MatchedPair]) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for pair in pairs {
        let suggestion = pair.suggestion;
        if suggestion.is_escape {
            if suggestion.escape_info.is_empty() {
                info!(
                    "No escape info found for {} in {}",
                    suggestion.line, suggestion.filepath
                );
                continue;
            }
            items.extend(suggestion.escape_info.iter().map(|escape| WorkItem {
                warning: pair.finding.raw_block.clone(),
                suggestion: escape.suggestion_text.clone(),
                file_path: PathBuf::from(&escape.filepath),
                line: escape.line,
            }));
        } else {
            items.push(WorkItem {
                warning: pair.finding.raw_block.clone(),
                suggestion: suggestion.suggestion_text.clone(),
                file_path: PathBuf::from(&suggestion.filepath),
                line: suggestion.line,
            });
        }
    }
    items
}

/// Builds prompts for one project, recording task metadata as it goes.
pub struct PromptSynthesizer<'a> {
    project: &'a str,
    locator: &'a dyn MethodLocator,
    workspace: &'a Workspace,
}

impl<'a> PromptSynthesizer<'a> {
    pub fn new(project: &'a str, locator: &'a dyn MethodLocator, workspace: &'a Workspace) -> Self {
        Self { project, locator, workspace }
    }

    /// Creates one task per work item, numbered from 1.
    ///
    /// Metadata for a task is recorded before its prompt exists. Items whose
    /// source cannot be read are skipped.
    pub fn synthesize(&self, items: &[WorkItem], metadata: &mut MetadataStore) -> Result<ProjectPrompts> {
        let mut prompts = ProjectPrompts::default();
        for item in items {
            let source = match fs::read(&item.file_path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Skipping task for {}: {}", item.file_path.display(), e);
                    continue;
                }
            };

            let range = self
                .locator
                .locate(&item.file_path, item.line)
                .filter(|range| fits(range, &source));
            let context = match range {
                Some(range) => method_context(&source, range, item.line),
                None => {
                    self.workspace.log_unmatched_method(item.line, &item.file_path);
                    source.clone()
                }
            };

            let index = prompts.next_index();
            metadata.record(TaskMetadata::new(
                self.project,
                index,
                &item.file_path,
                range,
                Some(hash_text(&source)),
            ))?;
            prompts.push(RepairPrompt::new(&item.warning, &item.suggestion, &context));
        }

        debug!("Project {} has {} prompts", self.project, prompts.len());
        Ok(prompts)
    }
}

fn fits(range: &MethodRange, source: &str) -> bool {
    range.start_line >= 1
        && range.start_line <= range.end_line
        && range.end_line <= source.split_inclusive('\n').count()
}

/// The method's lines with the flagged line tagged `//__LINE<n>__//`.
pub fn method_context(source: &str, range: MethodRange, line: usize) -> String {
    source
        .split_inclusive('\n')
        .enumerate()
        .skip(range.start_line.saturating_sub(1))
        .take((range.end_line + 1).saturating_sub(range.start_line))
        .map(|(i, text)| {
            if i + 1 == line {
                format!("{}   //__LINE{}__//\n", text.trim_end(), line)
            } else {
                text.to_string()
            }
        })
        .collect()
}

/// Task indices merged into one prompt, and the index of that prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedGroup {
    pub members: Vec<usize>,
    pub merged_index: usize,
}

/// Merges prompts whose tasks share a file and method window.
///
/// Tasks without a method window are never merged. Each merged prompt is
/// appended under a fresh index carrying the first member's metadata, and
/// the members become placeholders.
pub fn merge_colocated(
    project: &str,
    prompts: &mut ProjectPrompts,
    metadata: &mut MetadataStore,
) -> Result<Vec<MergedGroup>> {
    let count = prompts.len();
    let mut seen = vec![false; count + 1];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for i in 1..=count {
        if seen[i] {
            continue;
        }
        seen[i] = true;
        let Some(anchor) = metadata.get(project, i).filter(|m| m.start_line.is_some()) else {
            continue;
        };

        let mut group = vec![i];
        for j in (i + 1)..=count {
            if seen[j] {
                continue;
            }
            let same = metadata
                .get(project, j)
                .is_some_and(|other| other.start_line.is_some() && anchor.same_window(other));
            if same {
                group.push(j);
                seen[j] = true;
            }
        }
        if group.len() > 1 {
            groups.push(group);
        }
    }

    let mut merged = Vec::new();
    for members in groups {
        let parts: Vec<&RepairPrompt> = members.iter().filter_map(|&i| prompts.active(i)).collect();
        if parts.len() != members.len() {
            warn!("Prompt missing for {} group {:?}, not merging", project, members);
            continue;
        }
        let Some(combined) = RepairPrompt::merge(&parts) else { continue };
        let Some(first) = metadata.get(project, members[0]).cloned() else { continue };

        for &i in &members {
            prompts.clear(i);
        }
        let merged_index = prompts.push(combined);
        metadata.record(TaskMetadata { task_index: merged_index, ..first })?;

        info!("Merged prompts {:?} for project {}", members, project);
        merged.push(MergedGroup { members, merged_index });
    }

    Ok(merged)
}

/// Writes every active prompt to `prompts/<project>/prompt<N>.txt`.
pub fn write_prompt_files(workspace: &Workspace, project: &str, prompts: &ProjectPrompts) -> Result<usize> {
    let dir = workspace.prompts_dir(project);
    fs::create_dir_all(&dir)?;
    let mut written = 0;
    for (index, prompt) in prompts.iter_active() {
        fs::write(workspace.prompt_file(project, index), prompt.render())?;
        written += 1;
    }
    Ok(written)
}

/// Input for the single-shot patcher tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptJson {
    #[serde(rename = "CF Leaks")]
    pub cf_leaks: Vec<String>,
    #[serde(rename = "RLFixer hint")]
    pub rlfixer_hint: Vec<String>,
    /// The leak is a non-final owning field that may be overwritten.
    #[serde(rename = "Owning field overwrite", default)]
    pub owning_overwrite: bool,
}

impl PromptJson {
    pub fn for_pair(pair: &MatchedPair) -> Self {
        Self {
            cf_leaks: vec![pair.finding.raw_block.clone()],
            rlfixer_hint: vec![pair.suggestion.suggestion_text.clone()],
            owning_overwrite: pair.finding.is_owning_overwrite,
        }
    }
}

/// Writes one prompt JSON per pair into `dir`, returning the written paths.
pub fn write_prompt_json(dir: &Path, project: &str, pairs: &[MatchedPair]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(pairs.len());
    for (n, pair) in pairs.iter().enumerate() {
        let safe_rel = pair.suggestion.relpath_under_src().replace(['/', '\\'], "_");
        let path = dir.join(format!(
            "prompt-{}-{}-L{}-{:04}.json",
            project,
            safe_rel,
            pair.suggestion.line,
            n + 1
        ));
        fs::write(&path, serde_json::to_string_pretty(&PromptJson::for_pair(pair))?)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EscapeInfo, Finding, FixSuggestion};
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct FixedLocator(HashMap<(PathBuf, usize), MethodRange>);

    impl MethodLocator for FixedLocator {
        fn locate(&self, file_path: &Path, line: usize) -> Option<MethodRange> {
            self.0.get(&(file_path.to_path_buf(), line)).copied()
        }
    }

    fn source(n: usize) -> String {
        (1..=n).map(|i| format!("    stmt{i};  \n")).collect()
    }

    fn item(path: &Path, line: usize, tag: &str) -> WorkItem {
        WorkItem {
            warning: format!("warning {tag}"),
            suggestion: format!("suggestion {tag}"),
            file_path: path.to_path_buf(),
            line,
        }
    }

    #[test]
    fn test_single_prompt_layout() {
        let text = RepairPrompt::new("W", "S", "code").render();
        assert!(text.starts_with(PROMPT_INTRO));
        assert!(text.contains("CF Warning:\nW\n\nFix Suggestion from RLFixer:\nS\n\nSource code:\ncode\n\nTask:\n"));
        assert!(text.ends_with("with the modified method."));
    }

    #[test]
    fn test_method_context_marks_flagged_line() {
        let src = source(6);
        let ctx = method_context(&src, MethodRange { start_line: 2, end_line: 4 }, 3);
        assert_eq!(ctx, "    stmt2;  \n    stmt3;   //__LINE3__//\n    stmt4;  \n");
    }

    #[test]
    fn test_unresolved_method_uses_whole_file_and_logs() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("F.java");
        fs::write(&file, source(5)).unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        let locator = FixedLocator(HashMap::new());
        let mut store = MetadataStore::default();

        let prompts = PromptSynthesizer::new("p", &locator, &ws)
            .synthesize(&[item(&file, 3, "a")], &mut store)
            .unwrap();

        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts.active(1).unwrap().source_code, source(5));
        let meta = store.get("p", 1).unwrap();
        assert_eq!(meta.start_line, None);
        assert_eq!(meta.source_sha256.as_deref(), Some(hash_text(&source(5)).as_str()));

        let log = fs::read_to_string(ws.logs_dir().join("unmatched_methods.log")).unwrap();
        assert!(log.contains("Method not found for suggestion 3 in"));
    }

    #[test]
    fn test_out_of_bounds_window_is_treated_as_unresolved() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("F.java");
        fs::write(&file, source(5)).unwrap();
        let ws = Workspace::new(dir.path());
        let locator = FixedLocator(HashMap::from([(
            (file.clone(), 3),
            MethodRange { start_line: 2, end_line: 50 },
        )]));
        let mut store = MetadataStore::default();
        PromptSynthesizer::new("p", &locator, &ws)
            .synthesize(&[item(&file, 3, "a")], &mut store)
            .unwrap();
        assert_eq!(store.get("p", 1).unwrap().method_range(), None);
    }

    #[test]
    fn test_merge_same_window() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("F.java");
        fs::write(&file, source(30)).unwrap();
        let ws = Workspace::new(dir.path());
        let window = MethodRange { start_line: 5, end_line: 20 };
        let locator = FixedLocator(HashMap::from([
            ((file.clone(), 8), window),
            ((file.clone(), 12), window),
        ]));
        let mut store = MetadataStore::default();
        let synthesizer = PromptSynthesizer::new("p", &locator, &ws);
        let mut prompts = synthesizer
            .synthesize(&[item(&file, 8, "a"), item(&file, 25, "b"), item(&file, 12, "c")], &mut store)
            .unwrap();

        let groups = merge_colocated("p", &mut prompts, &mut store).unwrap();
        assert_eq!(groups, vec![MergedGroup { members: vec![1, 3], merged_index: 4 }]);

        assert_eq!(prompts.get(1), Some(&PromptSlot::Placeholder));
        assert_eq!(prompts.get(3), Some(&PromptSlot::Placeholder));
        assert!(prompts.active(2).is_some());
        assert_eq!(prompts.active_count(), 2);

        let merged = prompts.active(4).unwrap();
        let text = merged.render();
        assert!(text.contains("CF Warning 1:\nwarning a\n\nFix Suggestion from RLFixer 1:\nsuggestion a\n\n"));
        assert!(text.contains("CF Warning 2:\nwarning c\n\nFix Suggestion from RLFixer 2:\nsuggestion c\n\nSource code:\n"));
        assert_eq!(text.matches("Source code:").count(), 1);
        assert_eq!(text.matches("Task:\n").count(), 1);
        // The source shown is the last member's, tagged at its line.
        assert!(merged.source_code.contains("//__LINE12__//"));

        let first = store.get("p", 1).unwrap();
        let copied = store.get("p", 4).unwrap();
        assert_eq!(copied.task_index, 4);
        assert!(copied.same_window(first));
        assert_eq!(copied.source_sha256, first.source_sha256);
    }

    #[test]
    fn test_unresolved_tasks_are_never_merged() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("F.java");
        fs::write(&file, source(10)).unwrap();
        let ws = Workspace::new(dir.path());
        let locator = FixedLocator(HashMap::new());
        let mut store = MetadataStore::default();
        let mut prompts = PromptSynthesizer::new("p", &locator, &ws)
            .synthesize(&[item(&file, 2, "a"), item(&file, 3, "b")], &mut store)
            .unwrap();
        assert!(merge_colocated("p", &mut prompts, &mut store).unwrap().is_empty());
        assert_eq!(prompts.active_count(), 2);
    }

    #[test]
    fn test_escape_suggestions_expand_per_caller() {
        let finding = Finding {
            filepath: "/w/p/src/a/Pool.java".into(),
            line: 12,
            raw_block: "leak".into(),
            is_owning_overwrite: false,
            method: None,
            span: 0..4,
        };
        let escape = |line| EscapeInfo {
            filepath: "/w/p/src/b/Client.java".into(),
            line,
            suggestion_text: format!("edit {line}"),
        };
        let with_info = FixSuggestion {
            index: 1,
            filepath: finding.filepath.clone(),
            line: 12,
            suggestion_text: "+++ NOTE: Resource escapes".into(),
            is_escape: true,
            unfixable: false,
            escape_info: vec![escape(40), escape(44)],
        };
        let without_info = FixSuggestion { escape_info: Vec::new(), ..with_info.clone() };

        let items = work_items(&[
            MatchedPair { suggestion: &with_info, finding: &finding },
            MatchedPair { suggestion: &without_info, finding: &finding },
        ]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].file_path, PathBuf::from("/w/p/src/b/Client.java"));
        assert_eq!(items[1].line, 44);
        assert_eq!(items[1].warning, "leak");
    }

    #[test]
    fn test_prompt_json_shape() {
        let dir = TempDir::new().unwrap();
        let finding = Finding {
            filepath: "/w/p/src/a/R.java".into(),
            line: 25,
            raw_block: "leak".into(),
            is_owning_overwrite: true,
            method: None,
            span: 0..4,
        };
        let suggestion = FixSuggestion {
            index: 0,
            filepath: finding.filepath.clone(),
            line: 25,
            suggestion_text: "close".into(),
            is_escape: false,
            unfixable: false,
            escape_info: Vec::new(),
        };
        let paths = write_prompt_json(dir.path(), "p", &[MatchedPair { suggestion: &suggestion, finding: &finding }])
            .unwrap();
        assert_eq!(paths[0].file_name().unwrap(), "prompt-p-a_R.java-L25-0001.json");
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(value["CF Leaks"][0], "leak");
        assert_eq!(value["RLFixer hint"][0], "close");
        assert_eq!(value["Owning field overwrite"], true);

        let legacy: PromptJson = serde_json::from_str(r#"{"CF Leaks": ["x"], "RLFixer hint": ["y"]}"#).unwrap();
        assert!(!legacy.owning_overwrite);
    }
}
