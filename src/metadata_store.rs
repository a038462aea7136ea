//! Persisted task metadata
//!
//! Maps `(project, task index)` to the file and method window a prompt was
//! built from, so a model reply that arrives much later can be turned back
//! into a patch. Stored as JSON under `.rlpatch/` in the work directory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::data::TaskMetadata;
use crate::error::{PipelineError, Result};

/// Append-only store of task metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStore {
    /// Maps: project -> task index -> metadata
    tasks: BTreeMap<String, BTreeMap<usize, TaskMetadata>>,
}

impl MetadataStore {
    /// Load the store from `path`, or start an empty one
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let store: MetadataStore = serde_json::from_str(&content)?;
            debug!("Loaded {} task records from {}", store.len(), path.display());
            Ok(store)
        } else {
            Ok(MetadataStore::default())
        }
    }

    /// Save the store to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Record metadata for a new task. Existing keys are never overwritten.
    pub fn record(&mut self, meta: TaskMetadata) -> Result<()> {
        let project = self.tasks.entry(meta.project_name.clone()).or_default();
        if project.contains_key(&meta.task_index) {
            return Err(PipelineError::MetadataConflict {
                project: meta.project_name,
                index: meta.task_index,
            });
        }
        project.insert(meta.task_index, meta);
        Ok(())
    }

    pub fn get(&self, project: &str, task_index: usize) -> Option<&TaskMetadata> {
        self.tasks.get(project)?.get(&task_index)
    }

    /// Tasks of one project in index order.
    pub fn project_tasks(&self, project: &str) -> impl Iterator<Item = &TaskMetadata> {
        self.tasks.get(project).into_iter().flat_map(|tasks| tasks.values())
    }

    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every task of `project` before it is prepared again.
    /// Returns number of entries removed.
    pub fn clear_project(&mut self, project: &str) -> usize {
        self.tasks.remove(project).map(|m| m.len()).unwrap_or(0)
    }

    /// Fold another store in, refusing any key both stores hold.
    pub fn merge(&mut self, other: MetadataStore) -> Result<()> {
        for meta in other.tasks.into_values().flat_map(BTreeMap::into_values) {
            self.record(meta)?;
        }
        Ok(())
    }

    /// Get a summary of recorded tasks
    pub fn summary(&self) -> String {
        let mut lines = vec!["Task Metadata Summary:".to_string()];
        for (project, tasks) in &self.tasks {
            let resolved = tasks.values().filter(|t| t.method_range().is_some()).count();
            lines.push(format!(
                "  {}: {} tasks ({} with method window)",
                project,
                tasks.len(),
                resolved
            ));
        }
        if self.tasks.is_empty() {
            lines.push("  No recorded tasks".to_string());
        }
        lines.join("\n")
    }
}

/// SHA-256 of `text`, hex encoded.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MethodRange;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn meta(project: &str, index: usize) -> TaskMetadata {
        TaskMetadata::new(
            project,
            index,
            &PathBuf::from("/w/p/src/A.java"),
            Some(MethodRange { start_line: 5, end_line: 20 }),
            Some(hash_text("class A {}")),
        )
    }

    #[test]
    fn test_hash_text() {
        assert_eq!(hash_text("hello world"), hash_text("hello world"));
        assert_ne!(hash_text("hello world"), hash_text("different"));
        assert_eq!(hash_text("").len(), 64);
    }

    #[test]
    fn test_record_is_append_only() {
        let mut store = MetadataStore::default();
        store.record(meta("p", 1)).unwrap();
        let err = store.record(meta("p", 1)).unwrap_err();
        assert!(matches!(err, PipelineError::MetadataConflict { index: 1, .. }));

        store.record(meta("q", 1)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.clear_project("p"), 1);
        assert!(store.get("p", 1).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".rlpatch/task_metadata.json");

        let mut store = MetadataStore::default();
        store.record(meta("p", 1)).unwrap();
        store.record(meta("p", 2)).unwrap();
        store.save(&path).unwrap();

        let loaded = MetadataStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        let indices: Vec<usize> = loaded.project_tasks("p").map(|t| t.task_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_merge_rejects_collisions() {
        let mut a = MetadataStore::default();
        a.record(meta("p", 1)).unwrap();
        let mut b = MetadataStore::default();
        b.record(meta("q", 1)).unwrap();
        a.merge(b.clone()).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.merge(b).is_err());
    }
}
