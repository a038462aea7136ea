//! Error taxonomy for the correlation and patching pipeline.
//!
//! Only the failures that stop an operation are represented here. Malformed
//! report entries, degraded fixability filtering, match misses, unresolved
//! methods and compile regressions are logged and counted instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required input file not found: {}", .0.display())]
    MissingInputFile(PathBuf),

    #[error("`{tool}` exceeded its {}s budget and was killed", .timeout.as_secs())]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("failed to spawn `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("patch {} was rejected: {detail}", .patch.display())]
    ApplyFailure { patch: PathBuf, detail: String },

    #[error("cannot read source file {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("replacement window {start}..={end} does not fit a {len}-line file")]
    InvalidWindow { start: usize, end: usize, len: usize },

    #[error("task metadata for {project}${index} is already recorded")]
    MetadataConflict { project: String, index: usize },

    #[error("malformed unified diff: {0}")]
    MalformedDiff(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
