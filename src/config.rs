//! Pipeline configuration: an optional YAML file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::contexts::batch::BatchSettings;
use crate::contexts::patch_synthesis::PatchLayout;
use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "rlpatch.yml";

pub const ENV_MODEL: &str = "RLPATCH_MODEL";
pub const ENV_WORK_DIR: &str = "RLPATCH_WORK_DIR";
pub const ENV_TOOL_TIMEOUT: &str = "RLPATCH_TOOL_TIMEOUT_SECS";

const JAVAC_MODULE_FLAGS: [&str; 9] = [
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.api=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.code=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.file=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.main=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.model=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.processing=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.tree=ALL-UNNAMED",
    "-J--add-exports=jdk.compiler/com.sun.tools.javac.util=ALL-UNNAMED",
    "-J--add-opens=jdk.compiler/com.sun.tools.javac.comp=ALL-UNNAMED",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchToolKind {
    /// The system `patch` program.
    #[default]
    Gnu,
    /// The in-process hunk applier.
    Builtin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodLocatorConfig {
    #[default]
    Heuristic,
    /// External resolver; `{file}` and `{line}` in `argv` are substituted.
    Command { argv: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JavacConfig {
    pub program: String,
    pub flags: Vec<String>,
    /// Relative to the project root.
    pub classes_dir: String,
    pub lib_dir: String,
}

impl Default for JavacConfig {
    fn default() -> Self {
        Self {
            program: "javac".to_string(),
            flags: JAVAC_MODULE_FLAGS.iter().map(|f| f.to_string()).collect(),
            classes_dir: "cf_classes".to_string(),
            lib_dir: "lib".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    /// Holds `<project>.txt` warning logs.
    pub rlc_results_dir: PathBuf,
    /// Holds `fixes/<project>.txt` and `debug/<project>.txt`.
    pub rlfixer_results_dir: PathBuf,
    pub model: String,
    pub temperature: f64,
    pub max_completion_tokens: u32,
    pub max_prompt_tokens: usize,
    pub batch_splits: usize,
    pub tool_timeout_secs: u64,
    pub patch_tool: PatchToolKind,
    pub patch_program: String,
    pub javac: JavacConfig,
    pub method_locator: MethodLocatorConfig,
    pub patch_layout: PatchLayout,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let batch = BatchSettings::default();
        Self {
            work_dir: PathBuf::from("."),
            rlc_results_dir: PathBuf::from("rlc_results"),
            rlfixer_results_dir: PathBuf::from("rlfixer_results"),
            model: batch.model,
            temperature: batch.temperature,
            max_completion_tokens: batch.max_completion_tokens,
            max_prompt_tokens: batch.max_prompt_tokens,
            batch_splits: 1,
            tool_timeout_secs: 3600,
            patch_tool: PatchToolKind::default(),
            patch_program: "patch".to_string(),
            javac: JavacConfig::default(),
            method_locator: MethodLocatorConfig::default(),
            patch_layout: PatchLayout::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads `path`, or `rlpatch.yml` when present, then applies environment overrides.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if !path.exists() => {
                return Err(PipelineError::MissingInputFile(path.to_path_buf()));
            }
            Some(path) => Self::from_yaml(&fs::read_to_string(path)?)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_yaml(&fs::read_to_string(DEFAULT_CONFIG_FILE)?)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = env::var(ENV_MODEL) {
            self.model = model;
        }
        if let Ok(dir) = env::var(ENV_WORK_DIR) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = env::var(ENV_TOOL_TIMEOUT) {
            match secs.trim().parse() {
                Ok(secs) => self.tool_timeout_secs = secs,
                Err(_) => warn!("Ignoring {}={:?}: not a number of seconds", ENV_TOOL_TIMEOUT, secs),
            }
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_completion_tokens: self.max_completion_tokens,
            max_prompt_tokens: self.max_prompt_tokens,
        }
    }

    pub fn warnings_log(&self, project: &str) -> PathBuf {
        self.rlc_results_dir.join(format!("{project}.txt"))
    }

    pub fn fixes_report(&self, project: &str) -> PathBuf {
        self.rlfixer_results_dir.join("fixes").join(format!("{project}.txt"))
    }

    pub fn fixability_table(&self, project: &str) -> PathBuf {
        self.rlfixer_results_dir.join("debug").join(format!("{project}.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_prompt_tokens, 30_000);
        assert_eq!(config.tool_timeout(), Duration::from_secs(3600));
        assert_eq!(config.patch_tool, PatchToolKind::Gnu);
        assert_eq!(config.patch_layout, PatchLayout::Accumulated);
        assert_eq!(config.javac.flags.len(), 9);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "\
model: gpt-4o
patch_tool: builtin
patch_layout: per_task
method_locator:
  kind: command
  argv: [java, -jar, locator.jar, '{file}', '{line}']
javac:
  program: /opt/jdk/bin/javac
";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.patch_tool, PatchToolKind::Builtin);
        assert_eq!(config.patch_layout, PatchLayout::PerTask);
        assert_eq!(config.javac.program, "/opt/jdk/bin/javac");
        assert_eq!(config.javac.classes_dir, "cf_classes");
        assert_eq!(config.max_prompt_tokens, 30_000);
        match config.method_locator {
            MethodLocatorConfig::Command { argv } => assert_eq!(argv[3], "{file}"),
            other => panic!("unexpected locator {other:?}"),
        }
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(PipelineConfig::from_yaml("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_input_paths() {
        let config = PipelineConfig {
            rlc_results_dir: PathBuf::from("/r/rlc"),
            rlfixer_results_dir: PathBuf::from("/r/fixer"),
            ..PipelineConfig::default()
        };
        assert_eq!(config.warnings_log("p"), PathBuf::from("/r/rlc/p.txt"));
        assert_eq!(config.fixes_report("p"), PathBuf::from("/r/fixer/fixes/p.txt"));
        assert_eq!(config.fixability_table("p"), PathBuf::from("/r/fixer/debug/p.txt"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let err = PipelineConfig::load(Some(Path::new("/nonexistent/rlpatch.yml"))).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInputFile(_)));
    }
}
