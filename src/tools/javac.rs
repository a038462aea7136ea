//! Whole-project compilation with `javac`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::JavacConfig;
use crate::data::{CompileOutput, Compiler};
use crate::error::Result;
use crate::tools::process::run_with_timeout;

/// Name of the argument file listing every source, written into the project root.
pub const SOURCE_LIST_FILE: &str = "cf_srcs.txt";

pub struct JavacCompiler {
    config: JavacConfig,
    timeout: Duration,
}

impl JavacCompiler {
    pub fn new(config: JavacConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Builds the argument vector for compiling `project_root`, given the written source list.
    pub fn arguments(&self, project_root: &Path, source_list: &Path) -> Vec<String> {
        let mut args = self.config.flags.clone();
        args.push("-g".to_string());
        args.push("-d".to_string());
        args.push(project_root.join(&self.config.classes_dir).display().to_string());
        args.push("-cp".to_string());
        args.push(self.classpath(project_root));
        args.push(format!("@{}", source_list.display()));
        args
    }

    /// The library directory itself followed by every jar directly inside it.
    fn classpath(&self, project_root: &Path) -> String {
        let lib = project_root.join(&self.config.lib_dir);
        let mut entries = vec![lib.display().to_string()];
        if let Ok(dir) = fs::read_dir(&lib) {
            let mut jars: Vec<PathBuf> = dir
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "jar"))
                .collect();
            jars.sort();
            entries.extend(jars.iter().map(|p| p.display().to_string()));
        }
        entries.join(":")
    }
}

/// Every `.java` file under `project_root/src`, sorted.
pub fn java_sources(project_root: &Path) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = WalkDir::new(project_root.join("src"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "java"))
        .collect();
    sources.sort();
    sources
}

impl Compiler for JavacCompiler {
    fn compile(&self, project_root: &Path) -> Result<CompileOutput> {
        let sources = java_sources(project_root);
        debug!("Compiling {} sources in {}", sources.len(), project_root.display());

        let source_list = project_root.join(SOURCE_LIST_FILE);
        let listing: String = sources.iter().map(|p| format!("{}\n", p.display())).collect();
        fs::write(&source_list, listing)?;
        fs::create_dir_all(project_root.join(&self.config.classes_dir))?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.arguments(project_root, &source_list)).current_dir(project_root);
        let output = run_with_timeout(&mut cmd, &self.config.program, self.timeout)?;

        let result = CompileOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        info!(
            "Compiled {}: {} ({} errors)",
            project_root.display(),
            if result.success { "ok" } else { "failed" },
            result.error_count()
        );
        Ok(result)
    }
}
