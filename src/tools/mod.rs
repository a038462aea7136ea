//! Concrete compiler, patch and method-lookup backends.

pub mod builtin_patch;
pub mod command_locator;
pub mod gnu_patch;
pub mod java_methods;
pub mod javac;
pub mod process;

use std::sync::Arc;

use crate::config::{MethodLocatorConfig, PatchToolKind, PipelineConfig};
use crate::data::{Compiler, MethodLocator, PatchTool};

pub use builtin_patch::BuiltinPatch;
pub use command_locator::CommandLocator;
pub use gnu_patch::GnuPatch;
pub use java_methods::HeuristicJavaLocator;
pub use javac::JavacCompiler;

pub fn build_compiler(config: &PipelineConfig) -> Box<dyn Compiler> {
    Box::new(JavacCompiler::new(config.javac.clone(), config.tool_timeout()))
}

pub fn build_patch_tool(config: &PipelineConfig) -> Box<dyn PatchTool> {
    match config.patch_tool {
        PatchToolKind::Gnu => Box::new(GnuPatch::new(config.patch_program.clone(), config.tool_timeout())),
        PatchToolKind::Builtin => Box::new(BuiltinPatch::new()),
    }
}

pub fn build_method_locator(config: &PipelineConfig) -> Arc<dyn MethodLocator> {
    match &config.method_locator {
        MethodLocatorConfig::Heuristic => Arc::new(HeuristicJavaLocator),
        MethodLocatorConfig::Command { argv } => {
            Arc::new(CommandLocator::new(argv.clone(), config.tool_timeout()))
        }
    }
}
