mod capabilities;
mod records;

pub use capabilities::{
    count_errors, CompileOutput, Compiler, MethodLocator, MethodRange, PatchMode, PatchTool,
};
pub use records::{
    relpath_under_src, EscapeInfo, Finding, FixSuggestion, FixabilityRow, PatchRecord,
    TaskMetadata,
};
