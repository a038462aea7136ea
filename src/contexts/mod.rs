pub mod batch;
pub mod fix_suggestions;
pub mod fixability;
pub mod matching;
pub mod patch_synthesis;
pub mod patch_validation;
pub mod pipeline;
pub mod prompt;
pub mod unified_diff;
pub mod warning_log;
pub mod workspace;

pub use fixability::FixabilityFilter;
pub use matching::{compare_runs, match_suggestions, MatchedPair, RunComparison};
pub use pipeline::{prepare_project, synthesize_responses, PreparedProject, ProjectReport, RunContext};
pub use workspace::Workspace;
