//! Correlation of findings with suggestions, and of findings across runs.

use std::collections::HashMap;
use tracing::debug;

use super::fixability::FixabilityFilter;
use crate::data::{Finding, FixSuggestion};

/// Lines a warning may drift between two checker runs and still be the same issue.
pub const LINE_DRIFT_TOLERANCE: usize = 2;

impl Finding {
    /// Whether `other` reports the same issue, possibly after nearby edits.
    ///
    /// Same file within the drift tolerance, or the same resolved enclosing
    /// method. Either condition suffices.
    pub fn same_issue_as(&self, other: &Finding) -> bool {
        let near = self.filepath == other.filepath
            && self.line.abs_diff(other.line) <= LINE_DRIFT_TOLERANCE;
        let same_method = matches!(
            (&self.method, &other.method),
            (Some(a), Some(b)) if a == b
        );
        near || same_method
    }
}

/// A suggestion paired with the finding at exactly its location.
#[derive(Debug, Clone, Copy)]
pub struct MatchedPair<'a> {
    pub suggestion: &'a FixSuggestion,
    pub finding: &'a Finding,
}

/// Pairs suggestions with findings at the same `(filepath, line)`.
///
/// Unfixable suggestions and, when a filter is given, suggestions it rejects
/// are never paired. When several findings share a location the first wins.
pub fn match_suggestions<'a>(
    suggestions: &'a [FixSuggestion],
    findings: &'a [Finding],
    filter: Option<&FixabilityFilter>,
) -> Vec<MatchedPair<'a>> {
    let mut by_location: HashMap<(&str, usize), &Finding> = HashMap::new();
    for finding in findings {
        by_location
            .entry((finding.filepath.as_str(), finding.line))
            .or_insert(finding);
    }

    let mut pairs = Vec::new();
    for suggestion in suggestions {
        if suggestion.unfixable {
            debug!("Skipping unfixable suggestion {}:{}", suggestion.filepath, suggestion.line);
            continue;
        }
        if let Some(filter) = filter {
            if !filter.allows(suggestion) {
                continue;
            }
        }
        if let Some(&finding) = by_location.get(&(suggestion.filepath.as_str(), suggestion.line)) {
            pairs.push(MatchedPair { suggestion, finding });
        }
    }
    pairs
}

/// Outcome of comparing the findings of two checker runs.
#[derive(Debug, Default)]
pub struct RunComparison<'a> {
    /// Present before, absent after.
    pub resolved: Vec<&'a Finding>,
    /// Present in both runs, as (before, after).
    pub persisting: Vec<(&'a Finding, &'a Finding)>,
    /// Absent before, present after.
    pub introduced: Vec<&'a Finding>,
}

/// Classifies findings by whether they survive between two runs.
///
/// Each finding of the later run is claimed by at most one earlier finding.
pub fn compare_runs<'a>(before: &'a [Finding], after: &'a [Finding]) -> RunComparison<'a> {
    let mut claimed = vec![false; after.len()];
    let mut comparison = RunComparison::default();

    for old in before {
        let counterpart = after
            .iter()
            .enumerate()
            .find(|(i, new)| !claimed[*i] && old.same_issue_as(new));
        match counterpart {
            Some((i, new)) => {
                claimed[i] = true;
                comparison.persisting.push((old, new));
            }
            None => comparison.resolved.push(old),
        }
    }

    comparison.introduced = after
        .iter()
        .zip(&claimed)
        .filter(|(_, claimed)| !**claimed)
        .map(|(finding, _)| finding)
        .collect();
    comparison
}
