//! Goal normalization and interpreter argument construction.
//!
//! Every invocation ends in an explicit `halt` so the interpreter exits after
//! the goal instead of dropping into its interactive toplevel.

use std::path::Path;

/// Strip surrounding whitespace and any trailing clause terminators.
///
/// Returns `None` when nothing is left.
pub fn normalize_goal(goal: &str) -> Option<String> {
    let normalized = goal.trim().trim_end_matches('.').trim_end();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

/// The `-g` argument: `"<goal>, halt(0)"`, or plain `halt` without a goal.
pub fn halting_goal(goal: Option<&str>) -> String {
    match goal.and_then(normalize_goal) {
        Some(goal) => format!("{goal}, halt(0)"),
        None => "halt".to_string(),
    }
}

/// Arguments for loading `file` quietly and running `goal` (or just loading it).
pub fn file_args(file: &Path, goal: Option<&str>) -> Vec<String> {
    vec![
        "-q".to_string(),
        "-s".to_string(),
        file.display().to_string(),
        "-g".to_string(),
        halting_goal(goal),
    ]
}

/// Arguments for running `goal` with no program loaded.
pub fn query_args(goal: &str) -> Vec<String> {
    vec!["-q".to_string(), "-g".to_string(), halting_goal(Some(goal))]
}
