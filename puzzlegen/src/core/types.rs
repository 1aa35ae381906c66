//! Shared data model for the generation pipeline.
//!
//! These types are plain values: requests are built once per caller, outcomes
//! once per interpreter run, and results once per end-to-end request. None of
//! them perform I/O.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::safety::validate_text;

pub const MAX_THEME_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_GOAL_CHARS: usize = 200;

/// The caller aborted the operation.
///
/// Kept distinct from every other failure so callers can tell "aborted" apart
/// from "failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// One user call to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Short thematic prompt (e.g. "mystery").
    pub theme: Option<String>,
    /// Free-text description of the desired puzzle.
    pub description: Option<String>,
    /// Backend selector; unknown values fall back to the configured default.
    pub provider: Option<String>,
    /// Run the generated program (and repair it on failure).
    pub execute: bool,
    /// Goal to run against the generated program.
    pub goal: Option<String>,
}

impl GenerationRequest {
    /// Caller-level input validation: length limits and goal safety.
    ///
    /// Returns one message per violation; empty means the request is acceptable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_len(&mut errors, "theme", self.theme.as_deref(), MAX_THEME_CHARS);
        check_len(
            &mut errors,
            "description",
            self.description.as_deref(),
            MAX_DESCRIPTION_CHARS,
        );
        check_len(&mut errors, "goal", self.goal.as_deref(), MAX_GOAL_CHARS);

        if let Some(goal) = self.goal.as_deref() {
            let verdict = validate_text("goal", goal);
            for finding in verdict.blocking() {
                errors.push(format!("{}: {}", finding.field, finding.message));
            }
        }
        errors
    }
}

fn check_len(errors: &mut Vec<String>, field: &str, value: Option<&str>, max: usize) {
    if let Some(value) = value {
        let chars = value.chars().count();
        if chars > max {
            errors.push(format!("{field} must be at most {max} characters (got {chars})"));
        }
    }
}

/// Result of one interpreter invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    /// Fatal diagnostics; empty when none.
    pub error: String,
    /// Diagnostics that do not indicate failure.
    pub warnings: String,
    pub exit_code: i32,
}

impl ExecutionOutcome {
    /// Build an outcome from captured streams. Success requires a zero exit
    /// code and no error text; warnings never block success.
    pub fn from_parts(exit_code: i32, output: String, error: String, warnings: String) -> Self {
        Self {
            success: exit_code == 0 && error.is_empty(),
            output,
            error,
            warnings,
            exit_code,
        }
    }

    /// Outcome for a failure that happened before or around the process itself
    /// (missing file, spawn error, timeout).
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            warnings: String::new(),
            exit_code: -1,
        }
    }
}

/// Per-phase wall-clock breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    #[serde(rename = "idea_ms", with = "millis")]
    pub idea: Duration,
    #[serde(rename = "code_ms", with = "millis")]
    pub code: Duration,
    /// Present only when execution was requested.
    #[serde(rename = "execution_ms", with = "opt_millis")]
    pub execution: Option<Duration>,
}

/// End-to-end result of one generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub error: Option<String>,
    pub idea: String,
    pub code: String,
    pub execution_output: Option<String>,
    pub execution_error: Option<String>,
    pub execution_warnings: Option<String>,
    /// `None` when execution was not requested.
    pub execution_success: Option<bool>,
    pub file_path: Option<PathBuf>,
    pub fix_attempts: u32,
    /// Backend kind and model that served the request (e.g. `ollama:llama3`).
    pub backend: String,
    #[serde(rename = "total_ms", with = "millis")]
    pub total_duration: Duration,
    pub timings: PhaseTimings,
}

impl GenerationResult {
    /// Fold an execution outcome into the execution fields.
    pub fn record_execution(&mut self, outcome: &ExecutionOutcome) {
        self.execution_success = Some(outcome.success);
        self.execution_output = Some(outcome.output.clone());
        self.execution_error = (!outcome.error.is_empty()).then(|| outcome.error.clone());
        self.execution_warnings =
            (!outcome.warnings.is_empty()).then(|| outcome.warnings.clone());
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }
}
