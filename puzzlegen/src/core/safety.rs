//! Lexical safety screening for Prolog text.
//!
//! The validator only reports; neutralizing lines is the job of
//! [`crate::core::sanitize`]. Matching is purely lexical: a call assembled at
//! runtime (`atom_concat(sh, ell, F), call(F, ...)`) is not detected. That is
//! a known limitation of the approach, not something this module tries to fix.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Predicates that spawn processes, run shell commands, touch files or the
/// environment, or terminate the interpreter.
pub const DENIED_PREDICATES: &[&str] = &[
    "shell",
    "system",
    "process_create",
    "process_kill",
    "exec",
    "fork",
    "open",
    "see",
    "tell",
    "delete_file",
    "delete_directory",
    "rename_file",
    "make_directory",
    "copy_file",
    "setenv",
    "unsetenv",
    "getenv",
    "halt",
];

/// Filesystem-adjacent predicates that are suspicious but not blocking.
pub const CAUTION_PREDICATES: &[&str] = &[
    "exists_file",
    "exists_directory",
    "directory_files",
    "working_directory",
    "chdir",
    "absolute_file_name",
    "tmp_file",
    "consult",
    "load_files",
    "ensure_loaded",
];

/// Severity of a safety finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Error and Critical findings make text unsafe to execute as-is.
    pub fn is_blocking(self) -> bool {
        self >= Severity::Error
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFinding {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

/// Outcome of validating one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// `false` when any finding is blocking.
    pub valid: bool,
    pub findings: Vec<SafetyFinding>,
}

impl SafetyVerdict {
    pub fn blocking(&self) -> impl Iterator<Item = &SafetyFinding> {
        self.findings.iter().filter(|f| f.severity.is_blocking())
    }

    pub fn is_unsafe(&self) -> bool {
        !self.valid
    }

    /// One-line rendering of every finding, for logs and error fields.
    pub fn summary(&self) -> String {
        self.findings
            .iter()
            .map(|f| format!("[{:?}] {}: {}", f.severity, f.field, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

static DENIED_CALL_RE: LazyLock<Regex> = LazyLock::new(|| call_regex(DENIED_PREDICATES, "[(/]"));
static CAUTION_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| call_regex(CAUTION_PREDICATES, "[(/]"));

/// Build `\b(name|name|...)` followed by `suffix` (a call or a predicate indicator).
pub(crate) fn call_regex(names: &[&str], suffix: &str) -> Regex {
    let alternation = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b({alternation}){suffix}")).expect("deny-list regex should be valid")
}

/// Validate `text`, labelling findings with `field` (e.g. `"code"` or `"goal"`).
///
/// Each distinct predicate is reported once, in order of first appearance.
pub fn validate_text(field: &str, text: &str) -> SafetyVerdict {
    let mut findings = Vec::new();
    collect(&mut findings, field, text, &DENIED_CALL_RE, Severity::Critical);
    collect(&mut findings, field, text, &CAUTION_CALL_RE, Severity::Warning);
    let valid = !findings.iter().any(|f| f.severity.is_blocking());
    SafetyVerdict { valid, findings }
}

fn collect(
    findings: &mut Vec<SafetyFinding>,
    field: &str,
    text: &str,
    re: &Regex,
    severity: Severity,
) {
    let mut seen: Vec<&str> = Vec::new();
    for caps in re.captures_iter(text) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        if seen.contains(&name) {
            continue;
        }
        seen.push(name);
        let message = match severity {
            Severity::Critical => format!("call to denied predicate '{name}'"),
            _ => format!("call to filesystem predicate '{name}'"),
        };
        findings.push(SafetyFinding {
            field: field.to_string(),
            message,
            severity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_goal_is_critical() {
        let verdict = validate_text("goal", "shell('rm -rf /')");
        assert!(!verdict.valid);
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].severity, Severity::Critical);
        assert!(verdict.findings[0].message.contains("shell"));
        assert_eq!(verdict.findings[0].field, "goal");
    }

    #[test]
    fn predicate_indicator_counts_as_call() {
        let verdict = validate_text("code", ":- use_module(library(x), [process_create/3]).");
        assert!(verdict.is_unsafe());
        assert!(verdict.findings[0].message.contains("process_create"));
    }

    #[test]
    fn filesystem_predicates_are_warnings_only() {
        let verdict = validate_text("code", "check :- exists_file('save.dat').");
        assert!(verdict.valid);
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].severity, Severity::Warning);
    }

    #[test]
    fn names_embedded_in_longer_identifiers_are_ignored() {
        let verdict = validate_text("code", "reopen(door). open_door(X) :- door(X). shells(3).");
        assert!(verdict.findings.is_empty());
        assert!(verdict.valid);
    }

    #[test]
    fn bare_atom_without_call_is_ignored() {
        let verdict = validate_text("code", "tool(shell). item(halt).");
        assert!(verdict.findings.is_empty());
    }

    #[test]
    fn repeated_predicate_reported_once() {
        let verdict = validate_text("code", "a :- shell(x).\nb :- shell(y).");
        assert_eq!(verdict.findings.len(), 1);
    }

    #[test]
    fn clean_source_is_valid() {
        let verdict = validate_text(
            "code",
            "suspect(butler).\nguilty(X) :- suspect(X), motive(X).\n",
        );
        assert_eq!(verdict, SafetyVerdict { valid: true, findings: Vec::new() });
    }
}
