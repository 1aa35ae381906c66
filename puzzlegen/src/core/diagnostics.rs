//! Split interpreter stderr into warnings and errors.
//!
//! SWI-Prolog reports both non-fatal warnings (singleton variables,
//! discontiguous clauses) and real errors on stderr, and either may continue
//! over indented lines. A line containing `Warning:` opens a warning block;
//! lines indented by at least four spaces extend the current block; any other
//! non-blank line closes it and counts as an error. Blank lines neither open
//! nor close a block.

const WARNING_MARKER: &str = "warning:";
const CONTINUATION_INDENT: &str = "    ";

/// Classified diagnostic text, each part newline-joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub warnings: String,
    pub errors: String,
}

pub fn classify_stderr(stderr: &str) -> Diagnostics {
    let mut warnings: Vec<&str> = Vec::new();
    let mut errors: Vec<&str> = Vec::new();
    let mut in_warning = false;

    for line in stderr.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.to_ascii_lowercase().contains(WARNING_MARKER) {
            in_warning = true;
            warnings.push(line);
        } else if in_warning && is_continuation(line) {
            warnings.push(line);
        } else {
            in_warning = false;
            errors.push(line);
        }
    }

    Diagnostics {
        warnings: warnings.join("\n"),
        errors: errors.join("\n"),
    }
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(CONTINUATION_INDENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stderr_has_no_diagnostics() {
        assert_eq!(classify_stderr(""), Diagnostics::default());
    }

    #[test]
    fn single_warning_line_is_not_an_error() {
        let diag = classify_stderr("Warning: foo\n");
        assert_eq!(diag.warnings, "Warning: foo");
        assert!(diag.errors.is_empty());
    }

    #[test]
    fn indented_lines_continue_the_warning_block() {
        let stderr = "Warning: /tmp/game.pl:3:\n\
                      Warning:    Singleton variables: [X]\n\
                      \x20   clause body detail\n";
        let diag = classify_stderr(stderr);
        assert!(diag.errors.is_empty(), "errors: {:?}", diag.errors);
        assert_eq!(diag.warnings.lines().count(), 3);
    }

    #[test]
    fn unindented_line_closes_block_and_is_an_error() {
        let stderr = "Warning: singleton\n    detail\nERROR: undefined procedure foo/0\n    exception detail\n";
        let diag = classify_stderr(stderr);
        assert_eq!(diag.warnings, "Warning: singleton\n    detail");
        assert_eq!(
            diag.errors,
            "ERROR: undefined procedure foo/0\n    exception detail"
        );
    }

    #[test]
    fn marker_is_case_insensitive() {
        let diag = classify_stderr("WARNING: goal (directive) failed");
        assert!(diag.errors.is_empty());
        assert!(!diag.warnings.is_empty());
    }

    #[test]
    fn shallow_indent_is_not_a_continuation() {
        let diag = classify_stderr("Warning: a\n  two-space line\n");
        assert_eq!(diag.warnings, "Warning: a");
        assert_eq!(diag.errors, "  two-space line");
    }

    #[test]
    fn blank_lines_are_ignored() {
        let diag = classify_stderr("Warning: a\n\n    still warning\n\n");
        assert!(diag.errors.is_empty());
        assert_eq!(diag.warnings, "Warning: a\n    still warning");
    }
}
