//! Line-level neutralization of denied calls.
//!
//! Offending lines are turned into Prolog comments that keep the original
//! text, so the artifact still shows what the model wrote.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::safety::{DENIED_PREDICATES, SafetyVerdict, call_regex, validate_text};

/// Prefix written in front of every neutralized line.
pub const UNSAFE_MARKER: &str = "% UNSAFE, commented out:";

static DENIED_INVOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| call_regex(DENIED_PREDICATES, r"\s*\("));

/// Comment out every line that invokes a denied predicate.
///
/// Lines without a denied call, and lines already carrying the marker, are
/// returned unchanged. Line endings are preserved.
pub fn sanitize(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        if needs_neutralizing(body) {
            out.push_str(UNSAFE_MARKER);
            out.push(' ');
            out.push_str(body);
            out.push_str(ending);
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Source after safety screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screened {
    pub source: String,
    /// Verdict on the source as generated, before neutralization.
    pub verdict: SafetyVerdict,
    /// Lines commented out.
    pub neutralized: usize,
}

/// Validate generated source and neutralize it when the verdict is blocking.
///
/// Unsafe source is never rejected here; it is defanged and passed on.
pub fn screen(source: String) -> Screened {
    let verdict = validate_text("code", &source);
    if !verdict.is_unsafe() {
        return Screened {
            source,
            verdict,
            neutralized: 0,
        };
    }
    let neutralized = count_unsafe_lines(&source);
    Screened {
        source: sanitize(&source),
        verdict,
        neutralized,
    }
}

/// Number of lines [`sanitize`] would rewrite.
pub fn count_unsafe_lines(source: &str) -> usize {
    source.lines().filter(|line| needs_neutralizing(line)).count()
}

fn needs_neutralizing(line: &str) -> bool {
    !line.trim_start().starts_with(UNSAFE_MARKER) && DENIED_INVOCATION_RE.is_match(line)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_call_is_commented_out_verbatim() {
        let source = "start :-\n    shell('rm -rf /'),\n    write(done).\n";
        let sanitized = sanitize(source);
        let lines: Vec<&str> = sanitized.lines().collect();
        assert_eq!(lines[0], "start :-");
        assert_eq!(lines[1], "% UNSAFE, commented out:     shell('rm -rf /'),");
        assert_eq!(lines[2], "    write(done).");
    }

    #[test]
    fn clean_source_is_unchanged() {
        let source = "room(hall).\nroom(library).\nlook :- room(R), write(R), nl.\n";
        assert_eq!(sanitize(source), source);
        assert_eq!(count_unsafe_lines(source), 0);
    }

    #[test]
    fn whitespace_before_paren_still_matches() {
        let sanitized = sanitize("quit :- halt (0).");
        assert!(sanitized.starts_with(UNSAFE_MARKER));
        assert!(sanitized.contains("quit :- halt (0)."));
    }

    #[test]
    fn predicate_indicator_is_not_rewritten() {
        let source = ":- dynamic open/1.\n";
        assert_eq!(sanitize(source), source);
    }

    #[test]
    fn sanitizing_twice_is_stable() {
        let source = "a :- open('f', read, S), close(S).\nb.\n";
        let once = sanitize(source);
        assert_eq!(sanitize(&once), once);
        assert_eq!(count_unsafe_lines(source), 1);
        assert_eq!(count_unsafe_lines(&once), 0);
    }

    #[test]
    fn screen_leaves_safe_source_alone() {
        let screened = screen("main :- write(hi), nl.\n".to_string());
        assert_eq!(screened.source, "main :- write(hi), nl.\n");
        assert!(screened.verdict.valid);
        assert_eq!(screened.neutralized, 0);
    }

    #[test]
    fn screen_defangs_unsafe_source() {
        let screened = screen("main :-\n    shell(ls),\n    write(done).\n".to_string());
        assert!(screened.verdict.is_unsafe());
        assert_eq!(screened.neutralized, 1);
        assert!(screened.source.contains("% UNSAFE, commented out:     shell(ls),"));
        assert!(screened.source.contains("    write(done)."));
    }

    #[test]
    fn preserves_crlf_and_missing_trailing_newline() {
        let source = "x :- getenv('HOME', H).\r\ny.";
        let sanitized = sanitize(source);
        assert_eq!(
            sanitized,
            "% UNSAFE, commented out: x :- getenv('HOME', H).\r\ny."
        );
    }
}
