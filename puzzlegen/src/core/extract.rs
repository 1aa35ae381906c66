//! Best-effort recovery of Prolog source from free-form model output.
//!
//! Backends wrap code inconsistently, so extraction degrades in stages:
//! a `prolog`-tagged fence, then any fence, then a line filter that keeps
//! clause-shaped lines, and finally the whole trimmed response.

use std::sync::LazyLock;

use regex::Regex;

static TAGGED_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*(?:prolog|swi-prolog|swipl|pl)[ \t]*\r?\n(.*?)```")
        .expect("tagged fence regex should be valid")
});

static ANY_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("fence regex should be valid")
});

/// `name.` or `name(args).` on a single line.
static FACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][A-Za-z0-9_]*(\(.*\))?\s*\.$").expect("fact regex should be valid")
});

/// `head :- body` (or a `:- directive`).
static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z][A-Za-z0-9_]*(?:\(.*\))?\s*)?:-").expect("rule regex should be valid")
});

/// Pull the program text out of a model response. Never fails; blank input
/// yields an empty string.
pub fn extract_code(raw: &str) -> String {
    if let Some(caps) = TAGGED_FENCE_RE.captures(raw) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = ANY_FENCE_RE.captures(raw) {
        return caps[1].trim().to_string();
    }
    if raw
        .lines()
        .any(|line| is_clause_start(strip_line_comment(line.trim())))
    {
        return filter_clause_lines(raw).trim().to_string();
    }
    raw.trim().to_string()
}

/// Keep blank lines, comments, clause-shaped lines and the continuation lines
/// of a multi-line clause; drop narrative prose.
fn filter_clause_lines(raw: &str) -> String {
    let mut kept = Vec::new();
    let mut in_clause = false;
    let mut in_block_comment = false;

    for line in raw.lines() {
        let trimmed = line.trim();

        if in_block_comment {
            kept.push(line);
            in_block_comment = !trimmed.contains("*/");
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("/*") {
            kept.push(line);
            in_block_comment = !rest.contains("*/");
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('%') {
            kept.push(line);
            continue;
        }

        let code = strip_line_comment(trimmed);
        if in_clause || is_clause_start(code) {
            kept.push(line);
            in_clause = !code.ends_with('.');
        }
    }

    kept.join("\n")
}

fn is_clause_start(code: &str) -> bool {
    FACT_RE.is_match(code) || RULE_RE.is_match(code)
}

/// Drop a trailing `% ...` comment. A `%` inside a quoted atom or string, or
/// written as the character code `0'%`, is not a comment.
fn strip_line_comment(trimmed: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev = ' ';
    let mut chars = trimmed.char_indices();

    while let Some((idx, c)) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' if prev == '0' => {
                    chars.next();
                }
                '\'' | '"' | '`' => quote = Some(c),
                '%' => return trimmed[..idx].trim_end(),
                _ => {}
            },
        }
        prev = c;
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_prolog_tagged_fence() {
        let raw = "Intro\n```text\nnot this\n```\n```prolog\nroom(hall).\n```\nbye";
        assert_eq!(extract_code(raw), "room(hall).");
    }

    #[test]
    fn tag_match_is_case_insensitive() {
        let raw = "```Prolog\n  start :- write(hi).  \n```";
        assert_eq!(extract_code(raw), "start :- write(hi).");
    }

    #[test]
    fn falls_back_to_generic_fence() {
        let raw = "Here you go:\n```\nitem(key).\n```\n";
        assert_eq!(extract_code(raw), "item(key).");
    }

    #[test]
    fn filters_prose_around_unfenced_clauses() {
        let raw = "Here is your mystery game.\n\
                   suspect(butler).\n\
                   % motives\n\
                   guilty(X) :-\n    suspect(X),\n    motive(X).\n\
                   Enjoy solving it\n";
        let code = extract_code(raw);
        assert_eq!(
            code,
            "suspect(butler).\n% motives\nguilty(X) :-\n    suspect(X),\n    motive(X)."
        );
    }

    #[test]
    fn keeps_directives() {
        let raw = "Some text\n:- initialization(main).\nmain :- write(ok), nl.\n";
        assert_eq!(
            extract_code(raw),
            ":- initialization(main).\nmain :- write(ok), nl."
        );
    }

    #[test]
    fn returns_trimmed_text_without_clauses() {
        let raw = "  I could not come up with a game.  ";
        assert_eq!(extract_code(raw), "I could not come up with a game.");
    }

    #[test]
    fn blank_input_yields_empty() {
        assert_eq!(extract_code(""), "");
        assert_eq!(extract_code(" \n\t \n"), "");
    }

    #[test]
    fn extraction_is_idempotent_on_clean_source() {
        let samples = [
            "room(hall).\nroom(cellar).\n\nlook :-\n    room(R),\n    write(R), nl.\n",
            "Prose first.\nfact(a). % trailing comment\nrule(X) :- fact(X).\nmore prose",
            "no clauses here at all",
            "   indented(start).\n  next(one).",
        ];
        for sample in samples {
            let once = extract_code(sample);
            assert_eq!(extract_code(&once), once, "sample: {sample:?}");
        }
    }

    #[test]
    fn quoted_percent_is_not_a_comment() {
        let raw = "Here is the game:\ndiscount(shoe, '50%').\nitem(shoe).\nEnjoy";
        assert_eq!(extract_code(raw), "discount(shoe, '50%').\nitem(shoe).");
    }

    #[test]
    fn strip_line_comment_respects_quotes_and_char_codes() {
        assert_eq!(strip_line_comment("label('100%'). % note"), "label('100%').");
        assert_eq!(strip_line_comment("say(\"50% off\")."), "say(\"50% off\").");
        assert_eq!(strip_line_comment("pct(0'%). % code"), "pct(0'%).");
        assert_eq!(strip_line_comment("esc('it\\'s 5%')."), "esc('it\\'s 5%').");
        assert_eq!(strip_line_comment("start. % entry"), "start.");
    }

    #[test]
    fn commented_clause_triggers_the_line_filter() {
        let raw = "Sure, here is the program:\nstart. % entry point\nHave fun solving it";
        assert_eq!(extract_code(raw), "start. % entry point");
    }

    #[test]
    fn markdown_bullets_are_prose() {
        let raw = "The rules:\n* The butler lies.\n* The maid tells the truth.\n\
                   suspect(butler).\nsuspect(maid).";
        assert_eq!(extract_code(raw), "suspect(butler).\nsuspect(maid).");
    }

    #[test]
    fn block_comments_are_kept_whole() {
        let raw = "Notes first.\n/* Clues:\n * the butler lies\n */\nsuspect(butler).\nThat is all";
        assert_eq!(
            extract_code(raw),
            "/* Clues:\n * the butler lies\n */\nsuspect(butler)."
        );
    }
}
