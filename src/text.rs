use once_cell::sync::Lazy;
use regex::Regex;

static NEWLINE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").unwrap());
static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse newline runs, then whitespace runs, to a single space and trim.
///
/// Applied identically before every generation call. The two-pass order
/// mirrors the cleaning every pipeline in this service performs: first
/// newlines become spaces, then any remaining whitespace runs collapse.
pub fn normalize_whitespace(input: &str) -> String {
    let trimmed = input.trim();
    let no_newlines = NEWLINE_RUNS.replace_all(trimmed, " ");
    WHITESPACE_RUNS.replace_all(&no_newlines, " ").into_owned()
}
