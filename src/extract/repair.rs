//! Turning embedded JavaScript object literals into parseable JSON.
//!
//! The literals are JSON except for a handful of bare keys (and, for the
//! region catalog, single-quoted strings). Only the known keys are quoted, and
//! only where they stand in key position: right after `{`, `,` or whitespace
//! and followed by `:`. A string *value* that itself contains `, matchId:` would
//! still be rewritten; the site has never been seen to emit one.
use regex::Regex;

/// Keys of the `require.config.params["args"]` literal.
pub const MATCH_ARGS_KEYS: &[&str] = &[
    "matchId",
    "matchCentreData",
    "matchCentreEventTypeJson",
    "formationIdNameMappings",
    "initialMatchDataForScrappers",
];

/// Keys of the front page's `allRegions` literal.
pub const REGION_KEYS: &[&str] = &["type", "id", "flg", "name", "tournaments", "url", "sortOrder"];

/// Matches any of `keys` in key position.
pub fn key_pattern(keys: &[&str]) -> Result<Regex, regex::Error> {
    let alternation = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(^|[{{,\s])({alternation})\s*:"))
}

pub fn quote_keys(text: &str, pattern: &Regex) -> String {
    pattern.replace_all(text, r#"$1"$2":"#).into_owned()
}

/// `text[first open ..= last close]`, if both delimiters exist in that order.
pub fn outer_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

/// From the first `open` to its matching `close`, skipping quoted strings.
pub fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                _ if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            _ if c == open => depth += 1,
            _ if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn strip_newlines(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

/// Rewrites single-quoted string literals as double-quoted JSON strings.
/// Double-quoted strings pass through untouched.
pub fn single_to_double_quotes(text: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        Single,
        Double,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match (state, c) {
            (State::Code, '\'') => {
                out.push('"');
                state = State::Single;
            }
            (State::Code, '"') => {
                out.push('"');
                state = State::Double;
            }
            (State::Single, '\\') => match chars.next() {
                Some('\'') => out.push('\''),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            (State::Single, '"') => out.push_str("\\\""),
            (State::Single, '\'') => {
                out.push('"');
                state = State::Code;
            }
            (State::Double, '\\') => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            (State::Double, '"') => {
                out.push('"');
                state = State::Code;
            }
            (_, other) => out.push(other),
        }
    }
    out
}
