//! `{{name}}` template placeholders.
//!
//! Placeholders are not SQL, so before text reaches the grammar every
//! placeholder sitting in code position is wrapped in single quotes and parsed
//! as a string literal. Values read back out of the AST are unmasked again.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::ops::Range;

/// A complete placeholder value, e.g. `{{country}}` or `{{ max_rows }}`.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*[A-Za-z_][A-Za-z0-9_]*\s*\}\}$").unwrap());

/// A placeholder at the start of the haystack, capturing its name.
static PLACEHOLDER_AT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// A masked placeholder as the AST prints it.
static MASKED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(\{\{\s*[A-Za-z_][A-Za-z0-9_]*\s*\}\})'").unwrap());

/// True if the whole value is a single placeholder.
pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_RE.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Occurrence<'a> {
    pub span: Range<usize>,
    pub name: &'a str,
}

#[derive(Clone, Copy)]
enum Scan {
    Code,
    Quoted(u8),
    LineComment,
    BlockComment,
}

/// Placeholders in code position: outside string literals, quoted
/// identifiers and comments.
pub(crate) fn code_placeholders(sql: &str) -> Vec<Occurrence<'_>> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut state = Scan::Code;
    let mut i = 0;

    while i < bytes.len() {
        match state {
            Scan::Code => match bytes[i] {
                quote @ (b'\'' | b'"' | b'`') => {
                    state = Scan::Quoted(quote);
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    state = Scan::LineComment;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = Scan::BlockComment;
                    i += 2;
                }
                b'{' => {
                    let matched = PLACEHOLDER_AT_RE
                        .captures(&sql[i..])
                        .and_then(|caps| Some((caps.get(0)?, caps.get(1)?)));
                    match matched {
                        Some((whole, name)) => {
                            found.push(Occurrence {
                                span: i..i + whole.end(),
                                name: &sql[i + name.start()..i + name.end()],
                            });
                            i += whole.end();
                        }
                        None => i += 1,
                    }
                }
                _ => i += 1,
            },
            // Doubled quotes leave and re-enter this state, which is equivalent.
            Scan::Quoted(quote) => {
                if bytes[i] == quote {
                    state = Scan::Code;
                }
                i += 1;
            }
            Scan::LineComment => {
                if bytes[i] == b'\n' {
                    state = Scan::Code;
                }
                i += 1;
            }
            Scan::BlockComment => {
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = Scan::Code;
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }
    }
    found
}

/// Wrap code-position placeholders in single quotes.
pub fn mask(sql: &str) -> Cow<'_, str> {
    let found = code_placeholders(sql);
    if found.is_empty() {
        return Cow::Borrowed(sql);
    }
    let mut out = String::with_capacity(sql.len() + found.len() * 2);
    let mut last = 0;
    for occurrence in found {
        out.push_str(&sql[last..occurrence.span.start]);
        out.push('\'');
        out.push_str(&sql[occurrence.span.clone()]);
        out.push('\'');
        last = occurrence.span.end;
    }
    out.push_str(&sql[last..]);
    Cow::Owned(out)
}

/// Strip the quotes `mask` added from printed AST text.
pub fn unmask(text: &str) -> Cow<'_, str> {
    MASKED_RE.replace_all(text, "$1")
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholder_names(sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for occurrence in code_placeholders(sql) {
        if !names.iter().any(|n| n == occurrence.name) {
            names.push(occurrence.name.to_string());
        }
    }
    names
}
