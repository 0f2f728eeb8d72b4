//! Wildcard expansion of COPY/ADD source patterns.
//!
//! Patterns use shell-style single-segment matching: `*` and `?` never match
//! `/`, `[...]` is a character class (`[^...]` or `[!...]` negates) and `\`
//! escapes the next character. There is no recursive `**`.

use std::path::Path;

use a3s_build_core::error::{BuildError, Result};
use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Whether `name` contains an unescaped glob metacharacter.
pub fn contains_wildcards(name: &str) -> bool {
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Root-relative paths under `root` matching `pattern`, in walk order.
///
/// The walk visits the whole tree depth-first with entries sorted by file
/// name and does not follow symlinks, so repeated builds over unchanged
/// inputs see the same order. A malformed pattern matches nothing.
pub fn expand(root: &Path, pattern: &str) -> Result<Vec<String>> {
    let matcher = match Pattern::new(&to_glob_pattern(pattern)) {
        Ok(matcher) => matcher,
        Err(e) => {
            tracing::debug!(pattern, error = %e, "Ignoring malformed wildcard pattern");
            return Ok(Vec::new());
        }
    };

    let mut matches = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| BuildError::Io(e.into()))?;
        let rel = entry.path().strip_prefix(root).map_err(|_| {
            BuildError::InvalidInstruction(format!(
                "path {} is outside of source root",
                entry.path().display()
            ))
        })?;
        let rel = rel.to_string_lossy();
        if matcher.matches_with(&rel, MATCH_OPTIONS) {
            matches.push(rel.into_owned());
        }
    }
    Ok(matches)
}

/// Rewrite shell escapes and `[^...]` classes into the `glob` crate's syntax,
/// collapsing `**` so it means the same as `*`.
fn to_glob_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('*' | '?' | '[' | ']')) => {
                    out.push('[');
                    out.push(escaped);
                    out.push(']');
                }
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('!');
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            '*' if !in_class => {
                out.push('*');
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
            }
            other => out.push(other),
        }
    }
    out
}
