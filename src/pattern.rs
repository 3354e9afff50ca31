//! Key filters.
//!
//! A filter string is either a shell-style glob (`user:*`, `cache:?[0-9]`)
//! matched against the whole key, or a regular expression wrapped in
//! slashes (`/^session:/`) matched at the start of the key.

use std::fmt;
use std::sync::Arc;

use regex::bytes::Regex;

use crate::rdb::decoder::KeyFilter;

/// Errors from building a key filter.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// The `/.../` body is not a valid regular expression.
    #[error("invalid key pattern {pattern:?}: {source}")]
    InvalidRegex {
        /// The pattern as given.
        pattern: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },
}

/// A compiled key filter.
#[derive(Clone)]
pub enum KeyPattern {
    /// Every key matches.
    All,
    /// Case-sensitive glob over the whole key.
    Glob(String),
    /// Regular expression anchored at the start of the key only.
    Regex(Regex),
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::All => f.write_str("All"),
            KeyPattern::Glob(glob) => f.debug_tuple("Glob").field(glob).finish(),
            KeyPattern::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
        }
    }
}

impl KeyPattern {
    /// Build a filter from an optional pattern string.
    pub fn parse(pattern: Option<&str>) -> Result<Self, PatternError> {
        let pattern = match pattern {
            None | Some("") => return Ok(KeyPattern::All),
            Some(p) => p,
        };

        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let body = &pattern[1..pattern.len() - 1];
            let re = Regex::new(&format!(r"\A(?:{})", body)).map_err(|source| {
                PatternError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source,
                }
            })?;
            return Ok(KeyPattern::Regex(re));
        }

        Ok(KeyPattern::Glob(pattern.to_string()))
    }

    /// Whether `key` passes the filter.
    pub fn matches(&self, key: &[u8]) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Glob(glob) => glob_match(glob.as_bytes(), key),
            KeyPattern::Regex(re) => re.is_match(key),
        }
    }

    /// A glob a server can apply itself during `SCAN ... MATCH`.
    pub fn scan_match(&self) -> Option<&str> {
        match self {
            KeyPattern::Glob(glob) => Some(glob),
            _ => None,
        }
    }

    /// Shareable predicate form of this filter.
    pub fn predicate(&self) -> KeyFilter {
        let pattern = self.clone();
        Arc::new(move |key: &[u8]| pattern.matches(key))
    }
}

impl Default for KeyPattern {
    fn default() -> Self {
        KeyPattern::All
    }
}

/// Glob match over raw bytes: `*`, `?`, `[abc]`, `[a-z]`, `[!x]` / `[^x]`,
/// and `\` to escape the next byte.
///
/// This is the server's `SCAN MATCH` dialect, so a glob pushed down to a
/// live source selects the same keys as the client-side check. A literal
/// backslash in a key must be written `\\`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star_p = usize::MAX;
    let mut star_t = usize::MAX;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star_p = p;
                    star_t = t;
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                b'[' => match match_bracket(&pattern[p..], text[t]) {
                    Some((true, width)) => {
                        p += width;
                        t += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    // Unterminated class: '[' is a literal.
                    None if text[t] == b'[' => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    None => {}
                },
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }

        // Backtrack to the last star, letting it swallow one more byte
        if star_p != usize::MAX {
            p = star_p + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }

    p == pattern.len()
}

/// Match `c` against the class at the start of `pattern`.
///
/// Returns whether it matched and how many pattern bytes the class spans,
/// or `None` when the class is never closed.
fn match_bracket(pattern: &[u8], c: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = matches!(pattern.get(i), Some(b'!') | Some(b'^'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let b = *pattern.get(i)?;
        // A ']' right after the opening bracket is a member, not the end.
        if b == b']' && !first {
            break;
        }
        first = false;

        if b == b'\\' && i + 1 < pattern.len() {
            if pattern[i + 1] == c {
                matched = true;
            }
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if b <= pattern[i + 2] {
                (b, pattern[i + 2])
            } else {
                (pattern[i + 2], b)
            };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if b == c {
                matched = true;
            }
            i += 1;
        }
    }

    Some((matched != negate, i + 1))
}
