//! Name patterns used by selection, grouping, status, and ownership rules.
//!
//! Three syntaxes, chosen by the text of the pattern:
//!
//! - `^...`: a regular expression searched in the name, e.g. `^dpiConn.*`
//! - text containing `*`, `?` or `[`: a glob matched against the whole name,
//!   e.g. `DPI_MODE_CREATE_*`
//! - anything else: a case-sensitive prefix, e.g. `dpiConn_`

use std::fmt;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{GenError, Result};

/// A compiled name pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Prefix(String),
    Glob { text: String, regex: Regex },
    Regex { text: String, regex: Regex },
}

impl Pattern {
    /// Compile a pattern, picking the syntax from its text.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(GenError::InvalidPattern {
                pattern: text.to_string(),
                detail: "empty pattern".to_string(),
            });
        }
        if text.starts_with('^') {
            let regex = Regex::new(text).map_err(|e| GenError::InvalidPattern {
                pattern: text.to_string(),
                detail: e.to_string(),
            })?;
            return Ok(Pattern::Regex {
                text: text.to_string(),
                regex,
            });
        }
        if text.contains(['*', '?', '[']) {
            let source = glob_to_regex(text)?;
            let regex = Regex::new(&source).map_err(|e| GenError::InvalidPattern {
                pattern: text.to_string(),
                detail: e.to_string(),
            })?;
            return Ok(Pattern::Glob {
                text: text.to_string(),
                regex,
            });
        }
        Ok(Pattern::Prefix(text.to_string()))
    }

    /// Compile a list of patterns, stopping at the first invalid one.
    pub fn parse_all<S: AsRef<str>>(texts: &[S]) -> Result<Vec<Self>> {
        texts.iter().map(|t| Pattern::parse(t.as_ref())).collect()
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Pattern::Glob { regex, .. } | Pattern::Regex { regex, .. } => regex.is_match(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Prefix(text) => text,
            Pattern::Glob { text, .. } | Pattern::Regex { text, .. } => text,
        }
    }
}

/// Whether any pattern in `patterns` matches `name`.
pub fn matches_any(patterns: &[Pattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other) && self.as_str() == other.as_str()
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn glob_to_regex(glob: &str) -> Result<String> {
    let mut out = String::from("^");
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                let mut first = true;
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '!' if first => out.push('^'),
                        '-' => out.push('-'),
                        other => out.push_str(&regex::escape(&other.to_string())),
                    }
                    first = false;
                }
                if !closed {
                    return Err(GenError::InvalidPattern {
                        pattern: glob.to_string(),
                        detail: "unclosed '['".to_string(),
                    });
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_is_chosen_by_text() {
        assert!(matches!(Pattern::parse("dpiConn_").unwrap(), Pattern::Prefix(_)));
        assert!(matches!(Pattern::parse("dpi*").unwrap(), Pattern::Glob { .. }));
        assert!(matches!(Pattern::parse("^dpi").unwrap(), Pattern::Regex { .. }));
    }

    #[test]
    fn regex_selects_conn_functions_only() {
        let p = Pattern::parse("^dpiConn.*").unwrap();
        assert!(p.matches("dpiConnCreate"));
        assert!(p.matches("dpiConnClose"));
        assert!(!p.matches("dpiPoolCreate"));
    }

    #[test]
    fn glob_matches_whole_name() {
        let p = Pattern::parse("DPI_MODE_CREATE_*").unwrap();
        assert!(p.matches("DPI_MODE_CREATE_EVENTS"));
        assert!(!p.matches("XDPI_MODE_CREATE_EVENTS"));

        let q = Pattern::parse("dpi?onn").unwrap();
        assert!(q.matches("dpiConn"));
        assert!(!q.matches("dpiConnX"));
    }

    #[test]
    fn glob_character_classes() {
        let p = Pattern::parse("mode_[rw]").unwrap();
        assert!(p.matches("mode_r"));
        assert!(!p.matches("mode_x"));

        let q = Pattern::parse("mode_[!rw]").unwrap();
        assert!(q.matches("mode_x"));
        assert!(!q.matches("mode_r"));

        let r = Pattern::parse("v[0-9]").unwrap();
        assert!(r.matches("v7"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let p = Pattern::parse("a.b*").unwrap();
        assert!(p.matches("a.bc"));
        assert!(!p.matches("axbc"));
    }

    #[test]
    fn prefix_is_case_sensitive() {
        let p = Pattern::parse("dpi").unwrap();
        assert!(p.matches("dpiConn"));
        assert!(!p.matches("DPI_MODE"));
    }

    #[test]
    fn invalid_patterns() {
        assert!(matches!(
            Pattern::parse("mode_[rw"),
            Err(GenError::InvalidPattern { .. })
        ));
        assert!(matches!(Pattern::parse("^(unclosed"), Err(GenError::InvalidPattern { .. })));
        assert!(Pattern::parse("").is_err());
    }

    #[test]
    fn serializes_as_text() {
        let p = Pattern::parse("*_create").unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"*_create\"");
        assert_eq!(p.to_string(), "*_create");
    }
}
