//! Name normalization for the safe surface.
//!
//! With normalization on, the first matching configured prefix is stripped,
//! then functions and parameters become `snake_case`, types and constified
//! enumerands `UpperCamelCase`, constants and flags `SCREAMING_SNAKE_CASE`.
//! With it off, C names are kept. Either way identifiers are sanitized.

use std::collections::BTreeMap;

use crate::error::{GenError, Result};

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate", "do", "dyn",
    "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "macro",
    "match", "mod", "move", "mut", "override", "priv", "pub", "ref", "return", "self", "Self", "static",
    "struct", "super", "trait", "true", "try", "type", "typeof", "unsafe", "unsized", "use", "virtual",
    "where", "while", "yield",
];

/// Keywords that cannot be written as raw identifiers.
const NOT_RAW: &[&str] = &["crate", "self", "Self", "super"];

/// Split an identifier into words at underscores and case changes.
pub fn split_words(name: &str) -> Vec<&str> {
    let bytes = name.as_bytes();
    let mut words = Vec::new();
    let mut start = None;
    for i in 0..bytes.len() {
        let c = bytes[i];
        if c == b'_' {
            if let Some(s) = start.take() {
                words.push(&name[s..i]);
            }
            continue;
        }
        let Some(s) = start else {
            start = Some(i);
            continue;
        };
        let prev = bytes[i - 1];
        let next_lower = bytes.get(i + 1).is_some_and(u8::is_ascii_lowercase);
        let boundary = c.is_ascii_uppercase()
            && (prev.is_ascii_lowercase() || prev.is_ascii_digit() || (prev.is_ascii_uppercase() && next_lower));
        if boundary && i > s {
            words.push(&name[s..i]);
            start = Some(i);
        }
    }
    if let Some(s) = start {
        words.push(&name[s..]);
    }
    words
}

pub fn snake_case(name: &str) -> String {
    split_words(name)
        .iter()
        .map(|w| w.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn screaming_snake_case(name: &str) -> String {
    split_words(name)
        .iter()
        .map(|w| w.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn upper_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in split_words(name) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars.map(|c| c.to_ascii_lowercase()));
        }
    }
    out
}

/// Make `name` a valid Rust identifier.
pub fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    if NOT_RAW.contains(&name) {
        return format!("{name}_");
    }
    if KEYWORDS.contains(&name) {
        return format!("r#{name}");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("_{name}");
    }
    name.to_string()
}

/// Length of the longest prefix ending in `_` shared by all names, such that
/// every remainder is non-empty and starts with a letter.
pub fn common_prefix_len(names: &[&str]) -> usize {
    let Some(first) = names.first() else {
        return 0;
    };
    let mut len = first.len();
    for name in &names[1..] {
        len = len.min(
            first
                .bytes()
                .zip(name.bytes())
                .take_while(|(a, b)| a == b)
                .count(),
        );
    }
    let candidates: Vec<usize> = first[..len.min(first.len())]
        .match_indices('_')
        .map(|(i, _)| i + 1)
        .collect();
    candidates
        .into_iter()
        .rev()
        .find(|&cut| {
            names
                .iter()
                .all(|n| n[cut..].starts_with(|c: char| c.is_ascii_alphabetic()))
        })
        .unwrap_or(0)
}

/// Naming policy of one generated module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Naming {
    pub normalize: bool,
    pub strip_prefixes: Vec<String>,
}

impl Naming {
    pub fn new(normalize: bool, strip_prefixes: Vec<String>) -> Self {
        Self {
            normalize,
            strip_prefixes,
        }
    }

    /// Strip the first configured prefix that leaves a non-empty name.
    pub fn strip<'a>(&self, name: &'a str) -> &'a str {
        self.strip_prefixes
            .iter()
            .filter_map(|p| name.strip_prefix(p.as_str()))
            .find(|rest| !rest.is_empty() && !rest.starts_with('_'))
            .unwrap_or(name)
    }

    pub fn type_name(&self, c_name: &str) -> String {
        self.apply(c_name, upper_camel_case)
    }

    pub fn function_name(&self, c_name: &str) -> String {
        self.apply(c_name, snake_case)
    }

    pub fn constant_name(&self, c_name: &str) -> String {
        self.apply(c_name, screaming_snake_case)
    }

    /// Parameter names are never prefix-stripped.
    pub fn param_name(&self, c_name: &str) -> String {
        if self.normalize {
            sanitize(&snake_case(c_name))
        } else {
            sanitize(c_name)
        }
    }

    /// Variant names of a constified enumeration.
    pub fn variant_names(&self, c_names: &[&str]) -> Vec<String> {
        self.member_names(c_names, upper_camel_case)
    }

    /// Flag names of a bitfield enumeration.
    pub fn flag_names(&self, c_names: &[&str]) -> Vec<String> {
        self.member_names(c_names, screaming_snake_case)
    }

    fn member_names(&self, c_names: &[&str], case: fn(&str) -> String) -> Vec<String> {
        if !self.normalize {
            return c_names.iter().map(|n| sanitize(n)).collect();
        }
        let cut = common_prefix_len(c_names);
        c_names.iter().map(|n| sanitize(&case(&n[cut..]))).collect()
    }

    fn apply(&self, c_name: &str, case: fn(&str) -> String) -> String {
        if self.normalize {
            sanitize(&case(self.strip(c_name)))
        } else {
            sanitize(c_name)
        }
    }
}

/// Rust names claimed in one namespace of the safe surface.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    claimed: BTreeMap<String, String>,
}

impl NameTable {
    /// Names the generated module defines itself.
    pub fn with_reserved(reserved: &[&str]) -> Self {
        let claimed = reserved
            .iter()
            .map(|r| (r.to_string(), format!("<generated {r}>")))
            .collect();
        Self { claimed }
    }

    /// Claim `rust_name` for the C symbol `c_name`.
    pub fn claim(&mut self, rust_name: &str, c_name: &str) -> Result<()> {
        match self.claimed.get(rust_name) {
            Some(owner) if owner != c_name => Err(GenError::config(
                c_name,
                format!("normalizes to `{rust_name}`, already used by `{owner}`"),
            )),
            Some(_) => Ok(()),
            None => {
                self.claimed.insert(rust_name.to_string(), c_name.to_string());
                Ok(())
            }
        }
    }
}

/// Pick `base`, or `base` with a numeric suffix, avoiding `taken`.
pub fn fresh(base: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}_{i}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odpi() -> Naming {
        Naming::new(true, vec!["dpi".into(), "DPI_".into()])
    }

    #[test]
    fn word_splitting() {
        assert_eq!(split_words("dpiConn_getStmtCacheSize"), vec!["dpi", "Conn", "get", "Stmt", "Cache", "Size"]);
        assert_eq!(split_words("HTTPServer"), vec!["HTTP", "Server"]);
        assert_eq!(split_words("DPI_MODE_CREATE_EVENTS"), vec!["DPI", "MODE", "CREATE", "EVENTS"]);
        assert_eq!(split_words("utf8Value"), vec!["utf8", "Value"]);
        assert_eq!(split_words("__x__"), vec!["x"]);
    }

    #[test]
    fn case_conversions() {
        assert_eq!(snake_case("getStmtCacheSize"), "get_stmt_cache_size");
        assert_eq!(upper_camel_case("READWRITE"), "Readwrite");
        assert_eq!(upper_camel_case("version_info"), "VersionInfo");
        assert_eq!(screaming_snake_case("createEvents"), "CREATE_EVENTS");
    }

    #[test]
    fn odpi_names_normalize() {
        let n = odpi();
        assert_eq!(n.function_name("dpiConn_getStmtCacheSize"), "conn_get_stmt_cache_size");
        assert_eq!(n.function_name("dpiConnGetStmtCacheSize"), "conn_get_stmt_cache_size");
        assert_eq!(n.type_name("dpiVersionInfo"), "VersionInfo");
        assert_eq!(n.constant_name("DPI_SUCCESS"), "SUCCESS");
        assert_eq!(n.param_name("cacheSize"), "cache_size");
    }

    #[test]
    fn normalization_off_keeps_c_names() {
        let n = Naming::new(false, vec!["dpi".into()]);
        assert_eq!(n.function_name("dpiConn_ping"), "dpiConn_ping");
        assert_eq!(n.type_name("dpiConn"), "dpiConn");
        assert_eq!(n.param_name("type"), "r#type");
    }

    #[test]
    fn strip_requires_a_remainder() {
        let n = odpi();
        assert_eq!(n.strip("dpi"), "dpi");
        assert_eq!(n.strip("dpiConn"), "Conn");
    }

    #[test]
    fn enumerand_prefix_stripped() {
        let n = odpi();
        assert_eq!(
            n.variant_names(&["DPI_PURITY_DEFAULT", "DPI_PURITY_NEW", "DPI_PURITY_SELF"]),
            vec!["Default", "New", "Self_"]
        );
        assert_eq!(n.flag_names(&["READ", "WRITE", "READWRITE"]), vec!["READ", "WRITE", "READWRITE"]);
        assert_eq!(n.variant_names(&["READ", "WRITE", "READWRITE"]), vec!["Read", "Write", "Readwrite"]);
    }

    #[test]
    fn prefix_backs_off_before_digits() {
        assert_eq!(common_prefix_len(&["DPI_TLS_1_2", "DPI_TLS_1_3"]), 4);
        assert_eq!(common_prefix_len(&["DPI_MODE_CREATE_DEFAULT"]), 16);
        assert_eq!(common_prefix_len(&["A", "B"]), 0);
        assert_eq!(common_prefix_len(&[]), 0);
    }

    #[test]
    fn sanitize_identifiers() {
        assert_eq!(sanitize("match"), "r#match");
        assert_eq!(sanitize("self"), "self_");
        assert_eq!(sanitize("9lives"), "_9lives");
        assert_eq!(sanitize("conn"), "conn");
    }

    #[test]
    fn collisions_are_configuration_errors() {
        let mut table = NameTable::with_reserved(&["LIBRARY"]);
        table.claim("Conn", "dpiConn").unwrap();
        table.claim("Conn", "dpiConn").unwrap();
        let err = table.claim("Conn", "DpiConn").unwrap_err();
        assert!(err.to_string().contains("already used by `dpiConn`"));
        assert!(table.claim("LIBRARY", "DPI_LIBRARY").is_err());
    }

    #[test]
    fn fresh_names() {
        let taken = vec!["status".to_string(), "status_1".to_string()];
        assert_eq!(fresh("status", &taken), "status_2");
        assert_eq!(fresh("conn", &taken), "conn");
    }
}
