//! Symbol selection: filter a catalog by name-pattern rules.
//!
//! Selection is purely name driven. A symbol is selected iff at least one rule
//! of its kind matches its name; the result keeps catalog declaration order
//! regardless of rule order. A rule that matches nothing is reported, never
//! an error.

use cbridge_catalog::{Catalog, NativeSymbol, SymbolKind};
use serde::Serialize;

use crate::error::Result;
use crate::pattern::Pattern;

/// A `(pattern, kind)` inclusion rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionRule {
    pub kind: SymbolKind,
    pub pattern: Pattern,
}

impl SelectionRule {
    pub fn new(kind: SymbolKind, pattern: &str) -> Result<Self> {
        Ok(Self {
            kind,
            pattern: Pattern::parse(pattern)?,
        })
    }

    pub fn matches(&self, symbol: &NativeSymbol) -> bool {
        self.kind == symbol.kind && self.pattern.matches(&symbol.name)
    }
}

/// How many symbols a rule matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub kind: SymbolKind,
    pub pattern: String,
    pub matches: usize,
}

/// The selected subset of a catalog.
#[derive(Debug, Clone)]
pub struct Selection<'c> {
    symbols: Vec<&'c NativeSymbol>,
    rule_matches: Vec<RuleMatch>,
}

impl<'c> Selection<'c> {
    /// Selected symbols in catalog order.
    pub fn symbols(&self) -> &[&'c NativeSymbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.iter().any(|s| s.name == name)
    }

    pub fn of_kind(&self, kind: SymbolKind) -> impl Iterator<Item = &'c NativeSymbol> + '_ {
        self.symbols.iter().copied().filter(move |s| s.kind == kind)
    }

    /// Per-rule match counts, in rule order.
    pub fn rule_matches(&self) -> &[RuleMatch] {
        &self.rule_matches
    }

    pub fn names(&self) -> Vec<&'c str> {
        self.symbols.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Select the symbols of `catalog` matched by at least one of `rules`.
pub fn select<'c>(catalog: &'c Catalog, rules: &[SelectionRule]) -> Selection<'c> {
    let mut counts = vec![0usize; rules.len()];
    let mut symbols = Vec::new();

    for symbol in catalog.symbols() {
        let mut selected = false;
        for (count, rule) in counts.iter_mut().zip(rules) {
            if rule.matches(symbol) {
                *count += 1;
                selected = true;
            }
        }
        if selected {
            symbols.push(symbol);
        }
    }

    let rule_matches = rules
        .iter()
        .zip(counts)
        .map(|(rule, matches)| {
            if matches == 0 {
                tracing::warn!(kind = %rule.kind, pattern = %rule.pattern, "selection rule matched nothing");
            }
            RuleMatch {
                kind: rule.kind,
                pattern: rule.pattern.to_string(),
                matches,
            }
        })
        .collect();

    tracing::debug!(selected = symbols.len(), rules = rules.len(), "selection done");
    Selection {
        symbols,
        rule_matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbridge_catalog::HeaderOptions;
    use proptest::prelude::*;

    const HEADER: &str = r#"
typedef struct dpiConn dpiConn;
typedef struct dpiPool dpiPool;
int dpiConnCreate(dpiConn **conn);
int dpiConnClose(dpiConn *conn);
int dpiPoolCreate(dpiPool **pool);
#define DPI_SUCCESS 0
#define DPI_FAILURE -1
"#;

    fn catalog() -> Catalog {
        Catalog::parse_str("dpi.h", HEADER, &HeaderOptions::new()).unwrap()
    }

    fn rule(kind: SymbolKind, pattern: &str) -> SelectionRule {
        SelectionRule::new(kind, pattern).unwrap()
    }

    #[test]
    fn conn_regex_selects_first_two_functions() {
        let cat = catalog();
        let sel = select(&cat, &[rule(SymbolKind::Function, "^dpiConn.*")]);
        assert_eq!(sel.names(), vec!["dpiConnCreate", "dpiConnClose"]);
    }

    #[test]
    fn kind_must_match() {
        let cat = catalog();
        let sel = select(&cat, &[rule(SymbolKind::Type, "dpiConn")]);
        assert_eq!(sel.names(), vec!["dpiConn"]);
    }

    #[test]
    fn order_follows_catalog_not_rules() {
        let cat = catalog();
        let sel = select(
            &cat,
            &[
                rule(SymbolKind::Constant, "DPI_"),
                rule(SymbolKind::Function, "dpiPool"),
                rule(SymbolKind::Type, "dpi"),
            ],
        );
        assert_eq!(
            sel.names(),
            vec!["dpiConn", "dpiPool", "dpiPoolCreate", "DPI_SUCCESS", "DPI_FAILURE"]
        );
    }

    #[test]
    fn overlapping_rules_select_once() {
        let cat = catalog();
        let sel = select(
            &cat,
            &[rule(SymbolKind::Function, "dpiConn"), rule(SymbolKind::Function, "*Create")],
        );
        assert_eq!(sel.names(), vec!["dpiConnCreate", "dpiConnClose", "dpiPoolCreate"]);
        assert_eq!(sel.rule_matches()[0].matches, 2);
        assert_eq!(sel.rule_matches()[1].matches, 2);
    }

    #[test]
    fn zero_matches_is_not_an_error() {
        let cat = catalog();
        let sel = select(&cat, &[rule(SymbolKind::Function, "dpiLob")]);
        assert!(sel.is_empty());
        assert_eq!(sel.rule_matches()[0].matches, 0);
    }

    fn arb_rule() -> impl Strategy<Value = SelectionRule> {
        let kinds = prop::sample::select(SymbolKind::ALL.to_vec());
        let patterns = prop::sample::select(vec![
            "dpi", "dpiConn", "^dpiConn.*", "*Create", "DPI_*", "^.*Pool.*", "x", "dpi?onn", "DPI_[SF]*",
        ]);
        (kinds, patterns).prop_map(|(kind, pattern)| SelectionRule::new(kind, pattern).unwrap())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_selection_is_exact(rules in prop::collection::vec(arb_rule(), 0..6)) {
            let cat = catalog();
            let sel = select(&cat, &rules);
            let expected: Vec<&str> = cat
                .symbols()
                .iter()
                .filter(|s| rules.iter().any(|r| r.matches(s)))
                .map(|s| s.name.as_str())
                .collect();
            prop_assert_eq!(sel.names(), expected);
        }

        #[test]
        fn prop_selection_is_deterministic(rules in prop::collection::vec(arb_rule(), 0..6)) {
            let cat = catalog();
            prop_assert_eq!(select(&cat, &rules).names(), select(&cat, &rules).names());
        }
    }
}
