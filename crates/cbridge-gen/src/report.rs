//! Generation report: what was selected, how it was mapped, and what landed
//! in the unsafe surface.

use std::collections::BTreeMap;
use std::fmt;

use cbridge_catalog::SymbolKind;
use serde::Serialize;

use crate::classify::{summarize, Classification, DecisionOrigin, Representation};
use crate::emit::{GeneratedModule, OwnershipRecord, Surface};
use crate::mapper::Unmappable;
use crate::select::{RuleMatch, Selection};

/// One enumeration decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumRecord {
    pub source: String,
    pub representation: Representation,
    pub origin: DecisionOrigin,
    pub values: usize,
    pub degraded: bool,
}

/// Summary of one generation run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub library: String,
    /// Hex SHA-256 of the inputs.
    pub digest: String,
    /// Selected symbols per kind.
    pub selected: BTreeMap<String, usize>,
    /// Symbols that reached the safe surface.
    pub safe: usize,
    pub rules: Vec<RuleMatch>,
    /// Enumeration count per representation.
    pub representations: BTreeMap<String, usize>,
    pub enumerations: Vec<EnumRecord>,
    pub ownership: Vec<OwnershipRecord>,
    pub unmappable: Vec<Unmappable>,
}

impl GenerationReport {
    pub fn new(
        library: &str,
        selection: &Selection<'_>,
        classification: &Classification,
        module: &GeneratedModule,
    ) -> Self {
        let selected = SymbolKind::ALL
            .iter()
            .map(|&kind| (kind.to_string(), selection.of_kind(kind).count()))
            .collect();
        let enumerations = classification
            .mappings()
            .iter()
            .map(|m| EnumRecord {
                source: m.source.clone(),
                representation: m.representation,
                origin: m.origin,
                values: m.enumerands.len(),
                degraded: m.degraded,
            })
            .collect();
        Self {
            library: library.to_string(),
            digest: module.digest().to_string(),
            selected,
            safe: module.entries().iter().filter(|e| e.surface == Surface::Safe).count(),
            rules: selection.rule_matches().to_vec(),
            representations: summarize(classification),
            enumerations,
            ownership: module.ownership().to_vec(),
            unmappable: module.unmappable().to_vec(),
        }
    }

    /// Rules that selected nothing.
    pub fn empty_rules(&self) -> impl Iterator<Item = &RuleMatch> {
        self.rules.iter().filter(|r| r.matches == 0)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Binding Report: {} ===", self.library)?;
        writeln!(f, "Input digest: sha256:{}", self.digest)?;
        let total: usize = self.selected.values().sum();
        writeln!(f, "Selected: {total} symbols, {} safe, {} unmappable", self.safe, self.unmappable.len())?;

        writeln!(f)?;
        writeln!(f, "--- Selection ---")?;
        for (kind, count) in &self.selected {
            writeln!(f, "  {kind}: {count}")?;
        }
        for rule in &self.rules {
            writeln!(f, "  rule {} '{}': {} match(es)", rule.kind, rule.pattern, rule.matches)?;
        }

        if !self.enumerations.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Enumerations ({}) ---", self.enumerations.len())?;
            for e in &self.enumerations {
                write!(f, "  {}: {} ({}), {} value(s)", e.source, e.representation, e.origin, e.values)?;
                if e.degraded {
                    write!(f, ", no values, kept raw")?;
                }
                writeln!(f)?;
            }
        }

        if !self.ownership.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Ownership ---")?;
            for record in &self.ownership {
                writeln!(f, "  {}: {}", record.function, record.decision)?;
            }
        }

        if !self.unmappable.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Unmappable ({}) ---", self.unmappable.len())?;
            for u in &self.unmappable {
                write!(f, "  {} {}: {}", u.kind, u.symbol, u.reason)?;
                if !u.declared {
                    write!(f, " [not declared]")?;
                }
                writeln!(f)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, EnumDirective};
    use crate::emit::{emit, EmitOptions};
    use crate::ownership::{HandleTable, OwnershipRules};
    use crate::pattern::Pattern;
    use crate::select::{select, SelectionRule};
    use cbridge_catalog::{Catalog, HeaderOptions};

    const HEADER: &str = r#"
typedef struct db db;
typedef enum { DB_OPEN_READ = 1, DB_OPEN_WRITE = 2 } dbOpenFlags;
typedef enum { DB_KIND_A, DB_KIND_B } dbKind;
int db_open(const char *path, dbOpenFlags flags, db **out);
int db_close(db *handle);
int db_printf(db *handle, const char *fmt, ...);
"#;

    fn report() -> GenerationReport {
        let cat = Catalog::parse_str("db.h", HEADER, &HeaderOptions::new()).unwrap();
        let rules = vec![
            SelectionRule::new(SymbolKind::Type, "db").unwrap(),
            SelectionRule::new(SymbolKind::Function, "db_").unwrap(),
            SelectionRule::new(SymbolKind::Constant, "NOPE_").unwrap(),
        ];
        let sel = select(&cat, &rules);
        let directives = [EnumDirective::new("dbOpenFlags", Representation::Bitfield)];
        let classification = classify(&cat, &sel, &directives, None).unwrap();
        let ownership = OwnershipRules::new(
            Pattern::parse_all(&["*_open"]).unwrap(),
            Pattern::parse_all(&["*_close"]).unwrap(),
        );
        let handles = HandleTable::build(&cat, &sel, &ownership, &[]).unwrap();
        let options = EmitOptions {
            library: "db".into(),
            digest: "ab".repeat(32),
            ..Default::default()
        };
        let module = emit(&cat, &sel, &classification, &handles, &ownership, &options).unwrap();
        GenerationReport::new("db", &sel, &classification, &module)
    }

    #[test]
    fn counts() {
        let r = report();
        assert_eq!(r.selected["type"], 3);
        assert_eq!(r.selected["function"], 3);
        assert_eq!(r.selected["constant"], 0);
        assert_eq!(r.representations["bitfield"], 1);
        assert_eq!(r.representations["raw"], 1);
        let unmappable: Vec<&str> = r.unmappable.iter().map(|u| u.symbol.as_str()).collect();
        assert_eq!(unmappable, ["dbKind", "db_printf"]);
        assert_eq!(r.empty_rules().count(), 1);
    }

    #[test]
    fn report_display() {
        let output = format!("{}", report());
        assert!(output.contains("=== Binding Report: db ==="));
        assert!(output.contains(&format!("sha256:{}", "ab".repeat(32))));
        assert!(output.contains("dbOpenFlags: bitfield (directive), 2 value(s)"));
        assert!(output.contains("dbKind: raw (no directive)"));
        assert!(output.contains("db_open: create"));
        assert!(output.contains("function db_printf: variadic function"));
        assert!(output.contains("rule constant 'NOPE_': 0 match(es)"));
    }

    #[test]
    fn report_json() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json()).unwrap();
        assert_eq!(json["library"], "db");
        assert_eq!(json["unmappable"][1]["symbol"], "db_printf");
        assert_eq!(json["unmappable"][1]["reason"]["reason"], "variadic");
        assert_eq!(json["enumerations"][0]["representation"], "bitfield");
    }
}
