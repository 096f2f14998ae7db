//! Enumeration classification.
//!
//! Every enumeration reachable from the selection gets exactly one
//! representation: a closed set (`Constified`), combinable flags
//! (`Bitfield`), or a raw integer passthrough (`Raw`). The decision comes from
//! an explicit directive, then the caller's default policy, then falls back to
//! `Raw`. Values are never inspected to infer a representation.
//!
//! Two shapes are recognized:
//!
//! - a C `enum`, whose enumerators are its values
//! - an integer typedef named by a directive, whose values are the `#define`
//!   constants matching the directive's `constants` pattern (or, without a
//!   pattern, the constants cast to the typedef)

use std::collections::{BTreeMap, HashMap};

use cbridge_catalog::{Catalog, CType, Declaration, NativeSymbol};
use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};
use crate::pattern::Pattern;
use crate::select::Selection;

/// Target representation of an enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Closed set of mutually exclusive values.
    Constified,
    /// Combinable flags; undeclared combinations stay valid.
    Bitfield,
    /// Plain integer in the unsafe surface.
    Raw,
}

impl Representation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "constified" | "constified-set" | "enum" => Some(Self::Constified),
            "bitfield" | "bitfield-flags" | "flags" => Some(Self::Bitfield),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn is_safe(&self) -> bool {
        !matches!(self, Self::Raw)
    }
}

impl std::fmt::Display for Representation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constified => write!(f, "constified"),
            Self::Bitfield => write!(f, "bitfield"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// A caller-supplied classification for one enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumDirective {
    pub name: String,
    pub representation: Representation,
    /// Groups `#define` constants under an integer typedef.
    pub constants: Option<Pattern>,
}

impl EnumDirective {
    pub fn new(name: impl Into<String>, representation: Representation) -> Self {
        Self {
            name: name.into(),
            representation,
            constants: None,
        }
    }

    pub fn with_constants(mut self, pattern: &str) -> Result<Self> {
        self.constants = Some(Pattern::parse(pattern)?);
        Ok(self)
    }
}

/// Where a representation decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionOrigin {
    Directive,
    DefaultPolicy,
    /// No directive and no default: raw integer escape hatch.
    Fallback,
}

impl std::fmt::Display for DecisionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directive => write!(f, "directive"),
            Self::DefaultPolicy => write!(f, "default policy"),
            Self::Fallback => write!(f, "no directive"),
        }
    }
}

/// One declared value of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enumerand {
    /// C name of the enumerator or constant.
    pub name: String,
    pub value: i128,
    /// For constified sets: the earlier enumerand with the same value.
    pub alias_of: Option<String>,
}

/// The representation decision for one enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumerationMapping {
    /// C name of the enum or integer typedef.
    pub source: String,
    pub representation: Representation,
    pub origin: DecisionOrigin,
    /// Builtin integer type the values are carried in.
    pub underlying: CType,
    pub enumerands: Vec<Enumerand>,
    /// Values come from grouped `#define` constants rather than a C enum.
    pub grouped: bool,
    /// A constified set with no values, emitted as `Raw` instead.
    pub degraded: bool,
}

impl EnumerationMapping {
    /// Enumerands that are not aliases of an earlier one.
    pub fn distinct(&self) -> impl Iterator<Item = &Enumerand> {
        self.enumerands.iter().filter(|e| e.alias_of.is_none())
    }
}

/// All enumeration decisions for a selection, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    mappings: Vec<EnumerationMapping>,
    index: HashMap<String, usize>,
    /// Grouped constant name -> owning enumeration.
    owners: HashMap<String, String>,
}

impl Classification {
    pub fn mappings(&self) -> &[EnumerationMapping] {
        &self.mappings
    }

    pub fn get(&self, name: &str) -> Option<&EnumerationMapping> {
        self.index.get(name).map(|&i| &self.mappings[i])
    }

    /// The enumeration a constant was grouped into, if any.
    pub fn owner_of(&self, constant: &str) -> Option<&EnumerationMapping> {
        self.owners.get(constant).and_then(|owner| self.get(owner))
    }

    fn push(&mut self, mapping: EnumerationMapping) {
        if mapping.grouped {
            for e in &mapping.enumerands {
                self.owners.entry(e.name.clone()).or_insert_with(|| mapping.source.clone());
            }
        }
        self.index.insert(mapping.source.clone(), self.mappings.len());
        self.mappings.push(mapping);
    }
}

/// Classify every enumeration reachable from `selection`.
pub fn classify(
    catalog: &Catalog,
    selection: &Selection<'_>,
    directives: &[EnumDirective],
    default: Option<Representation>,
) -> Result<Classification> {
    let directives = check_directives(catalog, directives)?;
    let mut out = Classification::default();

    for symbol in selection.symbols() {
        let directive = directives.get(symbol.name.as_str()).copied();
        let mapping = match (&symbol.decl, directive) {
            (Declaration::Enum(decl), _) => {
                let (representation, origin) = decide(directive, default);
                let values: Vec<(String, i128)> = decl
                    .enumerators
                    .iter()
                    .map(|e| (e.name.clone(), e.value))
                    .collect();
                let underlying = enum_underlying(values.iter().map(|(_, v)| *v));
                build(symbol, representation, origin, underlying, values, false)?
            }
            (Declaration::Typedef(_), Some(directive)) => {
                let Some(underlying) = catalog.integer_type(&symbol.name) else {
                    continue;
                };
                let values = grouped_constants(catalog, symbol, directive);
                build(
                    symbol,
                    directive.representation,
                    DecisionOrigin::Directive,
                    underlying,
                    values,
                    true,
                )?
            }
            _ => continue,
        };
        tracing::debug!(
            enumeration = %mapping.source,
            representation = %mapping.representation,
            origin = %mapping.origin,
            values = mapping.enumerands.len(),
            "classified"
        );
        out.push(mapping);
    }

    Ok(out)
}

/// Reject directives the catalog cannot honor; merge identical duplicates.
fn check_directives<'d>(catalog: &Catalog, directives: &'d [EnumDirective]) -> Result<HashMap<&'d str, &'d EnumDirective>> {
    let mut by_name: HashMap<&str, &EnumDirective> = HashMap::new();
    for directive in directives {
        let Some(symbol) = catalog.get(&directive.name) else {
            return Err(GenError::config(&directive.name, "classification directive names a symbol absent from the header"));
        };
        match &symbol.decl {
            Declaration::Enum(_) => {}
            Declaration::Typedef(target) => {
                if let Some(inner) = catalog.resolve(target).named() {
                    if matches!(catalog.get(inner).map(|s| &s.decl), Some(Declaration::Enum(_))) {
                        return Err(GenError::config(
                            &directive.name,
                            format!("typedef of enum '{inner}'; classify '{inner}' instead"),
                        ));
                    }
                }
                if catalog.integer_type(&directive.name).is_none() {
                    return Err(GenError::config(&directive.name, "not an enumeration or integer typedef"));
                }
            }
            _ => {
                return Err(GenError::config(&directive.name, "not an enumeration or integer typedef"));
            }
        }
        match by_name.get(directive.name.as_str()) {
            Some(previous) if *previous != directive => {
                return Err(GenError::config(
                    &directive.name,
                    format!(
                        "conflicting directives: {} and {}",
                        previous.representation, directive.representation
                    ),
                ));
            }
            Some(_) => {}
            None => {
                by_name.insert(directive.name.as_str(), directive);
            }
        }
    }
    Ok(by_name)
}

fn decide(directive: Option<&EnumDirective>, default: Option<Representation>) -> (Representation, DecisionOrigin) {
    match (directive, default) {
        (Some(d), _) => (d.representation, DecisionOrigin::Directive),
        (None, Some(r)) => (r, DecisionOrigin::DefaultPolicy),
        (None, None) => (Representation::Raw, DecisionOrigin::Fallback),
    }
}

/// The integer type a C enum is carried in: `unsigned int` without negative
/// values, `int` otherwise, widened when values do not fit 32 bits.
pub fn enum_underlying(values: impl Iterator<Item = i128>) -> CType {
    let (mut min, mut max) = (0i128, 0i128);
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min >= 0 {
        if max <= u32::MAX as i128 {
            CType::UnsignedInt
        } else {
            CType::UnsignedLong
        }
    } else if min >= i32::MIN as i128 && max <= i32::MAX as i128 {
        CType::Int
    } else {
        CType::Long
    }
}

fn grouped_constants(catalog: &Catalog, typedef: &NativeSymbol, directive: &EnumDirective) -> Vec<(String, i128)> {
    let cast = CType::Named(typedef.name.clone());
    catalog
        .symbols()
        .iter()
        .filter_map(|s| match &s.decl {
            Declaration::Constant(c) => {
                let member = match &directive.constants {
                    Some(pattern) => pattern.matches(&s.name),
                    None => c.ty.as_ref() == Some(&cast),
                };
                member.then(|| (s.name.clone(), c.value))
            }
            _ => None,
        })
        .collect()
}

fn build(
    symbol: &NativeSymbol,
    representation: Representation,
    origin: DecisionOrigin,
    underlying: CType,
    values: Vec<(String, i128)>,
    grouped: bool,
) -> Result<EnumerationMapping> {
    let mut enumerands: Vec<Enumerand> = Vec::with_capacity(values.len());
    for (name, value) in values {
        if underlying.truncate(value) != value {
            return Err(GenError::config(
                &symbol.name,
                format!("value {value} of '{name}' does not fit {underlying}"),
            ));
        }
        let alias_of = match representation {
            Representation::Constified => enumerands
                .iter()
                .find(|e| e.value == value && e.alias_of.is_none())
                .map(|e| e.name.clone()),
            _ => None,
        };
        enumerands.push(Enumerand { name, value, alias_of });
    }

    let mut representation = representation;
    let mut degraded = false;
    if representation == Representation::Constified && enumerands.is_empty() {
        tracing::warn!(enumeration = %symbol.name, "constified enumeration has no values; emitting raw integer");
        representation = Representation::Raw;
        degraded = true;
    }
    if representation == Representation::Bitfield {
        warn_suspicious_flags(&symbol.name, &enumerands);
    }

    Ok(EnumerationMapping {
        source: symbol.name.clone(),
        representation,
        origin,
        underlying,
        enumerands,
        grouped,
        degraded,
    })
}

/// Flag values that are neither zero, a single bit, nor a union of other
/// declared values.
pub fn suspicious_flags(enumerands: &[Enumerand]) -> Vec<&Enumerand> {
    enumerands
        .iter()
        .filter(|e| {
            let v = e.value;
            if v == 0 || (v > 0 && v & (v - 1) == 0) {
                return false;
            }
            let covered = enumerands
                .iter()
                .filter(|o| o.name != e.name && o.value != 0 && o.value != v && o.value & !v == 0)
                .fold(0i128, |acc, o| acc | o.value);
            covered != v
        })
        .collect()
}

fn warn_suspicious_flags(enumeration: &str, enumerands: &[Enumerand]) {
    for e in suspicious_flags(enumerands) {
        tracing::warn!(enumeration, name = %e.name, value = e.value, "flag value is not a single bit or a union of declared flags");
    }
}

/// Counts of decisions by representation, for reports.
pub fn summarize(classification: &Classification) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for m in classification.mappings() {
        *counts.entry(m.representation.to_string()).or_insert(0) += 1;
    }
    counts
}
