//! Handle ownership decisions.
//!
//! Each selected function gets one explicit role, decided in this order:
//!
//! 1. a per-function annotation (`[[function]] ownership = "..."`)
//! 2. the naming rules (`ownership.create` then `ownership.release` patterns)
//! 3. the position convention: a `T**` out-parameter of an opaque handle
//!    type means the function creates a `T`
//! 4. otherwise the function borrows
//!
//! The role and where it came from end up in the function's doc comment.

use std::collections::{BTreeMap, HashMap};

use cbridge_catalog::{Catalog, CSignature, CType, Declaration};
use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};
use crate::pattern::Pattern;
use crate::select::Selection;

/// What a function does with the opaque handles it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipRole {
    /// Returns a fresh handle the caller owns.
    Create,
    /// Destroys the handle passed as its first parameter.
    Release,
    /// Uses handles without changing who owns them.
    Borrow,
}

impl OwnershipRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" => Some(Self::Create),
            "release" | "destroy" => Some(Self::Release),
            "borrow" => Some(Self::Borrow),
            _ => None,
        }
    }

    /// Whether the caller gives up a handle.
    pub fn consumes(&self) -> bool {
        matches!(self, Self::Release)
    }

    /// Whether the caller receives an owned handle.
    pub fn produces(&self) -> bool {
        matches!(self, Self::Create)
    }
}

impl std::fmt::Display for OwnershipRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Release => write!(f, "release"),
            Self::Borrow => write!(f, "borrow"),
        }
    }
}

/// Which rule produced an ownership decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "rule", rename_all = "kebab-case")]
pub enum DecisionSource {
    Annotation,
    NamingRule(String),
    Position,
    Default,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Annotation => write!(f, "explicit annotation"),
            Self::NamingRule(pattern) => write!(f, "naming rule `{pattern}`"),
            Self::Position => write!(f, "handle out-parameter"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// The ownership role of one function and its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipDecision {
    pub role: OwnershipRole,
    #[serde(flatten)]
    pub source: DecisionSource,
}

impl std::fmt::Display for OwnershipDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.role, self.source)
    }
}

/// Annotations and naming rules for ownership decisions.
#[derive(Debug, Clone, Default)]
pub struct OwnershipRules {
    annotations: BTreeMap<String, OwnershipRole>,
    create: Vec<Pattern>,
    release: Vec<Pattern>,
}

impl OwnershipRules {
    pub fn new(create: Vec<Pattern>, release: Vec<Pattern>) -> Self {
        Self {
            annotations: BTreeMap::new(),
            create,
            release,
        }
    }

    pub fn annotate(&mut self, function: impl Into<String>, role: OwnershipRole) {
        self.annotations.insert(function.into(), role);
    }

    pub fn annotations(&self) -> impl Iterator<Item = (&str, OwnershipRole)> {
        self.annotations.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Decide the role of `sig`; `is_handle` tells which names are opaque
    /// handle types.
    pub fn decide(&self, sig: &CSignature, is_handle: impl Fn(&str) -> bool) -> OwnershipDecision {
        if let Some(&role) = self.annotations.get(&sig.name) {
            return OwnershipDecision {
                role,
                source: DecisionSource::Annotation,
            };
        }
        if let Some(p) = self.create.iter().find(|p| p.matches(&sig.name)) {
            return OwnershipDecision {
                role: OwnershipRole::Create,
                source: DecisionSource::NamingRule(p.to_string()),
            };
        }
        if let Some(p) = self.release.iter().find(|p| p.matches(&sig.name)) {
            return OwnershipDecision {
                role: OwnershipRole::Release,
                source: DecisionSource::NamingRule(p.to_string()),
            };
        }
        let creates = sig
            .parameters
            .iter()
            .any(|p| handle_out_param(&p.param_type).is_some_and(&is_handle));
        if creates {
            return OwnershipDecision {
                role: OwnershipRole::Create,
                source: DecisionSource::Position,
            };
        }
        OwnershipDecision {
            role: OwnershipRole::Borrow,
            source: DecisionSource::Default,
        }
    }
}

/// `T` of a non-const `T**` parameter.
pub fn handle_out_param(ty: &CType) -> Option<&str> {
    let outer = ty.pointee()?;
    if outer.is_const() {
        return None;
    }
    outer.pointee()?.named()
}

/// `T` of a `T*` or `const T*` parameter.
pub fn handle_param(ty: &CType) -> Option<&str> {
    ty.pointee()?.named()
}

/// Explicit handle configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSpec {
    pub name: String,
    pub release: Option<String>,
    pub send: bool,
    /// Values for the release function's parameters after the handle:
    /// integer literals or names of constants and enumerators.
    pub release_args: Vec<String>,
}

/// An opaque native resource type of the generated module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleInfo {
    pub name: String,
    /// Function that destroys the handle; without one the handle can only
    /// be borrowed.
    pub release: Option<String>,
    /// May move between threads.
    pub send: bool,
    /// Resolved values for the release function's extra parameters. Empty
    /// when none were configured.
    pub release_args: Vec<i128>,
}

impl HandleInfo {
    pub fn is_owned(&self) -> bool {
        self.release.is_some()
    }
}

/// All handle types of a selection, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct HandleTable {
    handles: Vec<HandleInfo>,
    index: HashMap<String, usize>,
}

impl HandleTable {
    /// Every selected opaque type is a handle. Release functions come from
    /// `specs`, else from the first selected function whose role is
    /// `Release` by annotation or naming rule and whose first parameter is
    /// the handle.
    pub fn build(catalog: &Catalog, selection: &Selection<'_>, rules: &OwnershipRules, specs: &[HandleSpec]) -> Result<Self> {
        for spec in specs {
            match catalog.get(&spec.name).map(|s| &s.decl) {
                Some(Declaration::Opaque) => {}
                Some(_) => return Err(GenError::config(&spec.name, "handle must be an opaque struct")),
                None => return Err(GenError::config(&spec.name, "handle names a symbol absent from the header")),
            }
            if let Some(release) = &spec.release {
                let takes_handle = match catalog.get(release).map(|s| &s.decl) {
                    Some(Declaration::Function(sig)) => sig
                        .parameters
                        .first()
                        .and_then(|p| handle_param(&p.param_type))
                        .is_some_and(|h| h == spec.name),
                    _ => false,
                };
                if !takes_handle {
                    return Err(GenError::config(
                        &spec.name,
                        format!("release function '{release}' must be declared and take the handle as its first parameter"),
                    ));
                }
            }
            if !spec.release_args.is_empty() && spec.release.is_none() {
                return Err(GenError::config(&spec.name, "release-args needs an explicit release function"));
            }
        }

        let mut table = HandleTable::default();
        for symbol in selection.symbols() {
            if !matches!(symbol.decl, Declaration::Opaque) {
                continue;
            }
            let spec = specs.iter().find(|s| s.name == symbol.name);
            let release = match spec.and_then(|s| s.release.clone()) {
                Some(release) => Some(release),
                None => find_release(selection, rules, &symbol.name),
            };
            if release.is_none() {
                tracing::debug!(handle = %symbol.name, "no release function; handle is borrow-only");
            }
            let release_args = match (spec, &release) {
                (Some(spec), Some(release)) => release_arg_values(catalog, spec, release)?,
                _ => Vec::new(),
            };
            table.index.insert(symbol.name.clone(), table.handles.len());
            table.handles.push(HandleInfo {
                name: symbol.name.clone(),
                release,
                send: spec.is_some_and(|s| s.send),
                release_args,
            });
        }
        for spec in specs {
            if !table.contains(&spec.name) {
                tracing::debug!(handle = %spec.name, "configured handle is not selected");
            }
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&HandleInfo> {
        self.index.get(name).map(|&i| &self.handles[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn handles(&self) -> &[HandleInfo] {
        &self.handles
    }

    /// The handle released by `function`, if it is a release function.
    pub fn released_by(&self, function: &str) -> Option<&HandleInfo> {
        self.handles
            .iter()
            .find(|h| h.release.as_deref() == Some(function))
    }
}

/// Resolve the configured extra release arguments of `spec`. There must be
/// exactly one per parameter after the handle.
fn release_arg_values(catalog: &Catalog, spec: &HandleSpec, release: &str) -> Result<Vec<i128>> {
    if spec.release_args.is_empty() {
        return Ok(Vec::new());
    }
    let extra = match catalog.get(release).map(|s| &s.decl) {
        Some(Declaration::Function(sig)) => sig.parameters.len().saturating_sub(1),
        _ => 0,
    };
    if spec.release_args.len() != extra {
        return Err(GenError::config(
            &spec.name,
            format!("'{release}' takes {extra} argument(s) after the handle, release-args gives {}", spec.release_args.len()),
        ));
    }
    spec.release_args
        .iter()
        .map(|arg| {
            constant_value(catalog, arg)
                .ok_or_else(|| GenError::config(&spec.name, format!("release argument '{arg}' is not an integer or a known constant")))
        })
        .collect()
}

fn constant_value(catalog: &Catalog, text: &str) -> Option<i128> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i128>() {
        return Some(value);
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i128::from_str_radix(hex, 16).ok();
    }
    if let Some(Declaration::Constant(c)) = catalog.get(text).map(|s| &s.decl) {
        return Some(c.value);
    }
    catalog.symbols().iter().find_map(|s| match &s.decl {
        Declaration::Enum(e) => e.enumerators.iter().find(|v| v.name == text).map(|v| v.value),
        _ => None,
    })
}

fn find_release(selection: &Selection<'_>, rules: &OwnershipRules, handle: &str) -> Option<String> {
    selection.symbols().iter().find_map(|s| {
        let Declaration::Function(sig) = &s.decl else {
            return None;
        };
        let first = sig.parameters.first().and_then(|p| handle_param(&p.param_type))?;
        if first != handle {
            return None;
        }
        let decision = rules.decide(sig, |_| false);
        let explicit = matches!(decision.source, DecisionSource::Annotation | DecisionSource::NamingRule(_));
        (decision.role == OwnershipRole::Release && explicit).then(|| s.name.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::{select, SelectionRule};
    use cbridge_catalog::{HeaderOptions, SymbolKind};

    const HEADER: &str = r#"
typedef struct dpiConn dpiConn;
typedef struct dpiStmt dpiStmt;
typedef struct dpiContext dpiContext;
int dpiConn_create(const char *userName, unsigned userNameLength, dpiConn **conn);
int dpiConn_prepareStmt(dpiConn *conn, const char *sql, unsigned sqlLength, dpiStmt **stmt);
int dpiConn_release(dpiConn *conn);
int dpiConn_close(dpiConn *conn, unsigned mode);
int dpiStmt_release(dpiStmt *stmt);
int dpiConn_ping(dpiConn *conn);
#define DPI_MODE_CONN_CLOSE_DROP 0x0001
"#;

    fn catalog() -> Catalog {
        Catalog::parse_str("dpi.h", HEADER, &HeaderOptions::new()).unwrap()
    }

    fn sig(cat: &Catalog, name: &str) -> CSignature {
        match &cat.get(name).unwrap().decl {
            Declaration::Function(sig) => sig.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn rules() -> OwnershipRules {
        OwnershipRules::new(
            Pattern::parse_all(&["*_create"]).unwrap(),
            Pattern::parse_all(&["*_release"]).unwrap(),
        )
    }

    fn everything(cat: &Catalog) -> Selection<'_> {
        select(
            cat,
            &[
                SelectionRule::new(SymbolKind::Type, "dpi").unwrap(),
                SelectionRule::new(SymbolKind::Function, "dpi").unwrap(),
            ],
        )
    }

    #[test]
    fn decision_precedence() {
        let cat = catalog();
        let mut rules = rules();
        let is_handle = |n: &str| n.starts_with("dpi");

        let d = rules.decide(&sig(&cat, "dpiConn_create"), is_handle);
        assert_eq!(d.role, OwnershipRole::Create);
        assert_eq!(d.source, DecisionSource::NamingRule("*_create".into()));

        let d = rules.decide(&sig(&cat, "dpiConn_prepareStmt"), is_handle);
        assert_eq!(d.role, OwnershipRole::Create);
        assert_eq!(d.source, DecisionSource::Position);

        let d = rules.decide(&sig(&cat, "dpiConn_ping"), is_handle);
        assert_eq!(d.role, OwnershipRole::Borrow);
        assert_eq!(d.source, DecisionSource::Default);

        rules.annotate("dpiConn_close", OwnershipRole::Release);
        let d = rules.decide(&sig(&cat, "dpiConn_close"), is_handle);
        assert_eq!(d.role, OwnershipRole::Release);
        assert_eq!(d.source, DecisionSource::Annotation);
        assert_eq!(d.to_string(), "release (explicit annotation)");
    }

    #[test]
    fn annotation_overrides_naming_rule() {
        let cat = catalog();
        let mut rules = rules();
        rules.annotate("dpiConn_create", OwnershipRole::Borrow);
        let d = rules.decide(&sig(&cat, "dpiConn_create"), |_| true);
        assert_eq!(d.role, OwnershipRole::Borrow);
    }

    #[test]
    fn handles_find_their_release_functions() {
        let cat = catalog();
        let sel = everything(&cat);
        let table = HandleTable::build(&cat, &sel, &rules(), &[]).unwrap();
        assert_eq!(table.get("dpiConn").unwrap().release.as_deref(), Some("dpiConn_release"));
        assert_eq!(table.get("dpiStmt").unwrap().release.as_deref(), Some("dpiStmt_release"));
        assert!(!table.get("dpiContext").unwrap().is_owned());
        assert_eq!(table.released_by("dpiStmt_release").unwrap().name, "dpiStmt");
    }

    #[test]
    fn explicit_handle_spec_wins() {
        let cat = catalog();
        let sel = everything(&cat);
        let specs = [HandleSpec {
            name: "dpiConn".into(),
            release: Some("dpiConn_close".into()),
            send: true,
            ..HandleSpec::default()
        }];
        let table = HandleTable::build(&cat, &sel, &rules(), &specs).unwrap();
        let conn = table.get("dpiConn").unwrap();
        assert_eq!(conn.release.as_deref(), Some("dpiConn_close"));
        assert!(conn.send);
    }

    #[test]
    fn release_args_resolve_to_values() {
        let cat = catalog();
        let sel = everything(&cat);
        let close = |args: &[&str]| {
            [HandleSpec {
                name: "dpiConn".into(),
                release: Some("dpiConn_close".into()),
                release_args: args.iter().map(|a| a.to_string()).collect(),
                ..HandleSpec::default()
            }]
        };

        let table = HandleTable::build(&cat, &sel, &rules(), &close(&["DPI_MODE_CONN_CLOSE_DROP"])).unwrap();
        assert_eq!(table.get("dpiConn").unwrap().release_args, [1]);
        let table = HandleTable::build(&cat, &sel, &rules(), &close(&["0x10"])).unwrap();
        assert_eq!(table.get("dpiConn").unwrap().release_args, [16]);
        let table = HandleTable::build(&cat, &sel, &rules(), &close(&[])).unwrap();
        assert!(table.get("dpiConn").unwrap().release_args.is_empty());

        for bad in [&["1", "2"][..], &["DPI_NO_SUCH_MODE"][..]] {
            let err = HandleTable::build(&cat, &sel, &rules(), &close(bad)).unwrap_err();
            assert!(matches!(err, GenError::Configuration { symbol, .. } if symbol == "dpiConn"), "{bad:?}");
        }

        let implicit = [HandleSpec {
            name: "dpiConn".into(),
            release_args: vec!["0".into()],
            ..HandleSpec::default()
        }];
        assert!(HandleTable::build(&cat, &sel, &rules(), &implicit).is_err());
    }

    #[test]
    fn bad_handle_specs_rejected() {
        let cat = catalog();
        let sel = everything(&cat);
        let missing = [HandleSpec {
            name: "dpiPool".into(),
            ..HandleSpec::default()
        }];
        assert!(HandleTable::build(&cat, &sel, &rules(), &missing).is_err());

        let wrong_release = [HandleSpec {
            name: "dpiConn".into(),
            release: Some("dpiStmt_release".into()),
            ..HandleSpec::default()
        }];
        let err = HandleTable::build(&cat, &sel, &rules(), &wrong_release).unwrap_err();
        assert!(matches!(err, GenError::Configuration { symbol, .. } if symbol == "dpiConn"));
    }

    #[test]
    fn out_param_shapes() {
        let conn = CType::Named("dpiConn".into());
        let ptr = |t: CType| CType::Pointer(Box::new(t));
        assert_eq!(handle_out_param(&ptr(ptr(conn.clone()))), Some("dpiConn"));
        assert_eq!(handle_out_param(&ptr(conn.clone())), None);
        assert_eq!(handle_param(&ptr(conn)), Some("dpiConn"));
    }

    #[test]
    fn role_parse_and_display() {
        assert_eq!(OwnershipRole::parse("Create"), Some(OwnershipRole::Create));
        assert_eq!(OwnershipRole::parse("destroy"), Some(OwnershipRole::Release));
        assert_eq!(OwnershipRole::parse("lend"), None);
        assert!(OwnershipRole::Release.consumes());
        assert!(OwnershipRole::Create.produces());
        assert_eq!(OwnershipRole::Borrow.to_string(), "borrow");
    }
}
