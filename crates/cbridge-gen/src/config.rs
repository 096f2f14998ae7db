//! `*.bind.toml` binding configuration.
//!
//! A configuration names the header, the selection rules, and every decision
//! the generator cannot infer from the header alone: enumeration
//! representations, ownership annotations, handle release functions, and the
//! status-code convention.
//!
//! ```toml
//! [library]
//! name = "dpi"
//! header = "include/dpi.h"
//!
//! [[select]]
//! kind = "function"
//! pattern = "dpiConn_"
//!
//! [[enum]]
//! name = "dpiCreateMode"
//! representation = "bitfield"
//! constants = "DPI_MODE_CREATE_*"
//! ```

use std::path::{Path, PathBuf};

use cbridge_catalog::{HeaderOptions, SymbolKind};
use serde::{Deserialize, Serialize};

use crate::classify::{EnumDirective, Representation};
use crate::error::{GenError, Result};
use crate::mapper::StatusRule;
use crate::naming::Naming;
use crate::ownership::{HandleSpec, OwnershipRole, OwnershipRules};
use crate::pattern::Pattern;
use crate::policy::Policy;
use crate::select::SelectionRule;

/// A parsed binding configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BindingConfig {
    #[serde(default)]
    pub library: LibrarySection,
    #[serde(default)]
    pub naming: NamingSection,
    /// Selection rules, applied as a union.
    #[serde(default, rename = "select")]
    pub select: Vec<SelectEntry>,
    #[serde(default)]
    pub status: Option<StatusSection>,
    #[serde(default)]
    pub enums: EnumsSection,
    #[serde(default, rename = "enum")]
    pub enum_directives: Vec<EnumEntry>,
    #[serde(default)]
    pub ownership: OwnershipSection,
    /// Per-function ownership annotations.
    #[serde(default, rename = "function")]
    pub functions: Vec<FunctionEntry>,
    #[serde(default, rename = "handle")]
    pub handles: Vec<HandleEntry>,
    #[serde(default)]
    pub policy: Policy,
}

/// The `[library]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LibrarySection {
    /// Library name used in diagnostics; defaults to the header's file stem.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub header: Option<PathBuf>,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    /// Predefined macros, `NAME` or `NAME=VALUE`.
    #[serde(default)]
    pub defines: Vec<String>,
    /// Native library to link against.
    #[serde(default)]
    pub link: Option<String>,
}

/// The `[naming]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NamingSection {
    #[serde(default)]
    pub normalize: bool,
    #[serde(default)]
    pub strip_prefixes: Vec<String>,
}

/// One `[[select]]` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectEntry {
    pub kind: String,
    pub pattern: String,
}

/// The `[status]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusSection {
    /// Return type of status functions as written in the header.
    #[serde(rename = "type", default = "default_status_type")]
    pub ty: String,
    #[serde(default = "default_success")]
    pub success: Vec<i64>,
    #[serde(default = "default_status_functions")]
    pub functions: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            ty: default_status_type(),
            success: default_success(),
            functions: default_status_functions(),
            exclude: Vec::new(),
        }
    }
}

fn default_status_type() -> String {
    "int".to_string()
}

fn default_success() -> Vec<i64> {
    vec![0]
}

fn default_status_functions() -> Vec<String> {
    vec!["*".to_string()]
}

/// The `[enums]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumsSection {
    /// Representation for enumerations without a directive.
    #[serde(default)]
    pub default: Option<String>,
}

/// One `[[enum]]` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumEntry {
    pub name: String,
    pub representation: String,
    /// Pattern grouping `#define` constants under an integer typedef.
    #[serde(default)]
    pub constants: Option<String>,
}

/// The `[ownership]` section: naming rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSection {
    #[serde(default)]
    pub create: Vec<String>,
    #[serde(default)]
    pub release: Vec<String>,
}

/// One `[[function]]` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    pub ownership: String,
}

/// One `[[handle]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HandleEntry {
    pub name: String,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub send: bool,
    #[serde(default)]
    pub release_args: Vec<String>,
}

impl BindingConfig {
    /// Parse a configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: BindingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. Relative header and include paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GenError::io(path, e))?;
        let mut config = Self::parse(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(header) = &config.library.header {
            config.library.header = Some(base.join(header));
        }
        for dir in &mut config.library.include_paths {
            *dir = base.join(&*dir);
        }
        tracing::debug!(path = %path.display(), rules = config.select.len(), "configuration loaded");
        Ok(config)
    }

    /// Check every rule, directive, and annotation without a catalog.
    pub fn validate(&self) -> Result<()> {
        self.selection_rules()?;
        self.enum_directives()?;
        self.default_representation()?;
        self.ownership_rules()?;
        self.status_rule()?;
        for handle in &self.handles {
            if handle.name.is_empty() {
                return Err(GenError::config("[[handle]]", "missing handle name"));
            }
        }
        Ok(())
    }

    pub fn selection_rules(&self) -> Result<Vec<SelectionRule>> {
        self.select
            .iter()
            .map(|entry| {
                let kind = SymbolKind::parse(&entry.kind).ok_or_else(|| {
                    GenError::config(
                        &entry.pattern,
                        format!("unknown symbol kind '{}' (expected type, function, constant or variable)", entry.kind),
                    )
                })?;
                SelectionRule::new(kind, &entry.pattern)
            })
            .collect()
    }

    pub fn enum_directives(&self) -> Result<Vec<EnumDirective>> {
        let mut directives: Vec<EnumDirective> = Vec::with_capacity(self.enum_directives.len());
        for entry in &self.enum_directives {
            if directives.iter().any(|d| d.name == entry.name) {
                return Err(GenError::config(&entry.name, "enumeration configured twice"));
            }
            let representation = parse_representation(&entry.name, &entry.representation)?;
            let directive = EnumDirective::new(&entry.name, representation);
            directives.push(match &entry.constants {
                Some(pattern) => directive.with_constants(pattern)?,
                None => directive,
            });
        }
        Ok(directives)
    }

    pub fn default_representation(&self) -> Result<Option<Representation>> {
        self.enums
            .default
            .as_deref()
            .map(|text| parse_representation("[enums] default", text))
            .transpose()
    }

    pub fn ownership_rules(&self) -> Result<OwnershipRules> {
        let mut rules = OwnershipRules::new(
            Pattern::parse_all(&self.ownership.create)?,
            Pattern::parse_all(&self.ownership.release)?,
        );
        for entry in &self.functions {
            let role = OwnershipRole::parse(&entry.ownership).ok_or_else(|| {
                GenError::config(
                    &entry.name,
                    format!("unknown ownership role '{}' (expected create, release or borrow)", entry.ownership),
                )
            })?;
            rules.annotate(&entry.name, role);
        }
        Ok(rules)
    }

    pub fn status_rule(&self) -> Result<Option<StatusRule>> {
        let Some(status) = &self.status else {
            return Ok(None);
        };
        if status.success.is_empty() {
            return Err(GenError::config("[status]", "at least one success value is required"));
        }
        Ok(Some(StatusRule {
            ty: status.ty.clone(),
            success: status.success.clone(),
            functions: Pattern::parse_all(&status.functions)?,
            exclude: Pattern::parse_all(&status.exclude)?,
        }))
    }

    pub fn handle_specs(&self) -> Vec<HandleSpec> {
        self.handles
            .iter()
            .map(|h| HandleSpec {
                name: h.name.clone(),
                release: h.release.clone(),
                send: h.send,
                release_args: h.release_args.clone(),
            })
            .collect()
    }

    pub fn naming(&self) -> Naming {
        Naming::new(self.naming.normalize, self.naming.strip_prefixes.clone())
    }

    pub fn header_options(&self) -> HeaderOptions {
        let options = self
            .library
            .include_paths
            .iter()
            .fold(HeaderOptions::new(), |o, dir| o.include_path(dir));
        self.library.defines.iter().fold(options, |o, spec| o.define_spec(spec))
    }

    /// Library name, falling back to the header's file stem.
    pub fn library_name(&self) -> String {
        if !self.library.name.is_empty() {
            return self.library.name.clone();
        }
        self.library
            .header
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "native".to_string())
    }
}

fn parse_representation(symbol: &str, text: &str) -> Result<Representation> {
    Representation::parse(text).ok_or_else(|| {
        GenError::config(
            symbol,
            format!("unknown representation '{text}' (expected constified, bitfield or raw)"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[library]
name = "dpi"
header = "include/dpi.h"
include-paths = ["include"]
defines = ["DPI_FEATURE=1", "DPI_DEBUG"]
link = "odpic"

[naming]
normalize = true
strip-prefixes = ["dpi", "DPI_"]

[[select]]
kind = "function"
pattern = "^dpiConn_.*"

[[select]]
kind = "type"
pattern = "dpi"

[status]
type = "int"
success = [0]
exclude = ["dpiData_*"]

[enums]
default = "raw"

[[enum]]
name = "dpiCreateMode"
representation = "bitfield"
constants = "DPI_MODE_CREATE_*"

[[enum]]
name = "dpiPurity"
representation = "constified"

[ownership]
create = ["*_create"]
release = ["*_release"]

[[function]]
name = "dpiConn_prepareStmt"
ownership = "create"

[[handle]]
name = "dpiConn"
release = "dpiConn_release"
send = true

[[handle]]
name = "dpiStmt"
release = "dpiStmt_close"
release-args = ["DPI_MODE_STMT_CLOSE_DEFAULT"]

[policy]
allow-unmapped = false
"#;

    #[test]
    fn parse_full_config() {
        let config = BindingConfig::parse(FULL).unwrap();
        assert_eq!(config.library_name(), "dpi");
        assert_eq!(config.library.link.as_deref(), Some("odpic"));
        assert_eq!(config.select.len(), 2);
        assert_eq!(config.enum_directives.len(), 2);
        assert!(config.naming().normalize);
        assert!(!config.policy.allow_unmapped);
        assert!(config.policy.allow_raw_enums);
    }

    #[test]
    fn converters() {
        let config = BindingConfig::parse(FULL).unwrap();
        let rules = config.selection_rules().unwrap();
        assert_eq!(rules[0].kind, SymbolKind::Function);
        assert_eq!(rules[1].pattern.as_str(), "dpi");

        let directives = config.enum_directives().unwrap();
        assert_eq!(directives[0].representation, Representation::Bitfield);
        assert_eq!(directives[0].constants.as_ref().map(Pattern::as_str), Some("DPI_MODE_CREATE_*"));
        assert_eq!(directives[1].constants, None);
        assert_eq!(config.default_representation().unwrap(), Some(Representation::Raw));

        let ownership = config.ownership_rules().unwrap();
        assert_eq!(
            ownership.annotations().collect::<Vec<_>>(),
            vec![("dpiConn_prepareStmt", OwnershipRole::Create)]
        );

        let status = config.status_rule().unwrap().unwrap();
        assert_eq!(status.ty, "int");
        assert_eq!(status.functions[0].as_str(), "*");

        let handles = config.handle_specs();
        assert_eq!(handles[0].release.as_deref(), Some("dpiConn_release"));
        assert!(handles[0].send);
        assert!(handles[0].release_args.is_empty());
        assert_eq!(handles[1].release_args, ["DPI_MODE_STMT_CLOSE_DEFAULT"]);
        assert!(!handles[1].send);

        let options = config.header_options();
        assert_eq!(options.include_paths, vec![PathBuf::from("include")]);
        assert_eq!(
            options.defines,
            vec![("DPI_FEATURE".to_string(), "1".to_string()), ("DPI_DEBUG".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn minimal_config_defaults() {
        let config = BindingConfig::parse("").unwrap();
        assert!(config.select.is_empty());
        assert_eq!(config.status_rule().unwrap(), None);
        assert_eq!(config.default_representation().unwrap(), None);
        assert_eq!(config.library_name(), "native");
        assert!(config.policy.allow_unmapped);
    }

    #[test]
    fn status_defaults() {
        let config = BindingConfig::parse("[status]\n").unwrap();
        let status = config.status_rule().unwrap().unwrap();
        assert_eq!(status.ty, "int");
        assert_eq!(status.success, vec![0]);
    }

    #[test]
    fn name_defaults_to_header_stem() {
        let config = BindingConfig::parse("[library]\nheader = \"include/minidb.h\"\n").unwrap();
        assert_eq!(config.library_name(), "minidb");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = BindingConfig::parse("[[select]]\nkind = \"macro\"\npattern = \"dpi\"\n").unwrap_err();
        assert!(matches!(err, GenError::Configuration { .. }));
        assert!(err.to_string().contains("unknown symbol kind 'macro'"));
    }

    #[test]
    fn unknown_representation_is_rejected() {
        let err = BindingConfig::parse("[[enum]]\nname = \"Mode\"\nrepresentation = \"bits\"\n").unwrap_err();
        assert!(err.to_string().contains("configuration error for 'Mode'"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = BindingConfig::parse("[[function]]\nname = \"f\"\nownership = \"steal\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown ownership role"));
    }

    #[test]
    fn duplicate_directive_is_rejected() {
        let toml = r#"
[[enum]]
name = "Mode"
representation = "bitfield"

[[enum]]
name = "Mode"
representation = "raw"
"#;
        assert!(BindingConfig::parse(toml).is_err());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = BindingConfig::parse("[[select]]\nkind = \"type\"\npattern = \"^dpi(\"\n").unwrap_err();
        assert!(matches!(err, GenError::InvalidPattern { .. }));
    }

    #[test]
    fn empty_success_set_is_rejected() {
        assert!(BindingConfig::parse("[status]\nsuccess = []\n").is_err());
    }

    #[test]
    fn bad_toml_is_a_toml_error() {
        assert!(matches!(BindingConfig::parse("[library"), Err(GenError::Toml(_))));
    }

    #[test]
    fn load_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dpi.bind.toml");
        std::fs::write(&path, "[library]\nheader = \"dpi.h\"\ninclude-paths = [\"inc\"]\n").unwrap();
        let config = BindingConfig::load(&path).unwrap();
        assert_eq!(config.library.header, Some(dir.path().join("dpi.h")));
        assert_eq!(config.library.include_paths, vec![dir.path().join("inc")]);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = BindingConfig::load(Path::new("/nonexistent/x.bind.toml")).unwrap_err();
        assert!(matches!(err, GenError::Io { .. }));
    }
}
