//! The generation pipeline: parse, select, classify, map, emit.
//!
//! [`Builder`] collects a [`BindingConfig`] from a file, from method calls,
//! or both; calls append to what the file configured. Nothing is written
//! until the whole pipeline, including the policy check, has succeeded.

use std::path::{Path, PathBuf};

use cbridge_catalog::{Catalog, SymbolKind};

use crate::classify::{classify, Representation};
use crate::config::{BindingConfig, EnumEntry, FunctionEntry, HandleEntry, SelectEntry, StatusSection};
use crate::digest::{digest_hex, input_digest};
use crate::emit::{emit, EmitOptions, GeneratedModule};
use crate::error::{GenError, Result};
use crate::ownership::{HandleTable, OwnershipRole};
use crate::report::GenerationReport;
use crate::select::select;

/// Configures and runs one generation.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: BindingConfig,
    /// In-memory header `(name, text)`, used instead of `library.header`.
    contents: Option<(String, String)>,
}

/// The result of a successful run.
#[derive(Debug, Clone)]
pub struct Generation {
    pub module: GeneratedModule,
    pub report: GenerationReport,
}

impl Generation {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        self.module.write_to(path)
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: BindingConfig) -> Self {
        Self { config, contents: None }
    }

    /// Start from a `*.bind.toml` file.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        BindingConfig::load(path).map(Self::from_config)
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn header(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.library.header = Some(path.into());
        self
    }

    /// Parse `text` as the header instead of reading a file.
    pub fn header_contents(mut self, name: &str, text: &str) -> Self {
        self.contents = Some((name.to_string(), text.to_string()));
        self
    }

    pub fn include_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.library.include_paths.push(dir.into());
        self
    }

    /// Predefine a macro, `NAME` or `NAME=VALUE`.
    pub fn define(mut self, spec: &str) -> Self {
        self.config.library.defines.push(spec.to_string());
        self
    }

    pub fn library_name(mut self, name: &str) -> Self {
        self.config.library.name = name.to_string();
        self
    }

    pub fn link(mut self, name: &str) -> Self {
        self.config.library.link = Some(name.to_string());
        self
    }

    pub fn select(mut self, kind: SymbolKind, pattern: &str) -> Self {
        self.config.select.push(SelectEntry {
            kind: kind.to_string(),
            pattern: pattern.to_string(),
        });
        self
    }

    pub fn constified(self, name: &str, constants: Option<&str>) -> Self {
        self.enumeration(name, Representation::Constified, constants)
    }

    pub fn bitfield(self, name: &str, constants: Option<&str>) -> Self {
        self.enumeration(name, Representation::Bitfield, constants)
    }

    pub fn enumeration(mut self, name: &str, representation: Representation, constants: Option<&str>) -> Self {
        self.config.enum_directives.push(EnumEntry {
            name: name.to_string(),
            representation: representation.to_string(),
            constants: constants.map(str::to_string),
        });
        self
    }

    pub fn default_representation(mut self, representation: Representation) -> Self {
        self.config.enums.default = Some(representation.to_string());
        self
    }

    pub fn normalize_names(mut self, normalize: bool) -> Self {
        self.config.naming.normalize = normalize;
        self
    }

    pub fn strip_prefix(mut self, prefix: &str) -> Self {
        self.config.naming.strip_prefixes.push(prefix.to_string());
        self
    }

    pub fn status(mut self, status: StatusSection) -> Self {
        self.config.status = Some(status);
        self
    }

    pub fn ownership(mut self, function: &str, role: OwnershipRole) -> Self {
        self.config.functions.push(FunctionEntry {
            name: function.to_string(),
            ownership: role.to_string(),
        });
        self
    }

    pub fn handle(mut self, name: &str, release: Option<&str>, send: bool) -> Self {
        self.config.handles.push(HandleEntry {
            name: name.to_string(),
            release: release.map(str::to_string),
            send,
            release_args: Vec::new(),
        });
        self
    }

    pub fn deny_unmapped(mut self) -> Self {
        self.config.policy.allow_unmapped = false;
        self
    }

    /// Parse the configured header.
    pub fn catalog(&self) -> Result<Catalog> {
        let options = self.config.header_options();
        if let Some((name, text)) = &self.contents {
            return Ok(Catalog::parse_str(name, text, &options)?);
        }
        let header = self
            .config
            .library
            .header
            .as_deref()
            .ok_or_else(|| GenError::config("[library] header", "no header given"))?;
        Ok(Catalog::parse_header(header, &options)?)
    }

    /// Run the whole pipeline without writing anything.
    pub fn generate(&self) -> Result<Generation> {
        self.config.validate()?;
        let library = self.config.library_name();
        let catalog = self.catalog()?;
        let span = tracing::info_span!("generate", library = %library);
        let _guard = span.enter();

        let selection = select(&catalog, &self.config.selection_rules()?);
        let classification = classify(
            &catalog,
            &selection,
            &self.config.enum_directives()?,
            self.config.default_representation()?,
        )?;
        let ownership = self.config.ownership_rules()?;
        let handles = HandleTable::build(&catalog, &selection, &ownership, &self.config.handle_specs())?;

        let options = EmitOptions {
            library: library.clone(),
            link: self.config.library.link.clone(),
            naming: self.config.naming(),
            status: self.config.status_rule()?,
            digest: digest_hex(&input_digest(&catalog, &self.config)?),
        };
        let module = emit(&catalog, &selection, &classification, &handles, &ownership, &options)?;
        self.config.policy.check(&module, &classification)?;

        let report = GenerationReport::new(&library, &selection, &classification, &module);
        tracing::info!(
            selected = selection.len(),
            safe = report.safe,
            unmappable = report.unmappable.len(),
            "bindings generated"
        );
        Ok(Generation { module, report })
    }

    /// Generate and write the module to `path`.
    pub fn write_to(&self, path: &Path) -> Result<Generation> {
        let generation = self.generate()?;
        generation.write_to(path)?;
        Ok(generation)
    }
}
