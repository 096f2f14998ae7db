//! Binding emission.
//!
//! A generated module has three parts: `raw` with the exact C declarations,
//! `unmapped` re-exporting every symbol that has no safe mapping together with
//! an audit table, and the safe surface at the top level. Every selected
//! symbol gets exactly one [`ModuleEntry`]; emission order is selection order,
//! so the same inputs always produce the same text.

use std::io::Write as _;
use std::path::Path;

use cbridge_catalog::{Catalog, CSignature, CType, ConstantDecl, Declaration, NativeSymbol, StructDecl, SymbolKind};
use serde::Serialize;

use crate::classify::{Classification, EnumerationMapping, Representation};
use crate::error::{GenError, Result};
use crate::mapper::{FunctionPlan, ParamMapping, ReturnMapping, StatusRule, TypeScope, Unmappable, UnmappableReason, ValueKind};
use crate::naming::{fresh, sanitize, NameTable, Naming};
use crate::ownership::{HandleTable, OwnershipDecision, OwnershipRules};
use crate::select::Selection;

const RT: &str = "::cbridge_runtime";

/// Which surface a symbol landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Safe,
    Unsafe,
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Surface::Safe => write!(f, "safe"),
            Surface::Unsafe => write!(f, "unsafe"),
        }
    }
}

/// One selected symbol in the generated module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleEntry {
    pub symbol: String,
    pub kind: SymbolKind,
    pub surface: Surface,
    /// Rust path of the item, relative to the module. `None` when nothing
    /// could be declared.
    pub item: Option<String>,
    pub note: Option<String>,
}

/// Ownership decision taken for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipRecord {
    pub function: String,
    pub decision: OwnershipDecision,
}

/// Emission settings that do not come from the catalog.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Library name used for `LIBRARY` and in error messages.
    pub library: String,
    /// Native library to link (`#[link(name = ...)]`).
    pub link: Option<String>,
    pub naming: Naming,
    pub status: Option<StatusRule>,
    /// Hex SHA-256 of the inputs, written into the header comment.
    pub digest: String,
}

/// The output artifact of one generation run.
#[derive(Debug, Clone)]
pub struct GeneratedModule {
    entries: Vec<ModuleEntry>,
    unmappable: Vec<Unmappable>,
    ownership: Vec<OwnershipRecord>,
    digest: String,
    text: String,
}

impl GeneratedModule {
    /// Rust source of the module.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// One entry per selected symbol, in selection order.
    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    pub fn entry(&self, symbol: &str) -> Option<&ModuleEntry> {
        self.entries.iter().find(|e| e.symbol == symbol)
    }

    pub fn unmappable(&self) -> &[Unmappable] {
        &self.unmappable
    }

    pub fn ownership(&self) -> &[OwnershipRecord] {
        &self.ownership
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Replace `path` with the module text through a temporary file in the
    /// same directory, so readers never see a partial module.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| GenError::io(dir, e))?;
        tmp.write_all(self.text.as_bytes()).map_err(|e| GenError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| GenError::io(path, e.error))?;
        tracing::info!(path = %path.display(), bytes = self.text.len(), "module written");
        Ok(())
    }
}

/// Emit the module for `selection`.
pub fn emit(
    catalog: &Catalog,
    selection: &Selection<'_>,
    classification: &Classification,
    handles: &HandleTable,
    rules: &OwnershipRules,
    options: &EmitOptions,
) -> Result<GeneratedModule> {
    let mut emitter = Emitter {
        catalog,
        classification,
        handles,
        scope: TypeScope::new(catalog, selection, handles, classification),
        rules,
        options,
        types: NameTable::with_reserved(&["raw", "unmapped"]),
        values: NameTable::with_reserved(&["raw", "unmapped", "LIBRARY"]),
        raw: Code::default(),
        externs: Code::default(),
        unmapped: Code::default(),
        audit: Vec::new(),
        safe: Code::default(),
        entries: Vec::new(),
        unmappable: Vec::new(),
        ownership: Vec::new(),
    };

    emitter.release_externs(selection)?;
    for symbol in selection.symbols() {
        match &symbol.decl {
            Declaration::Opaque => emitter.opaque(symbol)?,
            Declaration::Struct(s) => emitter.aggregate(symbol, s)?,
            Declaration::Enum(_) => emitter.enumeration(symbol)?,
            Declaration::Typedef(target) => emitter.typedef(symbol, target)?,
            Declaration::Function(sig) => emitter.function(symbol, sig)?,
            Declaration::Constant(c) => emitter.constant(symbol, c)?,
            Declaration::Variable(ty) => emitter.variable(symbol, ty)?,
        }
    }

    let safe = emitter.entries.iter().filter(|e| e.surface == Surface::Safe).count();
    tracing::info!(
        symbols = emitter.entries.len(),
        safe,
        unmapped = emitter.unmappable.len(),
        "module emitted"
    );
    Ok(emitter.finish())
}

/// Indented source text.
#[derive(Debug, Default)]
struct Code {
    text: String,
}

impl Code {
    fn line(&mut self, depth: usize, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..depth {
                self.text.push_str("    ");
            }
            self.text.push_str(text);
        }
        self.text.push('\n');
    }

    fn blank(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with("\n\n") {
            self.text.push('\n');
        }
    }

    fn doc(&mut self, depth: usize, text: &str) {
        for l in text.lines() {
            if l.is_empty() {
                self.line(depth, "///");
            } else {
                self.line(depth, format!("/// {l}"));
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

struct Emitter<'a> {
    catalog: &'a Catalog,
    classification: &'a Classification,
    handles: &'a HandleTable,
    scope: TypeScope<'a>,
    rules: &'a OwnershipRules,
    options: &'a EmitOptions,
    types: NameTable,
    values: NameTable,
    raw: Code,
    externs: Code,
    unmapped: Code,
    audit: Vec<(String, SymbolKind, String)>,
    safe: Code,
    entries: Vec<ModuleEntry>,
    unmappable: Vec<Unmappable>,
    ownership: Vec<OwnershipRecord>,
}

impl<'a> Emitter<'a> {
    fn naming(&self) -> &Naming {
        &self.options.naming
    }

    fn allow(&mut self, lint: &str) {
        if !self.options.naming.normalize {
            self.safe.line(0, format!("#[allow({lint})]"));
        }
    }

    fn safe_entry(&mut self, symbol: &NativeSymbol, item: String, note: Option<String>) {
        self.entries.push(ModuleEntry {
            symbol: symbol.name.clone(),
            kind: symbol.kind,
            surface: Surface::Safe,
            item: Some(item),
            note,
        });
    }

    fn unsafe_entry(&mut self, symbol: &NativeSymbol, reason: UnmappableReason, declared: bool) {
        tracing::info!(symbol = %symbol.name, kind = %symbol.kind, %reason, declared, "no safe mapping");
        let item = declared.then(|| format!("unmapped::{}", symbol.name));
        if declared {
            self.unmapped.blank();
            self.unmapped.doc(1, &format!("`{}`: {reason}.", symbol.name));
            self.unmapped.line(1, format!("pub use super::raw::{};", symbol.name));
        }
        self.audit.push((symbol.name.clone(), symbol.kind, reason.to_string()));
        self.entries.push(ModuleEntry {
            symbol: symbol.name.clone(),
            kind: symbol.kind,
            surface: Surface::Unsafe,
            item,
            note: Some(reason.to_string()),
        });
        self.unmappable.push(Unmappable {
            symbol: symbol.name.clone(),
            kind: symbol.kind,
            reason,
            declared,
        });
    }

    // --- handles ---

    /// Declare release functions of owned handles that were not selected.
    fn release_externs(&mut self, selection: &Selection<'_>) -> Result<()> {
        let catalog = self.catalog;
        let handles = self.handles;
        for info in handles.handles() {
            let Some(release) = &info.release else { continue };
            if selection.contains(release) {
                continue;
            }
            if let Some(Declaration::Function(sig)) = catalog.get(release).map(|s| &s.decl) {
                if let Err(reason) = self.extern_fn(sig) {
                    return Err(GenError::config(
                        release,
                        format!("release function of `{}` cannot be declared: {reason}", info.name),
                    ));
                }
            }
        }
        Ok(())
    }

    fn opaque(&mut self, symbol: &NativeSymbol) -> Result<()> {
        let c = &symbol.name;
        self.raw.blank();
        self.raw.line(1, "#[repr(C)]");
        self.raw.line(1, format!("pub struct {c} {{"));
        self.raw.line(2, "_private: [u8; 0],");
        self.raw.line(2, "_marker: ::std::marker::PhantomData<(*mut u8, ::std::marker::PhantomPinned)>,");
        self.raw.line(1, "}");

        let rust = self.naming().type_name(c);
        self.types.claim(&rust, c)?;
        let info = self.handles.get(c).cloned();
        let release = info.as_ref().and_then(|i| i.release.clone());

        self.safe.blank();
        let note = match release {
            Some(release) => {
                self.safe.doc(0, &format!("Owned `{c}` handle, released by `{release}` when dropped."));
                self.allow("non_camel_case_types");
                self.safe.line(0, format!("pub type {rust} = {RT}::Owned<raw::{c}>;"));
                self.safe.blank();
                let configured = info.as_ref().map(|i| i.release_args.as_slice()).unwrap_or_default();
                let (args, zeroed) = self.release_args(&release, configured);
                if zeroed > 0 {
                    tracing::debug!(handle = %c, release = %release, zeroed, "release arguments default to zero");
                    self.safe.doc(
                        0,
                        &format!("`{release}` takes {zeroed} argument(s) after the handle; they are passed as all-zero values."),
                    );
                }
                self.safe.line(0, format!("unsafe impl {RT}::NativeResource for raw::{c} {{"));
                self.safe.line(1, format!("const NAME: &'static str = {c:?};"));
                self.safe.blank();
                self.safe.line(1, "unsafe fn release(ptr: *mut Self) {");
                self.safe.line(2, format!("unsafe {{ raw::{release}({args}) }};"));
                self.safe.line(1, "}");
                self.safe.line(0, "}");
                if info.as_ref().is_some_and(|i| i.send) {
                    self.safe.blank();
                    self.safe.line(0, format!("unsafe impl {RT}::ThreadMovable for raw::{c} {{}}"));
                }
                format!("owned, released by {release}")
            }
            None => {
                self.safe.doc(0, &format!("Borrowed `{c}` handle; the library keeps ownership."));
                self.allow("non_camel_case_types");
                self.safe.line(0, format!("pub type {rust}<'a> = {RT}::Borrowed<'a, raw::{c}>;"));
                "borrowed only, no release function".to_string()
            }
        };
        self.safe_entry(symbol, rust, Some(note));
        Ok(())
    }

    /// Arguments of a release call: the handle, then the configured values,
    /// else zero for each remaining parameter. Also returns how many were
    /// zero-filled.
    fn release_args(&self, release: &str, configured: &[i128]) -> (String, usize) {
        let extra = match self.catalog.get(release).map(|s| &s.decl) {
            Some(Declaration::Function(sig)) => sig.parameters.len().saturating_sub(1),
            _ => 0,
        };
        let mut args = vec!["ptr".to_string()];
        if configured.len() == extra {
            args.extend(configured.iter().map(i128::to_string));
            return (args.join(", "), 0);
        }
        args.extend(std::iter::repeat("::std::mem::zeroed()".to_string()).take(extra));
        (args.join(", "), extra)
    }

    // --- structs and unions ---

    fn aggregate(&mut self, symbol: &NativeSymbol, decl: &StructDecl) -> Result<()> {
        let c = &symbol.name;
        if !self.scope.is_declared(c) {
            let reason = if decl.has_bit_fields() {
                UnmappableReason::BitFields(c.clone())
            } else {
                decl.fields
                    .iter()
                    .find_map(|f| self.scope.rust_type(&f.ty, "").err())
                    .unwrap_or_else(|| UnmappableReason::UnselectedType(c.clone()))
            };
            self.unsafe_entry(symbol, reason, false);
            return Ok(());
        }

        let plain = self.scope.is_plain(c);
        let keyword = if decl.is_union { "union" } else { "struct" };
        let fields = decl
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let name = if f.name.is_empty() { format!("_{i}") } else { sanitize(&f.name) };
                self.scope.rust_type(&f.ty, "").map(|ty| (name, ty))
            })
            .collect::<std::result::Result<Vec<_>, _>>();
        let fields = match fields {
            Ok(fields) => fields,
            Err(reason) => {
                self.unsafe_entry(symbol, reason, false);
                return Ok(());
            }
        };

        self.raw.blank();
        self.raw.line(1, "#[repr(C)]");
        self.raw.line(1, if plain { "#[derive(Debug, Clone, Copy)]" } else { "#[derive(Clone, Copy)]" });
        self.raw.line(1, format!("pub {keyword} {c} {{"));
        for (name, ty) in &fields {
            self.raw.line(2, format!("pub {name}: {ty},"));
        }
        self.raw.line(1, "}");
        self.raw.blank();
        self.raw.line(1, format!("impl ::std::default::Default for {c} {{"));
        self.raw.line(2, "fn default() -> Self {");
        self.raw.line(3, "// SAFETY: all-zero bytes are a valid value of this C type.");
        self.raw.line(3, "unsafe { ::std::mem::zeroed() }");
        self.raw.line(2, "}");
        self.raw.line(1, "}");

        if plain {
            let rust = self.naming().type_name(c);
            self.types.claim(&rust, c)?;
            self.safe.blank();
            self.safe.doc(0, &format!("`{keyword} {c}`, plain data."));
            self.allow("non_camel_case_types");
            self.safe.line(0, format!("pub type {rust} = raw::{c};"));
            self.safe_entry(symbol, rust, None);
        } else {
            let reason = self.scope.struct_reason(c);
            self.unsafe_entry(symbol, reason, true);
        }
        Ok(())
    }

    // --- enumerations ---

    fn enumeration(&mut self, symbol: &NativeSymbol) -> Result<()> {
        let c = &symbol.name;
        let classification = self.classification;
        let Some(mapping) = classification.get(c) else {
            return Err(GenError::config(c, "selected enumeration was not classified"));
        };
        let underlying = self.scope.rust_type(&mapping.underlying, "").map_err(|r| GenError::config(c, r.to_string()))?;

        self.raw.blank();
        self.raw.line(1, format!("pub type {c} = {underlying};"));
        for e in &mapping.enumerands {
            self.raw.line(1, format!("pub const {}: {c} = {};", e.name, e.value));
        }
        self.represent(symbol, mapping)
    }

    fn represent(&mut self, symbol: &NativeSymbol, mapping: &EnumerationMapping) -> Result<()> {
        match mapping.representation {
            Representation::Constified => self.constified(symbol, mapping),
            Representation::Bitfield => self.bitfield(symbol, mapping),
            Representation::Raw => {
                self.unsafe_entry(symbol, UnmappableReason::RawEnumeration, true);
                Ok(())
            }
        }
    }

    fn member_names(&self, mapping: &EnumerationMapping) -> Result<Vec<String>> {
        let names: Vec<&str> = mapping.enumerands.iter().map(|e| e.name.as_str()).collect();
        let rust = match mapping.representation {
            Representation::Bitfield => self.naming().flag_names(&names),
            _ => self.naming().variant_names(&names),
        };
        let mut table = NameTable::default();
        for (r, c) in rust.iter().zip(&names) {
            table.claim(r, c)?;
        }
        Ok(rust)
    }

    fn constified(&mut self, symbol: &NativeSymbol, mapping: &EnumerationMapping) -> Result<()> {
        let c = &symbol.name;
        let rust = self.naming().type_name(c);
        self.types.claim(&rust, c)?;
        let members = self.member_names(mapping)?;
        let repr_ty = self.scope.rust_type(&mapping.underlying, "").map_err(|r| GenError::config(c, r.to_string()))?;
        let primitive = primitive(&mapping.underlying);

        let origin = if mapping.grouped { "constants" } else { "enum" };
        self.safe.blank();
        self.safe.doc(0, &format!("Values of `{c}` ({origin}), a closed set."));
        self.safe.line(0, "#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]");
        self.safe.line(0, format!("#[repr({primitive})]"));
        self.allow("non_camel_case_types");
        self.safe.line(0, format!("pub enum {rust} {{"));
        let mut variants = Vec::new();
        let mut aliases = Vec::new();
        for (e, name) in mapping.enumerands.iter().zip(&members) {
            match &e.alias_of {
                None => {
                    self.safe.doc(1, &format!("`{}`", e.name));
                    self.safe.line(1, format!("{name} = {},", e.value));
                    variants.push((name.clone(), e.value));
                }
                Some(target) => aliases.push((name.clone(), e.name.clone(), target.clone())),
            }
        }
        self.safe.line(0, "}");

        if !aliases.is_empty() {
            self.safe.blank();
            self.safe.line(0, format!("impl {rust} {{"));
            for (name, c_name, target) in &aliases {
                let target_rust = mapping
                    .enumerands
                    .iter()
                    .zip(&members)
                    .find(|(e, _)| &e.name == target)
                    .map(|(_, n)| n.clone())
                    .unwrap_or_default();
                self.safe.doc(1, &format!("`{c_name}`, same value as [`{rust}::{target_rust}`]."));
                self.safe.line(1, "#[allow(non_upper_case_globals)]");
                self.safe.line(1, format!("pub const {name}: Self = Self::{target_rust};"));
            }
            self.safe.line(0, "}");
        }

        self.safe.blank();
        self.safe.line(0, format!("impl {RT}::ConstifiedEnum for {rust} {{"));
        self.safe.line(1, format!("type Repr = {repr_ty};"));
        self.safe.line(1, format!("const NAME: &'static str = {c:?};"));
        let all = variants.iter().map(|(n, _)| format!("Self::{n}")).collect::<Vec<_>>().join(", ");
        self.safe.line(1, format!("const VARIANTS: &'static [Self] = &[{all}];"));
        self.safe.blank();
        self.safe.line(1, format!("fn from_raw(value: {repr_ty}) -> ::std::option::Option<Self> {{"));
        self.safe.line(2, "match value {");
        for (name, value) in &variants {
            self.safe.line(3, format!("{value} => ::std::option::Option::Some(Self::{name}),"));
        }
        self.safe.line(3, "_ => ::std::option::Option::None,");
        self.safe.line(2, "}");
        self.safe.line(1, "}");
        self.safe.blank();
        self.safe.line(1, format!("fn to_raw(self) -> {repr_ty} {{"));
        self.safe.line(2, format!("self as {repr_ty}"));
        self.safe.line(1, "}");
        self.safe.line(0, "}");

        self.safe.blank();
        self.safe.line(0, format!("impl ::std::convert::TryFrom<{repr_ty}> for {rust} {{"));
        self.safe.line(1, format!("type Error = {RT}::Error;"));
        self.safe.blank();
        self.safe.line(1, format!("fn try_from(value: {repr_ty}) -> {RT}::Result<Self> {{"));
        self.safe.line(2, format!("<Self as {RT}::ConstifiedEnum>::try_from_raw(value)"));
        self.safe.line(1, "}");
        self.safe.line(0, "}");
        self.safe.blank();
        self.safe.line(0, format!("impl ::std::convert::From<{rust}> for {repr_ty} {{"));
        self.safe.line(1, format!("fn from(value: {rust}) -> Self {{"));
        self.safe.line(2, format!("value as {repr_ty}"));
        self.safe.line(1, "}");
        self.safe.line(0, "}");

        self.safe_entry(symbol, rust, Some(format!("constified, {} values", variants.len())));
        Ok(())
    }

    fn bitfield(&mut self, symbol: &NativeSymbol, mapping: &EnumerationMapping) -> Result<()> {
        let c = &symbol.name;
        let rust = self.naming().type_name(c);
        self.types.claim(&rust, c)?;
        let members = self.member_names(mapping)?;
        let bits = self.scope.rust_type(&mapping.underlying, "").map_err(|r| GenError::config(c, r.to_string()))?;

        self.safe.blank();
        self.safe.line(0, format!("{RT}::bitflags::bitflags! {{"));
        self.safe.doc(1, &format!("Flags of `{c}`. Unknown bits are kept, not rejected."));
        self.safe.line(1, "#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]");
        if !self.options.naming.normalize {
            self.safe.line(1, "#[allow(non_camel_case_types)]");
        }
        self.safe.line(1, format!("pub struct {rust}: {bits} {{"));
        for (e, name) in mapping.enumerands.iter().zip(&members) {
            self.safe.doc(2, &format!("`{}`", e.name));
            self.safe.line(2, format!("const {name} = {};", e.value));
        }
        self.safe.line(1, "}");
        self.safe.line(0, "}");

        self.safe_entry(symbol, rust, Some(format!("bitfield, {} flags", members.len())));
        Ok(())
    }

    // --- typedefs ---

    fn typedef(&mut self, symbol: &NativeSymbol, target: &CType) -> Result<()> {
        let c = &symbol.name;
        let spelled = self.scope.rust_type(target, "");
        let spelled = match spelled {
            Ok(s) if self.scope.is_declared(c) => s,
            Ok(_) => {
                self.unsafe_entry(symbol, UnmappableReason::UnselectedType(c.clone()), false);
                return Ok(());
            }
            Err(reason) => {
                self.unsafe_entry(symbol, reason, false);
                return Ok(());
            }
        };
        self.raw.blank();
        self.raw.line(1, format!("pub type {c} = {spelled};"));

        let classification = self.classification;
        if let Some(mapping) = classification.get(c) {
            return self.represent(symbol, mapping);
        }

        let reason = match target.strip_const() {
            t if t.is_fn_pointer() => Some(UnmappableReason::FunctionPointer),
            CType::Pointer(_) => Some(UnmappableReason::PointerAlias),
            CType::Array(..) => Some(UnmappableReason::UnsupportedPointer(format!("array typedef `{target}`"))),
            _ => None,
        };
        if let Some(reason) = reason {
            self.unsafe_entry(symbol, reason, true);
            return Ok(());
        }

        let aliased = match self.scope.value_kind(&CType::Named(c.clone())) {
            Ok(ValueKind::Enum(e)) => self.naming().type_name(&e),
            Ok(_) => format!("raw::{c}"),
            Err(reason) => {
                self.unsafe_entry(symbol, reason, true);
                return Ok(());
            }
        };
        let rust = self.naming().type_name(c);
        self.types.claim(&rust, c)?;
        self.safe.blank();
        self.safe.doc(0, &format!("`typedef {target} {c}`"));
        self.allow("non_camel_case_types");
        self.safe.line(0, format!("pub type {rust} = {aliased};"));
        self.safe_entry(symbol, rust, None);
        Ok(())
    }

    // --- constants ---

    fn constant(&mut self, symbol: &NativeSymbol, decl: &ConstantDecl) -> Result<()> {
        let c = &symbol.name;
        let classification = self.classification;
        if let Some(owner) = classification.owner_of(c) {
            let value = owner.enumerands.iter().find(|e| &e.name == c).map_or(decl.value, |e| e.value);
            self.raw.line(1, format!("pub const {c}: {} = {value};", owner.source));
            let members = self.member_names(owner)?;
            let index = owner.enumerands.iter().position(|e| &e.name == c);
            return match (owner.representation, index) {
                (Representation::Raw, _) | (_, None) => {
                    self.unsafe_entry(symbol, UnmappableReason::RawEnumeration, true);
                    Ok(())
                }
                (_, Some(i)) => {
                    let item = format!("{}::{}", self.naming().type_name(&owner.source), members[i]);
                    self.safe_entry(symbol, item, Some(format!("member of {}", owner.source)));
                    Ok(())
                }
            };
        }

        let typed = decl
            .ty
            .as_ref()
            .and_then(|ty| Some((self.scope.integer_repr(ty)?, ty)))
            .and_then(|(repr, ty)| {
                let raw = self.scope.rust_type(ty, "").ok()?;
                let safe = self.scope.rust_type(ty, "raw::").ok()?;
                Some((repr, raw, safe))
            });
        let (repr, raw_ty, safe_ty) = typed.unwrap_or_else(|| {
            let repr = fitting_type(decl.value);
            let spelled = c_int_spelling(&repr);
            (repr, spelled.clone(), spelled)
        });
        let value = repr.truncate(decl.value);

        self.raw.line(1, format!("pub const {c}: {raw_ty} = {value};"));

        let rust = self.naming().constant_name(c);
        self.values.claim(&rust, c)?;
        self.safe.blank();
        self.safe.doc(0, &format!("`{c}` = `{}`", decl.expr));
        self.allow("non_upper_case_globals");
        self.safe.line(0, format!("pub const {rust}: {safe_ty} = raw::{c};"));
        self.safe_entry(symbol, rust, None);
        Ok(())
    }

    // --- variables ---

    fn variable(&mut self, symbol: &NativeSymbol, ty: &CType) -> Result<()> {
        let c = &symbol.name;
        let spelled = match self.scope.rust_type(ty, "") {
            Ok(s) => s,
            Err(reason) => {
                self.unsafe_entry(symbol, reason, false);
                return Ok(());
            }
        };
        let mutable = !ty.is_const();
        self.externs.blank();
        self.externs.doc(2, &format!("`extern {ty} {c}`"));
        let keyword = if mutable { "static mut" } else { "static" };
        self.externs.line(2, format!("pub {keyword} {c}: {spelled};"));

        if mutable {
            self.unsafe_entry(symbol, UnmappableReason::MutableGlobal, true);
            return Ok(());
        }
        let safe_ty = match self.scope.value_kind(ty) {
            Ok(ValueKind::Scalar(t)) => self.scope.rust_type(&t, "raw::"),
            Ok(ValueKind::Struct(s)) => Ok(self.naming().type_name(&s)),
            Ok(ValueKind::Enum(_)) => Err(UnmappableReason::UnsupportedPointer(format!("enumeration global `{c}`"))),
            Err(reason) => Err(reason),
        };
        let safe_ty = match safe_ty {
            Ok(t) => t,
            Err(reason) => {
                self.unsafe_entry(symbol, reason, true);
                return Ok(());
            }
        };
        let rust = self.naming().function_name(c);
        self.values.claim(&rust, c)?;
        self.safe.blank();
        self.safe.doc(0, &format!("Value of the constant global `{c}`."));
        self.allow("non_snake_case");
        self.safe.line(0, format!("pub fn {rust}() -> {safe_ty} {{"));
        self.safe.line(1, format!("unsafe {{ raw::{c} }}"));
        self.safe.line(0, "}");
        self.safe_entry(symbol, format!("{rust}()"), None);
        Ok(())
    }

    // --- functions ---

    fn extern_fn(&mut self, sig: &CSignature) -> std::result::Result<(), UnmappableReason> {
        self.scope.raw_signature(sig)?;
        let mut params = Vec::new();
        let mut taken = Vec::new();
        for (i, p) in sig.parameters.iter().enumerate() {
            let base = if p.name.is_empty() { format!("arg{i}") } else { sanitize(&p.name) };
            let name = fresh(&base, &taken);
            params.push(format!("{name}: {}", self.scope.rust_type(&p.param_type, "")?));
            taken.push(name);
        }
        if sig.is_variadic {
            params.push("...".to_string());
        }
        let ret = self
            .scope
            .return_type(&sig.return_type, "")?
            .map(|r| format!(" -> {r}"))
            .unwrap_or_default();
        self.externs.blank();
        self.externs.doc(2, &format!("`{sig}`"));
        self.externs.line(2, format!("pub fn {}({}){ret};", sig.name, params.join(", ")));
        Ok(())
    }

    fn function(&mut self, symbol: &NativeSymbol, sig: &CSignature) -> Result<()> {
        let handles = self.handles;
        let decision = self.rules.decide(sig, |n| handles.contains(n));
        self.ownership.push(OwnershipRecord {
            function: sig.name.clone(),
            decision: decision.clone(),
        });

        if let Err(reason) = self.extern_fn(sig) {
            self.unsafe_entry(symbol, reason, false);
            return Ok(());
        }
        match self.scope.map_function(sig, &decision, self.options.status.as_ref()) {
            Ok(plan) => {
                let rust = self.wrapper(sig, &plan, &decision)?;
                self.safe_entry(symbol, rust, Some(decision.to_string()));
            }
            Err(reason) => self.unsafe_entry(symbol, reason, true),
        }
        Ok(())
    }

    fn wrapper(&mut self, sig: &CSignature, plan: &FunctionPlan, decision: &OwnershipDecision) -> Result<String> {
        let c = &sig.name;
        let rust = self.naming().function_name(c);
        self.values.claim(&rust, c)?;
        let mut w = Wrapper::build(self, sig, plan)?;

        self.safe.blank();
        let mut doc = format!("Calls `{c}`.\n\n`{sig}`\n\nOwnership: {decision}.");
        if let ReturnMapping::Status { success } = &plan.ret {
            doc.push_str(&format!(
                "\n\nFails with the library error when the status is not one of {success:?}."
            ));
        }
        self.safe.doc(0, &doc);
        self.allow("non_snake_case");
        let tail = w.take_tail();
        self.safe.line(0, format!("pub fn {rust}({}){} {{", w.inputs.join(", "), w.return_type()));
        for stmt in &w.body {
            self.safe.line(1, stmt);
        }
        if let Some(tail) = tail {
            self.safe.line(1, tail);
        }
        self.safe.line(0, "}");
        Ok(rust)
    }

    fn finish(self) -> GeneratedModule {
        let mut out = Code::default();
        let version = env!("CARGO_PKG_VERSION");
        out.line(0, format!("// @generated by cbridge {version}. Do not edit; regenerate instead."));
        out.line(0, format!("// Library: {}", self.options.library));
        out.line(0, format!("// Input digest: sha256:{}", self.options.digest));
        out.line(0, "//");
        out.line(0, "// Native handles are plain tokens without internal locking. Serialize access");
        out.line(0, "// to each handle. `Owned<T>` is never `Sync` and is `Send` only for handles");
        out.line(0, "// configured with `send = true`.");
        out.blank();

        out.doc(0, "Exact C declarations.");
        out.line(0, "pub mod raw {");
        out.line(1, "#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals, dead_code)]");
        out.text.push_str(&self.raw.text);
        if !self.externs.is_empty() {
            out.blank();
            if let Some(link) = &self.options.link {
                out.line(1, format!("#[link(name = {link:?})]"));
            }
            out.line(1, "extern \"C\" {");
            let body = self.externs.text.trim_start_matches('\n');
            out.text.push_str(body);
            out.line(1, "}");
        }
        out.line(0, "}");
        out.blank();

        out.doc(0, "Symbols without a safe mapping.\n\nEvery item here needs its own safety justification.");
        out.line(0, "pub mod unmapped {");
        out.text.push_str(self.unmapped.text.trim_start_matches('\n'));
        out.blank();
        out.doc(1, "Every selected symbol without a safe mapping: `(symbol, kind, reason)`.");
        if self.audit.is_empty() {
            out.line(1, "pub const UNMAPPED: &[(&str, &str, &str)] = &[];");
        } else {
            out.line(1, "pub const UNMAPPED: &[(&str, &str, &str)] = &[");
            for (symbol, kind, reason) in &self.audit {
                out.line(2, format!("({symbol:?}, {:?}, {reason:?}),", kind.to_string()));
            }
            out.line(1, "];");
        }
        out.line(0, "}");
        out.blank();

        out.doc(0, &format!("Lifecycle and error reporting for `{}`.", self.options.library));
        out.line(
            0,
            format!("pub static LIBRARY: {RT}::Library = {RT}::Library::new({:?});", self.options.library),
        );
        out.blank();
        out.text.push_str(self.safe.text.trim_start_matches('\n'));

        GeneratedModule {
            entries: self.entries,
            unmappable: self.unmappable,
            ownership: self.ownership,
            digest: self.options.digest.clone(),
            text: out.text,
        }
    }
}

/// Statements of one safe wrapper.
struct Wrapper {
    inputs: Vec<String>,
    body: Vec<String>,
    outputs: Vec<(String, String)>,
    fallible: bool,
}

impl Wrapper {
    fn build(e: &Emitter<'_>, sig: &CSignature, plan: &FunctionPlan) -> Result<Self> {
        let scope = &e.scope;
        let naming = e.naming();
        let c = &sig.name;
        let lit = format!("{c:?}");
        let ty = |t: &CType| scope.rust_type(t, "raw::").map_err(|r| GenError::config(c, r.to_string()));

        let mut taken = Vec::new();
        let mut names = Vec::new();
        for (i, p) in sig.parameters.iter().enumerate() {
            let base = if p.name.is_empty() { format!("arg{i}") } else { naming.param_name(&p.name) };
            let name = fresh(&base, &taken);
            taken.push(name.clone());
            names.push(name);
        }

        let mut w = Wrapper {
            inputs: Vec::new(),
            body: Vec::new(),
            outputs: Vec::new(),
            fallible: false,
        };
        let mut args = vec![String::new(); sig.parameters.len()];
        let mut post = Vec::new();

        for (i, mapping) in plan.params.iter().enumerate() {
            let name = &names[i];
            let param = &sig.parameters[i].param_type;
            match mapping {
                ParamMapping::BorrowHandle(h) => {
                    w.inputs.push(format!("{name}: &impl {RT}::AsHandle<raw::{h}>"));
                    args[i] = format!("{name}.as_handle_ptr()");
                }
                ParamMapping::ConsumeHandle(h) => {
                    w.inputs.push(format!("{name}: {RT}::Owned<raw::{h}>"));
                    w.body.push(format!("let {name} = {name}.into_raw();"));
                    args[i] = name.clone();
                }
                ParamMapping::CreateHandle(h) => {
                    w.body.push(format!("let mut {name}: *mut raw::{h} = ::std::ptr::null_mut();"));
                    args[i] = format!("&mut {name}");
                    post.push(owned_from_raw(name, name, &lit, h));
                    w.outputs.push((name.clone(), format!("{RT}::Owned<raw::{h}>")));
                    w.fallible = true;
                }
                ParamMapping::Str { length } | ParamMapping::Bytes { length } => {
                    let slice = if matches!(mapping, ParamMapping::Str { .. }) { "&str" } else { "&[u8]" };
                    w.inputs.push(format!("{name}: {slice}"));
                    args[i] = format!("{name}.as_ptr().cast()");
                    let len = &names[*length];
                    let len_ty = ty(&sig.parameters[*length].param_type)?;
                    w.body.push(format!("let {len} = {RT}::buffer::length::<{len_ty}>({lit}, {name}.len())?;"));
                    args[*length] = len.clone();
                    w.fallible = true;
                }
                ParamMapping::CStr => {
                    w.inputs.push(format!("{name}: &::std::ffi::CStr"));
                    args[i] = format!("{name}.as_ptr().cast()");
                }
                ParamMapping::OutBuffer { length, by_pointer } => {
                    w.inputs.push(format!("{name}: &mut [u8]"));
                    args[i] = format!("{name}.as_mut_ptr().cast()");
                    let len = &names[*length];
                    let len_param = &sig.parameters[*length].param_type;
                    if *by_pointer {
                        let len_ty = ty(len_param.pointee().unwrap_or(len_param))?;
                        w.body.push(format!(
                            "let mut {len} = {RT}::buffer::length::<{len_ty}>({lit}, {name}.len())?;"
                        ));
                        args[*length] = format!("&mut {len}");
                        post.push(format!("let {len} = {RT}::buffer::written_within({lit}, {len}, {name}.len())?;"));
                        w.outputs.push((len.clone(), "usize".to_string()));
                    } else {
                        let len_ty = ty(len_param)?;
                        w.body.push(format!("let {len} = {RT}::buffer::length::<{len_ty}>({lit}, {name}.len())?;"));
                        args[*length] = len.clone();
                    }
                    w.fallible = true;
                }
                ParamMapping::OutString { length } => {
                    let ptr_ty = ty(param.pointee().unwrap_or(param))?;
                    let null = if ptr_ty.starts_with("*const") { "null" } else { "null_mut" };
                    w.body.push(format!("let mut {name}: {ptr_ty} = ::std::ptr::{null}();"));
                    args[i] = format!("&mut {name}");
                    let len = &names[*length];
                    let len_param = &sig.parameters[*length].param_type;
                    let len_ty = ty(len_param.pointee().unwrap_or(len_param))?;
                    w.body.push(format!("let mut {len}: {len_ty} = ::std::default::Default::default();"));
                    args[*length] = format!("&mut {len}");
                    post.push(format!("let {len} = {RT}::buffer::written({lit}, {len})?;"));
                    post.push(format!(
                        "let {name} = unsafe {{ {RT}::buffer::string_from_raw({lit}, {name} as *const ::std::os::raw::c_char, {len}) }}?;"
                    ));
                    w.outputs.push((name.clone(), "::std::string::String".to_string()));
                    w.fallible = true;
                }
                ParamMapping::Length { .. } => {}
                ParamMapping::Value(kind) => {
                    let (input_ty, arg) = match kind {
                        ValueKind::Scalar(t) => (ty(t)?, name.clone()),
                        ValueKind::Enum(en) => {
                            let safe = naming.type_name(en);
                            let arg = if e.is_bitfield(en) {
                                format!("{name}.bits()")
                            } else {
                                format!("<{safe} as {RT}::ConstifiedEnum>::to_raw({name})")
                            };
                            (safe, arg)
                        }
                        ValueKind::Struct(s) => (naming.type_name(s), name.clone()),
                    };
                    w.inputs.push(format!("{name}: {input_ty}"));
                    args[i] = arg;
                }
                ParamMapping::Out(kind) => {
                    let local_ty = ty(param.pointee().unwrap_or(param))?;
                    w.body.push(format!("let mut {name}: {local_ty} = ::std::default::Default::default();"));
                    args[i] = format!("&mut {name}");
                    let out_ty = e.convert_out(kind, name, &local_ty, &mut post, &mut w.fallible);
                    w.outputs.push((name.clone(), out_ty));
                }
                ParamMapping::StructRef { name: s, mutable } => {
                    let m = if *mutable { "mut " } else { "" };
                    w.inputs.push(format!("{name}: &{m}{}", naming.type_name(s)));
                    args[i] = name.clone();
                }
            }
        }

        let call = format!("raw::{c}({})", args.join(", "));
        match &plan.ret {
            ReturnMapping::Void => w.body.push(format!("unsafe {{ {call} }};")),
            ReturnMapping::Status { success } => {
                let status = fresh("status", &taken);
                let codes = success.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
                w.body.push(format!("let {status} = unsafe {{ {call} }};"));
                w.body.push(format!("LIBRARY.check({lit}, {status} as i64, &[{codes}])?;"));
                w.fallible = true;
            }
            ReturnMapping::Value(kind) => {
                let ret = fresh("ret", &taken);
                let raw_ty = ty(&sig.return_type)?;
                w.body.push(format!("let {ret} = unsafe {{ {call} }};"));
                let mut conv = Vec::new();
                let out_ty = e.convert_out(kind, &ret, &raw_ty, &mut conv, &mut w.fallible);
                w.body.extend(conv);
                w.outputs.insert(0, (ret, out_ty));
            }
            ReturnMapping::CreatedHandle(h) => {
                let ret = fresh("ret", &taken);
                w.body.push(format!("let {ret} = unsafe {{ {call} }};"));
                let ptr = if sig.return_type.pointee().is_some_and(CType::is_const) {
                    format!("{ret}.cast_mut()")
                } else {
                    ret.clone()
                };
                w.body.push(owned_from_raw(&ret, &ptr, &lit, h));
                w.outputs.insert(0, (ret, format!("{RT}::Owned<raw::{h}>")));
                w.fallible = true;
            }
        }
        w.body.extend(post);
        Ok(w)
    }

    fn output_type(&self) -> String {
        match self.outputs.as_slice() {
            [] => "()".to_string(),
            [(_, t)] => t.clone(),
            many => format!("({})", many.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>().join(", ")),
        }
    }

    fn output_expr(&self) -> String {
        match self.outputs.as_slice() {
            [] => "()".to_string(),
            [(n, _)] => n.clone(),
            many => format!("({})", many.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>().join(", ")),
        }
    }

    /// ` -> T`, empty for a unit return.
    fn return_type(&self) -> String {
        if self.fallible {
            format!(" -> {RT}::Result<{}>", self.output_type())
        } else if self.outputs.is_empty() {
            String::new()
        } else {
            format!(" -> {}", self.output_type())
        }
    }

    /// Tail expression; a final `let x = e;` returning `x` becomes `e`.
    fn take_tail(&mut self) -> Option<String> {
        if self.fallible {
            return Some(format!("Ok({})", self.output_expr()));
        }
        if self.outputs.is_empty() {
            return None;
        }
        let expr = self.output_expr();
        let folded = self
            .body
            .last()
            .and_then(|last| last.strip_prefix(&format!("let {expr} = "))?.strip_suffix(';').map(str::to_string));
        match folded {
            Some(value) => {
                self.body.pop();
                Some(value)
            }
            None => Some(expr),
        }
    }
}

impl Emitter<'_> {
    fn is_bitfield(&self, enumeration: &str) -> bool {
        self.classification
            .get(enumeration)
            .is_some_and(|m| m.representation == Representation::Bitfield)
    }

    /// Push the conversion of a raw output `name` and return its safe type.
    fn convert_out(&self, kind: &ValueKind, name: &str, raw_ty: &str, post: &mut Vec<String>, fallible: &mut bool) -> String {
        match kind {
            ValueKind::Scalar(_) => raw_ty.to_string(),
            ValueKind::Struct(s) => self.naming().type_name(s),
            ValueKind::Enum(en) => {
                let safe = self.naming().type_name(en);
                if self.is_bitfield(en) {
                    post.push(format!("let {name} = {safe}::from_bits_retain({name});"));
                } else {
                    post.push(format!("let {name} = <{safe} as {RT}::ConstifiedEnum>::try_from_raw({name})?;"));
                    *fallible = true;
                }
                safe
            }
        }
    }
}

fn owned_from_raw(binding: &str, ptr: &str, function: &str, handle: &str) -> String {
    format!(
        "let {binding} = unsafe {{ {RT}::Owned::from_raw({ptr}) }}.ok_or({RT}::Error::NullHandle {{ function: {function}, handle: {handle:?} }})?;"
    )
}

/// Primitive integer name for `#[repr]`.
fn primitive(ty: &CType) -> &'static str {
    match ty.int_info() {
        Some((8, true)) => "i8",
        Some((8, false)) => "u8",
        Some((16, true)) => "i16",
        Some((16, false)) => "u16",
        Some((32, false)) => "u32",
        Some((64, true)) => "i64",
        Some((64, false)) => "u64",
        _ => "i32",
    }
}

/// Smallest of `int`, `unsigned int`, `long long`, `unsigned long long`
/// holding `value`.
fn fitting_type(value: i128) -> CType {
    if i32::try_from(value).is_ok() {
        CType::Int
    } else if u32::try_from(value).is_ok() {
        CType::UnsignedInt
    } else if i64::try_from(value).is_ok() {
        CType::LongLong
    } else {
        CType::UnsignedLongLong
    }
}

fn c_int_spelling(ty: &CType) -> String {
    match ty {
        CType::Int => "::std::os::raw::c_int",
        CType::UnsignedInt => "::std::os::raw::c_uint",
        CType::LongLong => "::std::os::raw::c_longlong",
        _ => "::std::os::raw::c_ulonglong",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, EnumDirective};
    use crate::ownership::HandleSpec;
    use crate::pattern::Pattern;
    use crate::select::{select, SelectionRule};
    use cbridge_catalog::HeaderOptions;

    const HEADER: &str = r#"
#include <stdint.h>
typedef struct dpiConn dpiConn;
typedef struct dpiContext dpiContext;
typedef uint32_t dpiCreateMode;
#define DPI_MODE_CREATE_DEFAULT ((dpiCreateMode) 0)
#define DPI_MODE_CREATE_THREADED ((dpiCreateMode) 1)
#define DPI_MODE_CREATE_EVENTS ((dpiCreateMode) 4)
#define DPI_SUCCESS 0
#define DPI_FAILURE -1
typedef enum { READ = 1, WRITE = 2, READWRITE = 3 } Mode;
typedef enum { DPI_PURITY_DEFAULT, DPI_PURITY_NEW, DPI_PURITY_SELF } dpiPurity;
typedef struct { uint16_t versionNum; char tag[8]; } dpiVersionInfo;
int dpiConn_create(const char *userName, uint32_t userNameLength, dpiCreateMode mode, dpiConn **conn);
int dpiConn_release(dpiConn *conn);
int dpiConnGetStmtCacheSize(dpiConn *conn, uint32_t *cacheSize);
int dpiConn_getPurity(dpiConn *conn, dpiPurity *purity);
int dpiConn_getMode(dpiConn *conn, Mode *mode);
int dpiConn_getServerVersion(dpiConn *conn, dpiVersionInfo *info);
int dpiConn_trace(dpiConn *conn, const char *fmt, ...);
dpiContext *dpiContext_get(void);
extern const int dpiVersion;
extern int dpiDebugLevel;
"#;

    fn options(normalize: bool) -> EmitOptions {
        EmitOptions {
            library: "dpi".into(),
            link: Some("odpic".into()),
            naming: Naming::new(normalize, vec!["dpi".into(), "DPI_".into()]),
            status: Some(StatusRule {
                ty: "int".into(),
                success: vec![0],
                functions: Pattern::parse_all(&["dpi"]).unwrap(),
                exclude: vec![],
            }),
            digest: "00".repeat(32),
        }
    }

    fn generate_with(header: &str, rules: &[SelectionRule], options: &EmitOptions) -> Result<GeneratedModule> {
        generate_with_handles(header, rules, options, &[])
    }

    fn generate_with_handles(
        header: &str,
        rules: &[SelectionRule],
        options: &EmitOptions,
        specs: &[HandleSpec],
    ) -> Result<GeneratedModule> {
        let cat = Catalog::parse_str("dpi.h", header, &HeaderOptions::new())?;
        let sel = select(&cat, rules);
        let directives: Vec<EnumDirective> = [
            EnumDirective::new("dpiCreateMode", Representation::Bitfield)
                .with_constants("DPI_MODE_CREATE_*")
                .unwrap(),
            EnumDirective::new("Mode", Representation::Bitfield),
            EnumDirective::new("dpiPurity", Representation::Constified),
        ]
        .into_iter()
        .filter(|d| cat.get(&d.name).is_some())
        .collect();
        let classification = classify(&cat, &sel, &directives, None)?;
        let ownership = OwnershipRules::new(
            Pattern::parse_all(&["*_create"]).unwrap(),
            Pattern::parse_all(&["*_release"]).unwrap(),
        );
        let handles = HandleTable::build(&cat, &sel, &ownership, specs)?;
        emit(&cat, &sel, &classification, &handles, &ownership, options)
    }

    fn all_rules() -> Vec<SelectionRule> {
        vec![
            SelectionRule::new(SymbolKind::Type, "*").unwrap(),
            SelectionRule::new(SymbolKind::Function, "dpi").unwrap(),
            SelectionRule::new(SymbolKind::Constant, "DPI_").unwrap(),
            SelectionRule::new(SymbolKind::Variable, "dpi").unwrap(),
        ]
    }

    fn generate() -> GeneratedModule {
        generate_with(HEADER, &all_rules(), &options(true)).unwrap()
    }

    #[test]
    fn stmt_cache_size_wrapper() {
        let m = generate();
        assert!(m.text().contains(
            "pub fn conn_get_stmt_cache_size(conn: &impl ::cbridge_runtime::AsHandle<raw::dpiConn>) -> ::cbridge_runtime::Result<u32> {"
        ));
        assert!(m.text().contains("LIBRARY.check(\"dpiConnGetStmtCacheSize\", status as i64, &[0])?;"));
        assert!(m.text().contains("Ok(cache_size)"));
        let entry = m.entry("dpiConnGetStmtCacheSize").unwrap();
        assert_eq!(entry.surface, Surface::Safe);
        assert_eq!(entry.note.as_deref(), Some("borrow (default)"));
    }

    #[test]
    fn create_returns_owned_handle() {
        let m = generate();
        assert!(m.text().contains(
            "pub fn conn_create(user_name: &str, mode: CreateMode) -> ::cbridge_runtime::Result<::cbridge_runtime::Owned<raw::dpiConn>> {"
        ));
        assert!(m.text().contains("let user_name_length = ::cbridge_runtime::buffer::length::<u32>(\"dpiConn_create\", user_name.len())?;"));
        assert!(m.text().contains("raw::dpiConn_create(user_name.as_ptr().cast(), user_name_length, mode.bits(), &mut conn)"));
        assert!(m.text().contains("pub fn conn_release(conn: ::cbridge_runtime::Owned<raw::dpiConn>) -> ::cbridge_runtime::Result<()> {"));
    }

    #[test]
    fn handle_release_impl() {
        let m = generate();
        assert!(m.text().contains("pub type Conn = ::cbridge_runtime::Owned<raw::dpiConn>;"));
        assert!(m.text().contains("unsafe impl ::cbridge_runtime::NativeResource for raw::dpiConn {"));
        assert!(m.text().contains("unsafe { raw::dpiConn_release(ptr) };"));
        assert!(m.text().contains("pub type Context<'a> = ::cbridge_runtime::Borrowed<'a, raw::dpiContext>;"));
    }

    const RELEASE_MODES: &str = r#"
#include <stdint.h>
typedef struct dpiStmt dpiStmt;
typedef struct dpiLob dpiLob;
#define DPI_MODE_STMT_CLOSE_KEEP 2
int dpiStmt_close(dpiStmt *stmt, uint32_t mode);
int dpiLob_release(dpiLob *lob, uint32_t mode, const char *tag);
"#;

    #[test]
    fn extra_release_arguments() {
        let specs = [HandleSpec {
            name: "dpiStmt".into(),
            release: Some("dpiStmt_close".into()),
            release_args: vec!["DPI_MODE_STMT_CLOSE_KEEP".into()],
            ..HandleSpec::default()
        }];
        let m = generate_with_handles(RELEASE_MODES, &all_rules(), &options(true), &specs).unwrap();
        let text = m.text();
        assert!(text.contains("unsafe { raw::dpiStmt_close(ptr, 2) };"));
        assert!(!text.contains("`dpiStmt_close` takes"));

        assert!(text.contains("unsafe { raw::dpiLob_release(ptr, ::std::mem::zeroed(), ::std::mem::zeroed()) };"));
        assert!(text.contains(
            "/// `dpiLob_release` takes 2 argument(s) after the handle; they are passed as all-zero values.\n\
             unsafe impl ::cbridge_runtime::NativeResource for raw::dpiLob {"
        ));
    }

    const SHAPES: &str = r#"
#include <stdint.h>
void dpiShutdown(void);
uint32_t dpiGetClientVersion(void);
int dpiRead(char *buffer, uint64_t *bufferLength);
"#;

    #[test]
    fn unit_and_plain_returns_read_naturally() {
        let m = generate_with(SHAPES, &all_rules(), &options(true)).unwrap();
        let text = m.text();
        assert!(!text.contains("-> ()"));
        assert!(!text.contains("let ret ="));
        assert!(text.contains("pub fn shutdown() {\n    unsafe { raw::dpiShutdown() };\n}"));
        assert!(text.contains("pub fn get_client_version() -> u32 {\n    unsafe { raw::dpiGetClientVersion() }\n}"));
    }

    #[test]
    fn written_back_length_is_checked_against_the_buffer() {
        let m = generate_with(SHAPES, &all_rules(), &options(true)).unwrap();
        assert!(m
            .text()
            .contains("let buffer_length = ::cbridge_runtime::buffer::written_within(\"dpiRead\", buffer_length, buffer.len())?;"));
    }

    #[test]
    fn enumerations() {
        let m = generate();
        let text = m.text();
        assert!(text.contains("pub struct Mode: ::std::os::raw::c_uint {"));
        assert!(text.contains("const READWRITE = 3;"));
        assert!(text.contains("pub struct CreateMode: u32 {"));
        assert!(text.contains("const THREADED = 1;"));
        assert!(text.contains("pub enum Purity {"));
        assert!(text.contains("Self_ = 2,"));
        assert!(text.contains("let mode = Mode::from_bits_retain(mode);"));
        assert!(text.contains("<Purity as ::cbridge_runtime::ConstifiedEnum>::try_from_raw(purity)?;"));
        assert_eq!(m.entry("DPI_MODE_CREATE_EVENTS").unwrap().item.as_deref(), Some("CreateMode::EVENTS"));
    }

    #[test]
    fn constants_and_variables() {
        let m = generate();
        assert!(m.text().contains("pub const DPI_FAILURE: ::std::os::raw::c_int = -1;"));
        assert!(m.text().contains("pub const FAILURE: ::std::os::raw::c_int = raw::DPI_FAILURE;"));
        assert!(m.text().contains("pub fn version() -> ::std::os::raw::c_int {"));
        assert!(m.text().contains("pub static mut dpiDebugLevel: ::std::os::raw::c_int;"));
        assert_eq!(m.entry("dpiDebugLevel").unwrap().surface, Surface::Unsafe);
    }

    #[test]
    fn unmappable_symbols_are_listed() {
        let m = generate();
        assert!(m.text().contains("pub use super::raw::dpiConn_trace;"));
        assert!(m.text().contains("(\"dpiConn_trace\", \"function\", \"variadic function\"),"));
        assert!(m.text().contains("pub fn dpiConn_trace(conn: *mut dpiConn, fmt: *const ::std::os::raw::c_char, ...) -> ::std::os::raw::c_int;"));
        let reasons: Vec<_> = m.unmappable().iter().map(|u| u.symbol.as_str()).collect();
        assert_eq!(reasons, vec!["dpiConn_trace", "dpiContext_get", "dpiDebugLevel"]);
    }

    #[test]
    fn output_is_total_over_selection() {
        let m = generate();
        let cat = Catalog::parse_str("dpi.h", HEADER, &HeaderOptions::new()).unwrap();
        let rules = all_rules();
        let sel = select(&cat, &rules);
        let symbols: Vec<&str> = m.entries().iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, sel.names());
    }

    #[test]
    fn regeneration_is_byte_identical() {
        assert_eq!(generate().text(), generate().text());
    }

    #[test]
    fn header_and_link() {
        let m = generate();
        assert!(m.text().starts_with("// @generated by cbridge"));
        assert!(m.text().contains(&format!("// Input digest: sha256:{}", "00".repeat(32))));
        assert!(m.text().contains("#[link(name = \"odpic\")]"));
        assert!(m.text().contains("pub static LIBRARY: ::cbridge_runtime::Library = ::cbridge_runtime::Library::new(\"dpi\");"));
    }

    #[test]
    fn normalization_off_keeps_c_names() {
        let m = generate_with(HEADER, &all_rules(), &options(false)).unwrap();
        assert!(m.text().contains("#[allow(non_snake_case)]\npub fn dpiConnGetStmtCacheSize(conn: &impl"));
        assert!(m.text().contains("pub type dpiConn = ::cbridge_runtime::Owned<raw::dpiConn>;"));
    }

    #[test]
    fn colliding_names_are_configuration_errors() {
        let header = "int dpiConn_ping(void);\nint dpiConnPing(void);\n";
        let err = generate_with(
            header,
            &[SelectionRule::new(SymbolKind::Function, "dpi").unwrap()],
            &options(true),
        )
        .unwrap_err();
        assert!(matches!(err, GenError::Configuration { ref symbol, .. } if symbol == "dpiConnPing"));
    }

    #[test]
    fn write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.rs");
        std::fs::write(&path, "stale").unwrap();
        let m = generate();
        m.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), m.text());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
