//! The symbol catalog: every declaration parsed from a header, unique by name,
//! in declaration order.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ctype::{CSignature, CType};
use crate::error::Result;
use crate::parser;
use crate::preprocess::{self, HeaderOptions, SourceFile};

/// Kind of a native symbol, as used by selection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Type,
    Function,
    Constant,
    Variable,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 4] = [
        SymbolKind::Type,
        SymbolKind::Function,
        SymbolKind::Constant,
        SymbolKind::Variable,
    ];

    /// Parse a kind from its lowercase name; `var` is accepted for variables.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "type" => Some(SymbolKind::Type),
            "function" => Some(SymbolKind::Function),
            "constant" => Some(SymbolKind::Constant),
            "variable" | "var" => Some(SymbolKind::Variable),
            _ => None,
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Type => write!(f, "type"),
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Constant => write!(f, "constant"),
            SymbolKind::Variable => write!(f, "variable"),
        }
    }
}

/// Where a symbol was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A struct or union field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub ty: CType,
    /// Width of a bit-field member.
    pub bit_width: Option<u32>,
}

/// A struct or union definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructDecl {
    pub is_union: bool,
    pub fields: Vec<Field>,
}

impl StructDecl {
    pub fn has_bit_fields(&self) -> bool {
        self.fields.iter().any(|f| f.bit_width.is_some())
    }

    pub fn has_fn_pointers(&self) -> bool {
        self.fields.iter().any(|f| f.ty.is_fn_pointer())
    }
}

/// A C enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enumerator {
    pub name: String,
    pub value: i128,
}

/// A C `enum` definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumDecl {
    pub enumerators: Vec<Enumerator>,
}

/// An integer constant from a `#define` or an anonymous enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstantDecl {
    pub value: i128,
    /// Type fixed by a leading cast, e.g. `((uint32_t) 4)`.
    pub ty: Option<CType>,
    /// Source expression as written.
    pub expr: String,
}

/// Declaration payload of a native symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Declaration {
    /// Incomplete struct type, only usable through pointers.
    Opaque,
    Struct(StructDecl),
    Enum(EnumDecl),
    Typedef(CType),
    Function(CSignature),
    Constant(ConstantDecl),
    Variable(CType),
}

impl Declaration {
    pub fn kind(&self) -> SymbolKind {
        match self {
            Declaration::Opaque
            | Declaration::Struct(_)
            | Declaration::Enum(_)
            | Declaration::Typedef(_) => SymbolKind::Type,
            Declaration::Function(_) => SymbolKind::Function,
            Declaration::Constant(_) => SymbolKind::Constant,
            Declaration::Variable(_) => SymbolKind::Variable,
        }
    }

    /// Whether two declarations of the same name are compatible.
    pub(crate) fn compatible(&self, other: &Declaration) -> bool {
        match (self, other) {
            (Declaration::Function(a), Declaration::Function(b)) => a.same_shape(b),
            (Declaration::Constant(a), Declaration::Constant(b)) => a.value == b.value && a.ty == b.ty,
            (Declaration::Opaque, Declaration::Struct(_)) | (Declaration::Struct(_), Declaration::Opaque) => true,
            (a, b) => a == b,
        }
    }
}

/// A symbol declared in the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub decl: Declaration,
    pub location: Location,
}

impl NativeSymbol {
    pub fn new(name: impl Into<String>, decl: Declaration, location: Location) -> Self {
        Self {
            name: name.into(),
            kind: decl.kind(),
            decl,
            location,
        }
    }
}

/// All symbols of a header, in declaration order.
#[derive(Debug, Clone)]
pub struct Catalog {
    symbols: Vec<NativeSymbol>,
    index: HashMap<String, usize>,
    sources: Vec<SourceFile>,
}

impl Catalog {
    /// Parse the header at `path` and everything it includes.
    pub fn parse_header(path: &Path, options: &HeaderOptions) -> Result<Self> {
        let pp = preprocess::preprocess_file(path, options)?;
        let symbols = parser::parse(&pp.tokens, &pp.files)?;
        Ok(Self::from_parts(symbols, pp.files))
    }

    /// Parse in-memory header text.
    pub fn parse_str(name: &str, text: &str, options: &HeaderOptions) -> Result<Self> {
        let pp = preprocess::preprocess_str(name, text, options)?;
        let symbols = parser::parse(&pp.tokens, &pp.files)?;
        Ok(Self::from_parts(symbols, pp.files))
    }

    fn from_parts(symbols: Vec<NativeSymbol>, sources: Vec<SourceFile>) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        tracing::debug!(symbols = symbols.len(), files = sources.len(), "catalog built");
        Self {
            symbols,
            index,
            sources,
        }
    }

    pub fn symbols(&self) -> &[NativeSymbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&NativeSymbol> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    /// Position of a symbol in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Files read while parsing, main header first.
    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    pub fn of_kind(&self, kind: SymbolKind) -> impl Iterator<Item = &NativeSymbol> {
        self.symbols.iter().filter(move |s| s.kind == kind)
    }

    /// Follow typedefs until a non-typedef type is reached.
    pub fn resolve<'a>(&'a self, ty: &'a CType) -> &'a CType {
        let mut current = ty;
        for _ in 0..64 {
            let next = match current.strip_const() {
                CType::Named(name) => match self.get(name).map(|s| &s.decl) {
                    Some(Declaration::Typedef(target)) => target,
                    _ => return current,
                },
                _ => return current,
            };
            current = next;
        }
        current
    }

    /// Builtin integer type a name resolves to through typedefs.
    pub fn integer_type(&self, name: &str) -> Option<CType> {
        if let Some(builtin) = CType::builtin_typedef(name) {
            return builtin.is_integer().then_some(builtin);
        }
        let named = CType::Named(name.to_string());
        let resolved = self.resolve(&named).strip_const();
        resolved.is_integer().then(|| resolved.clone())
    }
}
