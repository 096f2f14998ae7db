//! Signature mapping: C declarations to safe Rust shapes.
//!
//! [`TypeScope`] knows which C types the generated module declares and
//! renders C types as Rust types. [`TypeScope::map_function`] turns a C
//! prototype into a [`FunctionPlan`]: one [`ParamMapping`] per C parameter and
//! one [`ReturnMapping`]. Constructs without a safe shape come back as an
//! [`UnmappableReason`] and the symbol is routed to the unsafe surface.

use std::collections::HashSet;

use cbridge_catalog::{Catalog, CParam, CSignature, CType, Declaration, FnType, SymbolKind};
use serde::Serialize;

use crate::classify::{enum_underlying, Classification};
use crate::ownership::{OwnershipDecision, OwnershipRole, HandleTable};
use crate::pattern::{matches_any, Pattern};
use crate::select::Selection;

const C_VOID: &str = "::std::os::raw::c_void";

/// Why a symbol has no safe mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum UnmappableReason {
    Variadic,
    FunctionPointer,
    /// A struct holding function pointers, typically a callback registration.
    CallbackStruct(String),
    BitFields(String),
    Union(String),
    UnsupportedPointer(String),
    ReturnedPointer(String),
    /// A `T**` out-parameter of a function that does not create handles.
    BorrowedOutHandle(String),
    HandleWithoutRelease(String),
    UnselectedType(String),
    LongDouble,
    PointerAlias,
    RawEnumeration,
    MutableGlobal,
}

impl std::fmt::Display for UnmappableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variadic => write!(f, "variadic function"),
            Self::FunctionPointer => write!(f, "uses a function pointer"),
            Self::CallbackStruct(s) => write!(f, "struct `{s}` holds function pointers"),
            Self::BitFields(s) => write!(f, "struct `{s}` has bit-fields"),
            Self::Union(s) => write!(f, "`{s}` is a union"),
            Self::UnsupportedPointer(what) => write!(f, "no safe mapping for pointer {what}"),
            Self::ReturnedPointer(ty) => write!(f, "returns pointer `{ty}`"),
            Self::BorrowedOutHandle(h) => write!(f, "hands out a `{h}` it does not create"),
            Self::HandleWithoutRelease(h) => write!(f, "creates `{h}`, which has no release function"),
            Self::UnselectedType(t) => write!(f, "uses unselected type `{t}`"),
            Self::LongDouble => write!(f, "uses `long double`"),
            Self::PointerAlias => write!(f, "pointer typedef"),
            Self::RawEnumeration => write!(f, "enumeration without a safe representation"),
            Self::MutableGlobal => write!(f, "mutable global variable"),
        }
    }
}

/// A selected symbol routed to the unsafe surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unmappable {
    pub symbol: String,
    pub kind: SymbolKind,
    pub reason: UnmappableReason,
    /// Whether `raw` declares it; some dependencies cannot be spelled at all.
    pub declared: bool,
}

/// Which functions return a status code and what counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRule {
    /// Return type as written, e.g. `int`.
    pub ty: String,
    pub success: Vec<i64>,
    pub functions: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
}

impl StatusRule {
    pub fn applies(&self, sig: &CSignature) -> bool {
        sig.return_type.to_string() == self.ty
            && matches_any(&self.functions, &sig.name)
            && !matches_any(&self.exclude, &sig.name)
    }
}

/// A value passed or returned by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueKind {
    /// Integer, float, or bool, as the C type is spelled.
    Scalar(CType),
    /// Enumeration with a safe representation.
    Enum(String),
    /// Plain `#[repr(C)]` struct.
    Struct(String),
}

/// Safe shape of one C parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParamMapping {
    /// `T*` → `&impl AsHandle<T>`.
    BorrowHandle(String),
    /// `T*` of the function that releases `T` → `Owned<T>`.
    ConsumeHandle(String),
    /// `T**` → returned `Owned<T>`.
    CreateHandle(String),
    /// `const char*` + length → `&str`.
    Str { length: usize },
    /// `const void*` + length → `&[u8]`.
    Bytes { length: usize },
    /// `const char*` → `&CStr`.
    CStr,
    /// Writable buffer + capacity → `&mut [u8]`; with a length pointer the
    /// written length is returned.
    OutBuffer { length: usize, by_pointer: bool },
    /// `const char**` + length pointer → returned `String`.
    OutString { length: usize },
    /// Companion length of parameter `of`, filled in automatically.
    Length { of: usize },
    Value(ValueKind),
    /// Non-const pointer to a value → returned value.
    Out(ValueKind),
    /// Pointer to a plain struct → `&S` or `&mut S`.
    StructRef { name: String, mutable: bool },
}

/// Safe shape of a C return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReturnMapping {
    Void,
    /// Status code checked against the success set.
    Status { success: Vec<i64> },
    Value(ValueKind),
    /// Returned pointer of a create function → `Owned<T>`.
    CreatedHandle(String),
}

/// The safe mapping of one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionPlan {
    pub params: Vec<ParamMapping>,
    pub ret: ReturnMapping,
}

/// Types declared by the generated module and how to spell them.
#[derive(Debug)]
pub struct TypeScope<'a> {
    catalog: &'a Catalog,
    handles: &'a HandleTable,
    classification: &'a Classification,
    selected: HashSet<&'a str>,
    declared: HashSet<&'a str>,
    plain: HashSet<&'a str>,
}

impl<'a> TypeScope<'a> {
    pub fn new(
        catalog: &'a Catalog,
        selection: &Selection<'a>,
        handles: &'a HandleTable,
        classification: &'a Classification,
    ) -> Self {
        let mut scope = Self {
            catalog,
            handles,
            classification,
            selected: selection.of_kind(SymbolKind::Type).map(|s| s.name.as_str()).collect(),
            declared: HashSet::new(),
            plain: HashSet::new(),
        };
        scope.compute_declared(selection);
        scope.compute_plain(selection);
        scope
    }

    /// Whether `raw` declares the type `name`.
    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    /// Whether `name` is a struct usable from the safe surface.
    pub fn is_plain(&self, name: &str) -> bool {
        self.plain.contains(name)
    }

    pub fn handles(&self) -> &HandleTable {
        self.handles
    }

    fn compute_declared(&mut self, selection: &Selection<'a>) {
        let mut pending = Vec::new();
        for symbol in selection.of_kind(SymbolKind::Type) {
            match &symbol.decl {
                Declaration::Opaque | Declaration::Enum(_) => {
                    self.declared.insert(symbol.name.as_str());
                }
                Declaration::Struct(s) if !s.has_bit_fields() => pending.push(symbol),
                Declaration::Typedef(_) => pending.push(symbol),
                _ => {}
            }
        }
        loop {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|symbol| match &symbol.decl {
                Declaration::Struct(s) => s.fields.iter().all(|f| self.by_value_ok(&f.ty)),
                Declaration::Typedef(t) => self.by_value_ok(t),
                _ => false,
            });
            if ready.is_empty() {
                break;
            }
            self.declared.extend(ready.iter().map(|s| s.name.as_str()));
            pending = waiting;
        }
    }

    fn compute_plain(&mut self, selection: &Selection<'a>) {
        for symbol in selection.of_kind(SymbolKind::Type) {
            if let Declaration::Struct(s) = &symbol.decl {
                if self.declared.contains(symbol.name.as_str()) && !s.is_union && !s.has_fn_pointers() {
                    self.plain.insert(symbol.name.as_str());
                }
            }
        }
        loop {
            let demoted: Vec<&'a str> = self
                .plain
                .iter()
                .copied()
                .filter(|name| match self.catalog.get(name).map(|s| &s.decl) {
                    Some(Declaration::Struct(s)) => s.fields.iter().any(|f| !self.field_plain(&f.ty)),
                    _ => true,
                })
                .collect();
            if demoted.is_empty() {
                break;
            }
            for name in demoted {
                self.plain.remove(name);
            }
        }
    }

    fn field_plain(&self, ty: &CType) -> bool {
        match ty.strip_const() {
            CType::Array(inner, _) => self.field_plain(inner),
            CType::Named(n) => match self.catalog.get(n).map(|s| &s.decl) {
                Some(Declaration::Struct(_)) => self.plain.contains(n.as_str()),
                Some(Declaration::Typedef(t)) => self.field_plain(t),
                _ => true,
            },
            _ => true,
        }
    }

    /// Whether a by-value use of `ty` can be spelled in `raw`.
    fn by_value_ok(&self, ty: &CType) -> bool {
        match ty.strip_const() {
            CType::LongDouble | CType::Function(_) => false,
            CType::Array(inner, _) => self.by_value_ok(inner),
            CType::Pointer(inner) => match inner.strip_const() {
                CType::Function(f) => {
                    f.parameters.iter().all(|p| self.by_value_ok(&p.param_type))
                        && (f.return_type.is_void() || self.by_value_ok(&f.return_type))
                }
                _ => true,
            },
            CType::Named(n) => self.declared.contains(n.as_str()) || self.scalar_fallback(n).is_some(),
            _ => true,
        }
    }

    /// Builtin type an undeclared integer typedef or enum stands for.
    fn scalar_fallback(&self, name: &str) -> Option<CType> {
        let named = CType::Named(name.to_string());
        let resolved = self.catalog.resolve(&named).strip_const();
        if resolved.is_integer() || resolved.is_float() || matches!(resolved, CType::Bool) {
            return Some(resolved.clone());
        }
        let target = resolved.named().unwrap_or(name);
        match self.catalog.get(target).map(|s| &s.decl) {
            Some(Declaration::Enum(e)) => Some(enum_underlying(e.enumerators.iter().map(|e| e.value))),
            _ => None,
        }
    }

    /// Builtin integer type `ty` is carried in, through typedefs and enums.
    pub fn integer_repr(&self, ty: &CType) -> Option<CType> {
        match ty.strip_const() {
            t if t.is_integer() => Some(t.clone()),
            CType::Named(n) => self.scalar_fallback(n).filter(CType::is_integer),
            _ => None,
        }
    }

    /// Rust spelling of `ty`; declared names get `prefix` (`""` inside
    /// `raw`, `"raw::"` outside).
    pub fn rust_type(&self, ty: &CType, prefix: &str) -> Result<String, UnmappableReason> {
        let s = match ty {
            CType::Const(inner) => return self.rust_type(inner, prefix),
            CType::Void => C_VOID,
            CType::Char => "::std::os::raw::c_char",
            CType::SignedChar => "::std::os::raw::c_schar",
            CType::UnsignedChar => "::std::os::raw::c_uchar",
            CType::Short => "::std::os::raw::c_short",
            CType::UnsignedShort => "::std::os::raw::c_ushort",
            CType::Int => "::std::os::raw::c_int",
            CType::UnsignedInt => "::std::os::raw::c_uint",
            CType::Long => "::std::os::raw::c_long",
            CType::UnsignedLong => "::std::os::raw::c_ulong",
            CType::LongLong => "::std::os::raw::c_longlong",
            CType::UnsignedLongLong => "::std::os::raw::c_ulonglong",
            CType::Float => "f32",
            CType::Double => "f64",
            CType::LongDouble => return Err(UnmappableReason::LongDouble),
            CType::Int8 => "i8",
            CType::Int16 => "i16",
            CType::Int32 => "i32",
            CType::Int64 => "i64",
            CType::UInt8 => "u8",
            CType::UInt16 => "u16",
            CType::UInt32 => "u32",
            CType::UInt64 => "u64",
            CType::SizeT | CType::UIntPtr => "usize",
            CType::SSizeT | CType::IntPtr => "isize",
            CType::Bool => "bool",
            CType::Pointer(inner) => return self.pointer_type(inner, prefix),
            CType::Array(inner, len) => return Ok(format!("[{}; {len}]", self.rust_type(inner, prefix)?)),
            CType::Named(name) => {
                if self.declared.contains(name.as_str()) {
                    return Ok(format!("{prefix}{name}"));
                }
                return match self.scalar_fallback(name) {
                    Some(builtin) => self.rust_type(&builtin, prefix),
                    None => Err(UnmappableReason::UnselectedType(name.clone())),
                };
            }
            CType::Function(_) => return Err(UnmappableReason::FunctionPointer),
        };
        Ok(s.to_string())
    }

    fn pointer_type(&self, inner: &CType, prefix: &str) -> Result<String, UnmappableReason> {
        let qualifier = if inner.is_const() { "*const" } else { "*mut" };
        let target = match inner.strip_const() {
            CType::Function(f) => return self.fn_pointer_type(f, prefix),
            CType::Void => C_VOID.to_string(),
            CType::Named(n) if !self.declared.contains(n.as_str()) && self.scalar_fallback(n).is_none() => {
                C_VOID.to_string()
            }
            other => self.rust_type(other, prefix)?,
        };
        Ok(format!("{qualifier} {target}"))
    }

    fn fn_pointer_type(&self, f: &FnType, prefix: &str) -> Result<String, UnmappableReason> {
        let mut params = f
            .parameters
            .iter()
            .map(|p| self.rust_type(&p.param_type, prefix))
            .collect::<Result<Vec<_>, _>>()?;
        if f.is_variadic {
            params.push("...".to_string());
        }
        let ret = self.return_type(&f.return_type, prefix)?;
        Ok(format!(
            "::std::option::Option<unsafe extern \"C\" fn({}){}>",
            params.join(", "),
            ret.map(|r| format!(" -> {r}")).unwrap_or_default()
        ))
    }

    /// Rust return type, `None` for `void`.
    pub fn return_type(&self, ty: &CType, prefix: &str) -> Result<Option<String>, UnmappableReason> {
        if ty.is_void() {
            return Ok(None);
        }
        self.rust_type(ty, prefix).map(Some)
    }

    /// Whether the raw `extern` declaration of `sig` can be spelled.
    pub fn raw_signature(&self, sig: &CSignature) -> Result<(), UnmappableReason> {
        for p in &sig.parameters {
            self.rust_type(&p.param_type, "")?;
        }
        self.return_type(&sig.return_type, "")?;
        Ok(())
    }

    /// Classify a by-value use of `ty`.
    pub fn value_kind(&self, ty: &CType) -> Result<ValueKind, UnmappableReason> {
        let mut current = ty.strip_const();
        while let CType::Named(name) = current {
            if let Some(m) = self.classification.get(name) {
                return if m.representation.is_safe() {
                    Ok(ValueKind::Enum(name.clone()))
                } else {
                    Err(UnmappableReason::RawEnumeration)
                };
            }
            match self.catalog.get(name).map(|s| &s.decl) {
                Some(Declaration::Typedef(target)) => current = target.strip_const(),
                Some(Declaration::Enum(_)) => {
                    return Err(if self.selected.contains(name.as_str()) {
                        UnmappableReason::RawEnumeration
                    } else {
                        UnmappableReason::UnselectedType(name.clone())
                    });
                }
                Some(Declaration::Struct(_)) => {
                    return if self.plain.contains(name.as_str()) {
                        Ok(ValueKind::Struct(name.clone()))
                    } else {
                        Err(self.struct_reason(name))
                    };
                }
                Some(Declaration::Opaque) => {
                    return Err(if self.handles.contains(name) {
                        UnmappableReason::UnsupportedPointer(format!("to `{name}` by value"))
                    } else {
                        UnmappableReason::UnselectedType(name.clone())
                    });
                }
                _ => break,
            }
        }
        match current {
            CType::Function(_) => Err(UnmappableReason::FunctionPointer),
            CType::Pointer(_) | CType::Array(..) => Err(UnmappableReason::UnsupportedPointer(format!("`{ty}`"))),
            _ => {
                self.rust_type(ty, "")?;
                Ok(ValueKind::Scalar(ty.strip_const().clone()))
            }
        }
    }

    /// Why the struct `name` is not usable from the safe surface.
    pub fn struct_reason(&self, name: &str) -> UnmappableReason {
        let Some(Declaration::Struct(s)) = self.catalog.get(name).map(|s| &s.decl) else {
            return UnmappableReason::UnselectedType(name.to_string());
        };
        if !self.selected.contains(name) {
            return UnmappableReason::UnselectedType(name.to_string());
        }
        if s.is_union {
            return UnmappableReason::Union(name.to_string());
        }
        if s.has_bit_fields() {
            return UnmappableReason::BitFields(name.to_string());
        }
        if s.has_fn_pointers() {
            return UnmappableReason::CallbackStruct(name.to_string());
        }
        if let Some(dep) = s.fields.iter().find_map(|f| self.by_value_dependency(&f.ty)) {
            return match self.catalog.get(&dep).map(|d| &d.decl) {
                Some(Declaration::Struct(_)) if self.declared.contains(dep.as_str()) => self.struct_reason(&dep),
                _ => UnmappableReason::UnselectedType(dep),
            };
        }
        UnmappableReason::UnselectedType(name.to_string())
    }

    /// First by-value field type that keeps a struct out of the safe surface.
    fn by_value_dependency(&self, ty: &CType) -> Option<String> {
        match ty.strip_const() {
            CType::Array(inner, _) => self.by_value_dependency(inner),
            CType::Named(n) => {
                let blocked = match self.catalog.get(n).map(|s| &s.decl) {
                    Some(Declaration::Struct(_)) => !self.plain.contains(n.as_str()),
                    Some(Declaration::Typedef(t)) => return self.by_value_dependency(t),
                    _ => !self.by_value_ok(ty),
                };
                blocked.then(|| n.clone())
            }
            _ => None,
        }
    }

    /// Map a function with a known ownership decision.
    pub fn map_function(
        &self,
        sig: &CSignature,
        ownership: &OwnershipDecision,
        status: Option<&StatusRule>,
    ) -> Result<FunctionPlan, UnmappableReason> {
        if sig.is_variadic {
            return Err(UnmappableReason::Variadic);
        }
        self.raw_signature(sig)?;

        let params = &sig.parameters;
        let mut mapped: Vec<Option<ParamMapping>> = vec![None; params.len()];
        let companions = self.companions(params);
        for (buffer, companion) in companions.iter().enumerate() {
            if let Some((length, _)) = companion {
                mapped[*length] = Some(ParamMapping::Length { of: buffer });
            }
        }

        for (i, param) in params.iter().enumerate() {
            if mapped[i].is_some() {
                continue;
            }
            let companion = companions[i];
            let mapping = match param.param_type.pointee() {
                Some(pointee) => self.map_pointer(sig, i, param, pointee, companion, ownership)?,
                None => ParamMapping::Value(self.value_kind(&param.param_type)?),
            };
            mapped[i] = Some(mapping);
        }

        let ret = self.map_return(sig, ownership, status)?;
        Ok(FunctionPlan {
            params: mapped.into_iter().flatten().collect(),
            ret,
        })
    }

    /// For each buffer parameter, the index of its companion length and
    /// whether that length is passed by pointer.
    fn companions(&self, params: &[CParam]) -> Vec<Option<(usize, bool)>> {
        let mut taken = HashSet::new();
        params
            .iter()
            .map(|p| {
                let pointee = p.param_type.pointee()?;
                let buffer = pointee.is_byte_like() || pointee.pointee().is_some_and(CType::is_char);
                if !buffer || p.name.is_empty() {
                    return None;
                }
                let candidates = companion_names(&p.name);
                let (j, by_pointer) = params.iter().enumerate().find_map(|(j, q)| {
                    if taken.contains(&j) || !candidates.contains(&q.name) {
                        return None;
                    }
                    let (len_ty, by_pointer) = match q.param_type.pointee() {
                        Some(inner) if !inner.is_const() => (inner, true),
                        Some(_) => return None,
                        None => (&q.param_type, false),
                    };
                    self.is_integer(len_ty).then_some((j, by_pointer))
                })?;
                taken.insert(j);
                Some((j, by_pointer))
            })
            .collect()
    }

    fn is_integer(&self, ty: &CType) -> bool {
        self.catalog.resolve(ty).strip_const().is_integer()
    }

    fn map_pointer(
        &self,
        sig: &CSignature,
        index: usize,
        param: &CParam,
        pointee: &CType,
        companion: Option<(usize, bool)>,
        ownership: &OwnershipDecision,
    ) -> Result<ParamMapping, UnmappableReason> {
        let is_const = pointee.is_const();
        let inner = pointee.strip_const();
        let unsupported = || UnmappableReason::UnsupportedPointer(format!("`{} {}`", param.param_type, param.name));

        match inner {
            CType::Function(_) => Err(UnmappableReason::FunctionPointer),
            CType::Named(h) if self.handles.contains(h) => {
                let released = self.handles.released_by(&sig.name).is_some_and(|r| &r.name == h);
                if index == 0 && ownership.role == OwnershipRole::Release && released {
                    Ok(ParamMapping::ConsumeHandle(h.clone()))
                } else {
                    Ok(ParamMapping::BorrowHandle(h.clone()))
                }
            }
            CType::Pointer(target) => match target.strip_const() {
                CType::Named(h) if self.handles.contains(h) && !is_const => {
                    if !ownership.role.produces() {
                        return Err(UnmappableReason::BorrowedOutHandle(h.clone()));
                    }
                    if !self.handles.get(h).is_some_and(|info| info.is_owned()) {
                        return Err(UnmappableReason::HandleWithoutRelease(h.clone()));
                    }
                    Ok(ParamMapping::CreateHandle(h.clone()))
                }
                t if t.is_char() && !is_const => match companion {
                    Some((length, true)) => Ok(ParamMapping::OutString { length }),
                    _ => Err(unsupported()),
                },
                _ => Err(unsupported()),
            },
            b if b.is_byte_like() => match (is_const, companion) {
                (true, Some((length, false))) if b.is_char() => Ok(ParamMapping::Str { length }),
                (true, Some((length, false))) => Ok(ParamMapping::Bytes { length }),
                (true, None) if b.is_char() => Ok(ParamMapping::CStr),
                (false, Some((length, by_pointer))) => Ok(ParamMapping::OutBuffer { length, by_pointer }),
                (false, None) if matches!(b, CType::UInt8 | CType::Int8) => {
                    Ok(ParamMapping::Out(ValueKind::Scalar(b.clone())))
                }
                _ => Err(unsupported()),
            },
            _ => match self.value_kind(pointee)? {
                ValueKind::Struct(name) => Ok(ParamMapping::StructRef {
                    name,
                    mutable: !is_const,
                }),
                kind if !is_const => Ok(ParamMapping::Out(kind)),
                _ => Err(unsupported()),
            },
        }
    }

    fn map_return(
        &self,
        sig: &CSignature,
        ownership: &OwnershipDecision,
        status: Option<&StatusRule>,
    ) -> Result<ReturnMapping, UnmappableReason> {
        let ret = &sig.return_type;
        if ret.is_void() {
            return Ok(ReturnMapping::Void);
        }
        if let Some(rule) = status.filter(|rule| rule.applies(sig)) {
            return Ok(ReturnMapping::Status {
                success: rule.success.clone(),
            });
        }
        if let Some(pointee) = ret.pointee() {
            return match pointee.strip_const() {
                CType::Named(h) if self.handles.contains(h) && ownership.role.produces() => {
                    if self.handles.get(h).is_some_and(|info| info.is_owned()) {
                        Ok(ReturnMapping::CreatedHandle(h.clone()))
                    } else {
                        Err(UnmappableReason::HandleWithoutRelease(h.clone()))
                    }
                }
                _ => Err(UnmappableReason::ReturnedPointer(ret.to_string())),
            };
        }
        Ok(ReturnMapping::Value(self.value_kind(ret)?))
    }
}

/// Parameter names accepted as the length of buffer `name`.
pub fn companion_names(name: &str) -> [String; 6] {
    [
        format!("{name}Length"),
        format!("{name}Len"),
        format!("{name}_len"),
        format!("{name}_length"),
        format!("{name}Size"),
        format!("{name}_size"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, EnumDirective, Representation};
    use crate::ownership::{HandleSpec, OwnershipRules};
    use crate::select::{select, SelectionRule};
    use cbridge_catalog::HeaderOptions;

    const HEADER: &str = r#"
#include <stdint.h>
typedef struct dpiConn dpiConn;
typedef struct dpiStmt dpiStmt;
typedef struct dpiHidden dpiHidden;
typedef uint32_t dpiCreateMode;
#define DPI_MODE_CREATE_DEFAULT 0
#define DPI_MODE_CREATE_THREADED 1
typedef enum { DPI_PURITY_DEFAULT, DPI_PURITY_NEW, DPI_PURITY_SELF } dpiPurity;
typedef struct { uint16_t versionNum; int32_t fullVersionNum; char tag[8]; } dpiVersionInfo;
typedef struct { void (*callback)(void *context); void *context; } dpiSubscrCreateParams;
typedef union { int64_t asInt64; double asDouble; } dpiDataBuffer;
typedef struct { dpiDataBuffer value; } dpiData;
int dpiConnGetStmtCacheSize(dpiConn *conn, uint32_t *cacheSize);
int dpiConn_create(const char *userName, uint32_t userNameLength, dpiCreateMode mode, dpiConn **conn);
int dpiConn_release(dpiConn *conn);
int dpiConn_prepareStmt(dpiConn *conn, const char *sql, uint32_t sqlLength, const char *tag, dpiStmt **stmt);
int dpiConn_getEdition(dpiConn *conn, const char **value, uint32_t *valueLength);
int dpiConn_getServerVersion(dpiConn *conn, dpiVersionInfo *versionInfo);
int dpiConn_getPurity(dpiConn *conn, dpiPurity *purity);
int dpiConn_read(dpiConn *conn, char *buffer, uint64_t *bufferLength);
int dpiConn_write(dpiConn *conn, const void *data, size_t dataSize);
int dpiConn_hidden(dpiHidden *hidden);
int dpiConn_subscribe(dpiConn *conn, dpiSubscrCreateParams *params);
int dpiConn_trace(dpiConn *conn, const char *fmt, ...);
int dpiConn_getData(dpiConn *conn, dpiData **data);
const char *dpiConn_lastMessage(dpiConn *conn);
uint32_t dpiContext_getClientVersion(void);
int dpiStmt_release(dpiStmt *stmt);
"#;

    struct Fixture {
        catalog: Catalog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalog: Catalog::parse_str("dpi.h", HEADER, &HeaderOptions::new()).unwrap(),
            }
        }
    }

    fn status() -> StatusRule {
        StatusRule {
            ty: "int".into(),
            success: vec![0],
            functions: Pattern::parse_all(&["dpi"]).unwrap(),
            exclude: vec![],
        }
    }

    fn rules() -> OwnershipRules {
        OwnershipRules::new(
            Pattern::parse_all(&["*_create"]).unwrap(),
            Pattern::parse_all(&["*_release"]).unwrap(),
        )
    }

    fn with_scope<R>(f: impl FnOnce(&Catalog, &TypeScope<'_>) -> R) -> R {
        let fx = Fixture::new();
        let cat = &fx.catalog;
        let sel = select(
            cat,
            &[
                SelectionRule::new(SymbolKind::Type, "^dpi(Conn|Stmt|CreateMode|Purity|VersionInfo|SubscrCreateParams|DataBuffer|Data)$").unwrap(),
                SelectionRule::new(SymbolKind::Function, "dpi").unwrap(),
            ],
        );
        let classification = classify(
            cat,
            &sel,
            &[
                EnumDirective::new("dpiCreateMode", Representation::Bitfield)
                    .with_constants("DPI_MODE_CREATE_*")
                    .unwrap(),
                EnumDirective::new("dpiPurity", Representation::Constified),
            ],
            None,
        )
        .unwrap();
        let handles = HandleTable::build(cat, &sel, &rules(), &[] as &[HandleSpec]).unwrap();
        let scope = TypeScope::new(cat, &sel, &handles, &classification);
        f(cat, &scope)
    }

    fn plan(cat: &Catalog, scope: &TypeScope<'_>, name: &str) -> Result<FunctionPlan, UnmappableReason> {
        let Declaration::Function(sig) = &cat.get(name).unwrap().decl else {
            panic!("{name} is not a function");
        };
        let decision = rules().decide(sig, |n| scope.handles().contains(n));
        scope.map_function(sig, &decision, Some(&status()))
    }

    #[test]
    fn stmt_cache_size_borrows_and_returns_value() {
        with_scope(|cat, scope| {
            let p = plan(cat, scope, "dpiConnGetStmtCacheSize").unwrap();
            assert_eq!(
                p.params,
                vec![
                    ParamMapping::BorrowHandle("dpiConn".into()),
                    ParamMapping::Out(ValueKind::Scalar(CType::UInt32)),
                ]
            );
            assert_eq!(p.ret, ReturnMapping::Status { success: vec![0] });
        });
    }

    #[test]
    fn create_threads_string_length_and_returns_handle() {
        with_scope(|cat, scope| {
            let p = plan(cat, scope, "dpiConn_create").unwrap();
            assert_eq!(
                p.params,
                vec![
                    ParamMapping::Str { length: 1 },
                    ParamMapping::Length { of: 0 },
                    ParamMapping::Value(ValueKind::Enum("dpiCreateMode".into())),
                    ParamMapping::CreateHandle("dpiConn".into()),
                ]
            );
        });
    }

    #[test]
    fn release_consumes_handle() {
        with_scope(|cat, scope| {
            let p = plan(cat, scope, "dpiConn_release").unwrap();
            assert_eq!(p.params, vec![ParamMapping::ConsumeHandle("dpiConn".into())]);
        });
    }

    #[test]
    fn positional_create_with_cstr() {
        with_scope(|cat, scope| {
            let p = plan(cat, scope, "dpiConn_prepareStmt").unwrap();
            assert_eq!(
                p.params,
                vec![
                    ParamMapping::BorrowHandle("dpiConn".into()),
                    ParamMapping::Str { length: 2 },
                    ParamMapping::Length { of: 1 },
                    ParamMapping::CStr,
                    ParamMapping::CreateHandle("dpiStmt".into()),
                ]
            );
        });
    }

    #[test]
    fn out_string_out_struct_and_enum() {
        with_scope(|cat, scope| {
            let edition = plan(cat, scope, "dpiConn_getEdition").unwrap();
            assert_eq!(edition.params[1], ParamMapping::OutString { length: 2 });
            assert_eq!(edition.params[2], ParamMapping::Length { of: 1 });

            let version = plan(cat, scope, "dpiConn_getServerVersion").unwrap();
            assert_eq!(
                version.params[1],
                ParamMapping::StructRef {
                    name: "dpiVersionInfo".into(),
                    mutable: true
                }
            );

            let purity = plan(cat, scope, "dpiConn_getPurity").unwrap();
            assert_eq!(purity.params[1], ParamMapping::Out(ValueKind::Enum("dpiPurity".into())));
        });
    }

    #[test]
    fn buffers() {
        with_scope(|cat, scope| {
            let read = plan(cat, scope, "dpiConn_read").unwrap();
            assert_eq!(read.params[1], ParamMapping::OutBuffer { length: 2, by_pointer: true });
            let write = plan(cat, scope, "dpiConn_write").unwrap();
            assert_eq!(write.params[1], ParamMapping::Bytes { length: 2 });
        });
    }

    #[test]
    fn unmappable_constructs() {
        with_scope(|cat, scope| {
            assert_eq!(plan(cat, scope, "dpiConn_trace"), Err(UnmappableReason::Variadic));
            assert_eq!(
                plan(cat, scope, "dpiConn_subscribe"),
                Err(UnmappableReason::CallbackStruct("dpiSubscrCreateParams".into()))
            );
            assert_eq!(
                plan(cat, scope, "dpiConn_hidden"),
                Err(UnmappableReason::UnselectedType("dpiHidden".into()))
            );
            assert_eq!(
                plan(cat, scope, "dpiConn_lastMessage"),
                Err(UnmappableReason::ReturnedPointer("const char*".into()))
            );
            assert!(matches!(plan(cat, scope, "dpiConn_getData"), Err(UnmappableReason::UnsupportedPointer(_))));
        });
    }

    const LEVELS: &str = r#"
typedef enum { LVL_A, LVL_B } lvl;
typedef enum { SHADE_DARK, SHADE_LIGHT } shade;
int f_set(lvl l);
int f_get(lvl *l);
int f_paint(shade s);
shade f_current(void);
"#;

    fn level_plan(name: &str) -> Result<FunctionPlan, UnmappableReason> {
        let cat = Catalog::parse_str("lvl.h", LEVELS, &HeaderOptions::new()).unwrap();
        let sel = select(
            &cat,
            &[
                SelectionRule::new(SymbolKind::Type, "lvl").unwrap(),
                SelectionRule::new(SymbolKind::Function, "f_").unwrap(),
            ],
        );
        let classification = classify(&cat, &sel, &[], None).unwrap();
        let handles = HandleTable::build(&cat, &sel, &rules(), &[] as &[HandleSpec]).unwrap();
        let scope = TypeScope::new(&cat, &sel, &handles, &classification);
        plan(&cat, &scope, name)
    }

    #[test]
    fn raw_enumerations_stay_off_the_safe_surface() {
        assert_eq!(level_plan("f_set"), Err(UnmappableReason::RawEnumeration));
        assert_eq!(level_plan("f_get"), Err(UnmappableReason::RawEnumeration));
    }

    #[test]
    fn unselected_enumerations_are_unmappable() {
        assert_eq!(level_plan("f_paint"), Err(UnmappableReason::UnselectedType("shade".into())));
        assert_eq!(level_plan("f_current"), Err(UnmappableReason::UnselectedType("shade".into())));
    }

    #[test]
    fn plain_value_return_without_status() {
        with_scope(|cat, scope| {
            let p = plan(cat, scope, "dpiContext_getClientVersion").unwrap();
            assert!(p.params.is_empty());
            assert_eq!(p.ret, ReturnMapping::Value(ValueKind::Scalar(CType::UInt32)));
        });
    }

    #[test]
    fn declared_and_plain_types() {
        with_scope(|_, scope| {
            assert!(scope.is_declared("dpiConn"));
            assert!(scope.is_declared("dpiVersionInfo"));
            assert!(scope.is_plain("dpiVersionInfo"));
            assert!(scope.is_declared("dpiSubscrCreateParams"));
            assert!(!scope.is_plain("dpiSubscrCreateParams"));
            assert!(!scope.is_plain("dpiDataBuffer"));
            assert!(!scope.is_plain("dpiData"));
            assert!(!scope.is_declared("dpiHidden"));
            assert_eq!(
                scope.struct_reason("dpiData"),
                UnmappableReason::Union("dpiDataBuffer".into())
            );
        });
    }

    #[test]
    fn rust_type_spelling() {
        with_scope(|_, scope| {
            let ptr = |t: CType| CType::Pointer(Box::new(t));
            let konst = |t: CType| CType::Const(Box::new(t));
            assert_eq!(scope.rust_type(&CType::UInt32, "raw::").unwrap(), "u32");
            assert_eq!(
                scope.rust_type(&ptr(konst(CType::Char)), "").unwrap(),
                "*const ::std::os::raw::c_char"
            );
            assert_eq!(
                scope.rust_type(&ptr(CType::Named("dpiConn".into())), "raw::").unwrap(),
                "*mut raw::dpiConn"
            );
            assert_eq!(
                scope.rust_type(&ptr(CType::Named("dpiHidden".into())), "").unwrap(),
                "*mut ::std::os::raw::c_void"
            );
            assert_eq!(
                scope.rust_type(&CType::Array(Box::new(CType::Char), 8), "").unwrap(),
                "[::std::os::raw::c_char; 8]"
            );
            assert_eq!(scope.rust_type(&CType::LongDouble, ""), Err(UnmappableReason::LongDouble));
        });
    }

    #[test]
    fn status_rule_matching() {
        let rule = StatusRule {
            ty: "int".into(),
            success: vec![0],
            functions: Pattern::parse_all(&["*"]).unwrap(),
            exclude: Pattern::parse_all(&["dpiData_*"]).unwrap(),
        };
        let yes = CSignature::parse("int dpiConn_ping(dpiConn *conn)").unwrap();
        let excluded = CSignature::parse("int dpiData_getInt32(dpiData *data)").unwrap();
        let other_type = CSignature::parse("uint32_t dpiConn_count(dpiConn *conn)").unwrap();
        assert!(rule.applies(&yes));
        assert!(!rule.applies(&excluded));
        assert!(!rule.applies(&other_type));
    }
}
