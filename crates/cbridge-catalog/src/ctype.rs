//! C type model shared by the catalog, the mapper, and the emitter.
//!
//! Integer widths assume an LP64 target: `long` and `unsigned long` are 64
//! bits, `char` is signed.

use serde::Serialize;

use crate::error::{HeaderError, Result};

/// A C type representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CType {
    Void,
    Char,
    SignedChar,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    LongDouble,
    // stdint / stddef types
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    SizeT,
    SSizeT,
    IntPtr,
    UIntPtr,
    Bool,
    /// Pointer to another type.
    Pointer(Box<CType>),
    /// Const-qualified type.
    Const(Box<CType>),
    /// Fixed-size array.
    Array(Box<CType>, u64),
    /// Reference to a catalog symbol (typedef, opaque, struct, union, enum).
    Named(String),
    /// Function type; appears behind a `Pointer` as a function pointer.
    Function(Box<FnType>),
}

/// Signature of a function type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnType {
    pub return_type: CType,
    pub parameters: Vec<CParam>,
    pub is_variadic: bool,
}

impl CType {
    /// Whether this type is void.
    pub fn is_void(&self) -> bool {
        matches!(self.strip_const(), CType::Void)
    }

    /// Strip const qualifiers from outer level.
    pub fn strip_const(&self) -> &CType {
        match self {
            CType::Const(inner) => inner.strip_const(),
            other => other,
        }
    }

    /// Whether the outer level is const-qualified.
    pub fn is_const(&self) -> bool {
        matches!(self, CType::Const(_))
    }

    /// The pointed-to type, if this is a pointer.
    pub fn pointee(&self) -> Option<&CType> {
        match self.strip_const() {
            CType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Name of the referenced catalog symbol, ignoring qualifiers.
    pub fn named(&self) -> Option<&str> {
        match self.strip_const() {
            CType::Named(name) => Some(name),
            _ => None,
        }
    }

    /// Whether this is a pointer to a function.
    pub fn is_fn_pointer(&self) -> bool {
        matches!(self.pointee().map(CType::strip_const), Some(CType::Function(_)))
    }

    /// Width in bits and signedness of a builtin integer type.
    pub fn int_info(&self) -> Option<(u32, bool)> {
        let info = match self.strip_const() {
            CType::Char | CType::SignedChar | CType::Int8 => (8, true),
            CType::UnsignedChar | CType::UInt8 => (8, false),
            CType::Short | CType::Int16 => (16, true),
            CType::UnsignedShort | CType::UInt16 => (16, false),
            CType::Int | CType::Int32 => (32, true),
            CType::UnsignedInt | CType::UInt32 => (32, false),
            CType::Long
            | CType::LongLong
            | CType::Int64
            | CType::SSizeT
            | CType::IntPtr => (64, true),
            CType::UnsignedLong
            | CType::UnsignedLongLong
            | CType::UInt64
            | CType::SizeT
            | CType::UIntPtr => (64, false),
            _ => return None,
        };
        Some(info)
    }

    /// Whether this is a builtin integer type.
    pub fn is_integer(&self) -> bool {
        self.int_info().is_some()
    }

    /// Whether this is a builtin floating point type.
    pub fn is_float(&self) -> bool {
        matches!(
            self.strip_const(),
            CType::Float | CType::Double | CType::LongDouble
        )
    }

    /// Whether this is `char`, `signed char` or `unsigned char`.
    pub fn is_char(&self) -> bool {
        matches!(
            self.strip_const(),
            CType::Char | CType::SignedChar | CType::UnsignedChar
        )
    }

    /// Whether this is a byte-like element type (`char`, `uint8_t`, `void`).
    pub fn is_byte_like(&self) -> bool {
        self.is_char() || self.is_void() || matches!(self.strip_const(), CType::UInt8 | CType::Int8)
    }

    /// Truncate `value` to the width of this integer type, sign-extending
    /// when the type is signed.
    pub fn truncate(&self, value: i128) -> i128 {
        match self.int_info() {
            Some((bits, signed)) => {
                let mask = (1i128 << bits) - 1;
                let v = value & mask;
                if signed && v >> (bits - 1) & 1 == 1 {
                    v - (1i128 << bits)
                } else {
                    v
                }
            }
            None => value,
        }
    }

    /// Builtin type for a well-known typedef name from the standard headers.
    pub fn builtin_typedef(name: &str) -> Option<CType> {
        let ct = match name {
            "int8_t" => CType::Int8,
            "int16_t" => CType::Int16,
            "int32_t" => CType::Int32,
            "int64_t" => CType::Int64,
            "uint8_t" => CType::UInt8,
            "uint16_t" => CType::UInt16,
            "uint32_t" => CType::UInt32,
            "uint64_t" => CType::UInt64,
            "size_t" => CType::SizeT,
            "ssize_t" | "ptrdiff_t" => CType::SSizeT,
            "intptr_t" => CType::IntPtr,
            "uintptr_t" => CType::UIntPtr,
            "bool" | "_Bool" => CType::Bool,
            _ => return None,
        };
        Some(ct)
    }
}

impl std::fmt::Display for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Char => write!(f, "char"),
            CType::SignedChar => write!(f, "signed char"),
            CType::UnsignedChar => write!(f, "unsigned char"),
            CType::Short => write!(f, "short"),
            CType::UnsignedShort => write!(f, "unsigned short"),
            CType::Int => write!(f, "int"),
            CType::UnsignedInt => write!(f, "unsigned int"),
            CType::Long => write!(f, "long"),
            CType::UnsignedLong => write!(f, "unsigned long"),
            CType::LongLong => write!(f, "long long"),
            CType::UnsignedLongLong => write!(f, "unsigned long long"),
            CType::Float => write!(f, "float"),
            CType::Double => write!(f, "double"),
            CType::LongDouble => write!(f, "long double"),
            CType::Int8 => write!(f, "int8_t"),
            CType::Int16 => write!(f, "int16_t"),
            CType::Int32 => write!(f, "int32_t"),
            CType::Int64 => write!(f, "int64_t"),
            CType::UInt8 => write!(f, "uint8_t"),
            CType::UInt16 => write!(f, "uint16_t"),
            CType::UInt32 => write!(f, "uint32_t"),
            CType::UInt64 => write!(f, "uint64_t"),
            CType::SizeT => write!(f, "size_t"),
            CType::SSizeT => write!(f, "ssize_t"),
            CType::IntPtr => write!(f, "intptr_t"),
            CType::UIntPtr => write!(f, "uintptr_t"),
            CType::Bool => write!(f, "_Bool"),
            CType::Pointer(inner) => match inner.strip_const() {
                CType::Function(func) => {
                    write!(f, "{} (*)(", func.return_type)?;
                    write_params(f, &func.parameters, func.is_variadic)?;
                    write!(f, ")")
                }
                _ => write!(f, "{inner}*"),
            },
            CType::Const(inner) => write!(f, "const {inner}"),
            CType::Array(inner, len) => write!(f, "{inner}[{len}]"),
            CType::Named(name) => write!(f, "{name}"),
            CType::Function(func) => {
                write!(f, "{} (", func.return_type)?;
                write_params(f, &func.parameters, func.is_variadic)?;
                write!(f, ")")
            }
        }
    }
}

fn write_params(f: &mut std::fmt::Formatter<'_>, params: &[CParam], variadic: bool) -> std::fmt::Result {
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", param.param_type)?;
        if !param.name.is_empty() {
            write!(f, " {}", param.name)?;
        }
    }
    if variadic {
        if !params.is_empty() {
            write!(f, ", ")?;
        }
        write!(f, "...")?;
    }
    Ok(())
}

/// A parsed C function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CParam {
    /// Parameter type.
    pub param_type: CType,
    /// Parameter name (may be empty if unnamed).
    pub name: String,
}

/// A parsed C function signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CSignature {
    /// Return type.
    pub return_type: CType,
    /// Function name.
    pub name: String,
    /// Parameters (excluding variadic `...`).
    pub parameters: Vec<CParam>,
    /// Whether the function is variadic (`...`).
    pub is_variadic: bool,
}

impl CSignature {
    /// Parse a standalone C prototype.
    ///
    /// Examples:
    /// - `"int dpiConn_ping(dpiConn *conn)"`
    /// - `"int dpiConn_getStmtCacheSize(dpiConn *conn, uint32_t *cacheSize);"`
    /// - `"int printf(const char* fmt, ...)"`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(HeaderError::InvalidSignature {
                detail: "empty signature".to_string(),
            });
        }
        crate::parser::parse_prototype(input)
    }

    /// Whether two prototypes agree on everything but parameter names.
    pub fn same_shape(&self, other: &CSignature) -> bool {
        self.name == other.name
            && self.return_type == other.return_type
            && self.is_variadic == other.is_variadic
            && self.parameters.len() == other.parameters.len()
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(a, b)| a.param_type == b.param_type)
    }
}

impl std::fmt::Display for CSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        write_params(f, &self.parameters, self.is_variadic)?;
        write!(f, ")")
    }
}
