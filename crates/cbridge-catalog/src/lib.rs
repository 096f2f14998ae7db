//! C header parsing for cbridge.
//!
//! Builds a [`Catalog`] of every type, function, constant, and variable a
//! header declares, following quoted includes and evaluating conditionals.
//!
//! ## Modules
//!
//! - [`lexer`]: C tokenizer
//! - [`preprocess`]: includes, conditionals, and macro expansion
//! - [`expr`]: integer constant expressions
//! - [`ctype`]: C type model and standalone prototype parser
//! - [`catalog`]: symbol catalog and declaration model

pub mod catalog;
pub mod ctype;
pub mod error;
pub mod expr;
pub mod lexer;
mod parser;
pub mod preprocess;

pub use catalog::{
    Catalog, ConstantDecl, Declaration, EnumDecl, Enumerator, Field, Location, NativeSymbol, StructDecl,
    SymbolKind,
};
pub use ctype::{CParam, CSignature, CType, FnType};
pub use error::HeaderError;
pub use preprocess::{HeaderOptions, SourceFile};
