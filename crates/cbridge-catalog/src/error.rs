//! Header parsing error types.

use std::path::PathBuf;

/// Errors that can occur while building a symbol catalog from a C header.
///
/// All of these are fatal to a generation run.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    /// Malformed or unsupported syntax.
    #[error("{file}:{line}: {detail}")]
    Syntax {
        file: String,
        line: u32,
        detail: String,
    },

    /// A quoted `#include` could not be found on the search path.
    #[error("{file}:{line}: cannot resolve include \"{include}\"")]
    UnresolvedInclude {
        file: String,
        line: u32,
        include: String,
    },

    /// A name was declared twice with different meanings.
    #[error("{file}:{line}: conflicting redeclaration of '{name}'")]
    Conflict {
        file: String,
        line: u32,
        name: String,
    },

    /// An active `#error` directive.
    #[error("{file}:{line}: #error {message}")]
    ErrorDirective {
        file: String,
        line: u32,
        message: String,
    },

    /// Failed to parse a standalone C signature string.
    #[error("invalid C signature: {detail}")]
    InvalidSignature { detail: String },

    /// A header file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, HeaderError>;
