//! Generation error types.

use std::path::PathBuf;

use cbridge_catalog::HeaderError;

/// Errors that abort a generation run before any output is written.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// The native header could not be parsed.
    #[error("header parse error: {0}")]
    Parse(#[from] HeaderError),

    /// The configuration is inconsistent with the catalog or with itself.
    #[error("configuration error for '{symbol}': {detail}")]
    Configuration { symbol: String, detail: String },

    /// A selection, grouping, or ownership pattern failed to compile.
    #[error("invalid pattern '{pattern}': {detail}")]
    InvalidPattern { pattern: String, detail: String },

    /// The generated module breaks the configured policy.
    #[error("policy violation: {}", violations.join("; "))]
    PolicyViolation { violations: Vec<String> },

    /// TOML parse error in a binding configuration.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Reading the configuration or writing the module failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GenError {
    pub(crate) fn config(symbol: impl Into<String>, detail: impl Into<String>) -> Self {
        GenError::Configuration {
            symbol: symbol.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GenError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, GenError>;
