//! Input digest of a generation run.
//!
//! The digest covers the text of every header file read and the binding
//! configuration with its filesystem paths removed, so the same header and
//! rules produce the same digest wherever they are checked out.

use cbridge_catalog::Catalog;
use sha2::{Digest, Sha256};

use crate::config::BindingConfig;
use crate::error::{GenError, Result};

/// A 32-byte SHA-256 digest.
pub type InputDigest = [u8; 32];

/// Digest the catalog's sources and the path-independent parts of `config`.
pub fn input_digest(catalog: &Catalog, config: &BindingConfig) -> Result<InputDigest> {
    let mut canonical = config.clone();
    canonical.library.header = None;
    canonical.library.include_paths.clear();
    let json = serde_json::to_vec(&canonical).map_err(|e| GenError::config("<config>", e.to_string()))?;

    let mut hasher = Sha256::new();
    for source in catalog.sources() {
        hasher.update((source.contents.len() as u64).to_le_bytes());
        hasher.update(source.contents.as_bytes());
    }
    hasher.update(&json);
    Ok(hasher.finalize().into())
}

/// Format a digest as lowercase hex.
pub fn digest_hex(digest: &InputDigest) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
