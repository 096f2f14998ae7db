//! minidb: a small key-value store client built on cbridge.
//!
//! `build.rs` generates [`bindings`] from `include/minidb.h` and
//! `minidb.bind.toml`; [`native`] is an in-process implementation of the C
//! API the generated `raw` declarations link against.

pub mod native;

/// Generated bindings for `minidb.h`.
#[allow(clippy::all, missing_docs)]
pub mod bindings {
    include!(concat!(env!("OUT_DIR"), "/minidb.rs"));
}

use cbridge_runtime::{ErrorDetails, Result};

pub use bindings::{Cursor, Db, Isolation, OpenFlags, Stats};

/// Initialize the library once and route failing statuses through
/// `mdb_getLastError`.
pub fn initialize() -> Result<bool> {
    bindings::LIBRARY.set_error_reporter(last_error);
    bindings::LIBRARY.initialize(bindings::init)
}

/// Shut the library down; returns whether this call did it.
pub fn shutdown() -> bool {
    bindings::LIBRARY.teardown(bindings::shutdown)
}

fn last_error(function: &'static str, status: i64) -> ErrorDetails {
    match bindings::get_last_error() {
        Ok((code, message, recoverable)) => ErrorDetails {
            code: code.into(),
            message,
            state: None,
            recoverable: recoverable != 0,
        },
        Err(e) => {
            tracing::warn!(function, status, error = %e, "could not fetch minidb error details");
            ErrorDetails {
                code: status,
                message: format!("{function} failed"),
                ..ErrorDetails::default()
            }
        }
    }
}

/// All keys of `db`, in key order.
pub fn keys(db: &Db) -> Result<Vec<String>> {
    let cursor = bindings::db_open_cursor(db)?;
    let mut keys = Vec::new();
    loop {
        let (found, key) = bindings::cursor_next(&cursor)?;
        if found == 0 {
            break;
        }
        keys.push(key);
    }
    bindings::cursor_release(cursor)?;
    Ok(keys)
}

/// Read the value of `key`, growing the buffer once if the first read
/// reports it too small.
pub fn get(db: &Db, key: &str) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; 64];
    let len = match bindings::db_get(db, key, &mut buffer) {
        Err(e) if e.native().is_some_and(|n| n.code == i64::from(bindings::ERR_BUFFER_TOO_SMALL)) => {
            buffer.resize(64 * 1024, 0);
            bindings::db_get(db, key, &mut buffer)?
        }
        other => other?,
    };
    buffer.truncate(len);
    Ok(buffer)
}
