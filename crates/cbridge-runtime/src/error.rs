//! Runtime error types returned by generated wrappers.

/// A native call reported a failure status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{function} failed with status {status}: [{code}] {message}")]
pub struct NativeError {
    /// C function that failed.
    pub function: &'static str,
    /// Raw status value returned by the call.
    pub status: i64,
    /// Library-specific error code.
    pub code: i64,
    pub message: String,
    /// Optional state string (e.g. a SQLSTATE).
    pub state: Option<String>,
    /// Whether the library reports the failure as transient.
    pub recoverable: bool,
}

/// Errors surfaced by generated safe wrappers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The native library returned a failure status.
    #[error(transparent)]
    Native(#[from] NativeError),

    /// A create call succeeded but produced no handle.
    #[error("{function} returned a null {handle} handle")]
    NullHandle {
        function: &'static str,
        handle: &'static str,
    },

    /// An integer outside a constified enumeration's declared values.
    #[error("{value} is not a valid {enumeration} value")]
    UnknownValue {
        enumeration: &'static str,
        value: i128,
    },

    /// A buffer length does not fit the native length parameter.
    #[error("{function}: length {len} does not fit the native length type")]
    LengthOverflow { function: &'static str, len: usize },

    /// A native string is not valid UTF-8.
    #[error("{function}: native string is not valid UTF-8")]
    InvalidUtf8 { function: &'static str },

    /// The library lifecycle has already been torn down.
    #[error("{library} has been torn down")]
    TornDown { library: &'static str },
}

impl Error {
    /// The native error, if this came from a failing status.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::Native(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for generated wrappers.
pub type Result<T> = std::result::Result<T, Error>;
