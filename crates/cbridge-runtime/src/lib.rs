//! Runtime support for cbridge-generated binding modules.
//!
//! Generated modules refer to this crate for handle ownership, status and
//! error translation, enumeration conversions, buffer helpers, and the
//! process-wide library lifecycle.
//!
//! ## Modules
//!
//! - [`handle`]: owned and borrowed opaque handles
//! - [`enums`]: constified and bitfield enumeration support
//! - [`buffer`]: pointer/length conversions
//! - [`library`]: init-once / teardown-once lifecycle and error reporting
//! - [`error`]: runtime error types

pub mod buffer;
pub mod enums;
pub mod error;
pub mod handle;
pub mod library;

pub use enums::ConstifiedEnum;
pub use error::{Error, NativeError, Result};
pub use handle::{AsHandle, Borrowed, NativeResource, Owned, ThreadMovable};
pub use library::{ErrorDetails, ErrorReporter, LifecycleState, Library};

/// Re-exported so generated modules need no direct `bitflags` dependency.
pub use bitflags;
