//! Process-wide lifecycle of a native library.
//!
//! Many C client libraries need a global initialization call before any
//! other function and a final cleanup call. [`Library`] guards both:
//! initialization runs once (repeated calls are no-ops), teardown runs at
//! most once, and nothing can be initialized again after teardown. It also
//! holds the reporter generated wrappers use to turn a failing status into
//! a [`NativeError`].

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, NativeError, Result};

/// Details a library reports for a failing status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorDetails {
    pub code: i64,
    pub message: String,
    pub state: Option<String>,
    pub recoverable: bool,
}

/// Fetches error details after `function` returned `status`.
pub type ErrorReporter = fn(function: &'static str, status: i64) -> ErrorDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    TornDown,
}

/// Lifecycle and error reporting for one native library.
pub struct Library {
    name: &'static str,
    state: Mutex<LifecycleState>,
    reporter: RwLock<Option<ErrorReporter>>,
}

impl Library {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: parking_lot::const_mutex(LifecycleState::Uninitialized),
            reporter: parking_lot::const_rwlock(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Run `init` if the library has not been initialized yet.
    ///
    /// Returns `Ok(true)` when `init` ran, `Ok(false)` when the library was
    /// already initialized. A failing `init` leaves the library
    /// uninitialized so it can be retried.
    pub fn initialize<F>(&self, init: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Initialized => Ok(false),
            LifecycleState::TornDown => Err(Error::TornDown { library: self.name }),
            LifecycleState::Uninitialized => {
                init()?;
                *state = LifecycleState::Initialized;
                tracing::debug!(library = self.name, "initialized");
                Ok(true)
            }
        }
    }

    /// Run `cleanup` once if the library is initialized.
    ///
    /// Returns whether `cleanup` ran. After this call the library can no
    /// longer be initialized.
    pub fn teardown<F>(&self, cleanup: F) -> bool
    where
        F: FnOnce(),
    {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, LifecycleState::TornDown);
        if previous == LifecycleState::Initialized {
            cleanup();
            tracing::debug!(library = self.name, "torn down");
            true
        } else {
            false
        }
    }

    pub fn set_error_reporter(&self, reporter: ErrorReporter) {
        *self.reporter.write() = Some(reporter);
    }

    /// Build the error for a failing `status` returned by `function`.
    pub fn error(&self, function: &'static str, status: i64) -> Error {
        let details = match *self.reporter.read() {
            Some(report) => report(function, status),
            None => ErrorDetails {
                code: status,
                message: format!("{} call failed", self.name),
                ..ErrorDetails::default()
            },
        };
        tracing::debug!(function, status, code = details.code, "native call failed");
        Error::Native(NativeError {
            function,
            status,
            code: details.code,
            message: details.message,
            state: details.state,
            recoverable: details.recoverable,
        })
    }

    /// Map a status to `Ok(())` when it is in `success`, or to the reported
    /// native error otherwise.
    pub fn check(&self, function: &'static str, status: i64, success: &[i64]) -> Result<()> {
        if success.contains(&status) {
            Ok(())
        } else {
            Err(self.error(function, status))
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
