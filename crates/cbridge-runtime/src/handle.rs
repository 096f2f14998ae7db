//! Opaque handle ownership.
//!
//! A native handle is created by exactly one create call and destroyed by
//! exactly one release call. [`Owned`] holds the handle and releases it on
//! drop; [`Borrowed`] is a non-owning view for handles the caller does not
//! own. Neither is `Send` or `Sync` unless the handle type implements
//! [`ThreadMovable`].

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// An opaque native type with a release function.
///
/// # Safety
///
/// `release` must destroy a handle produced by the library's create call
/// and must be safe to call exactly once per handle.
pub unsafe trait NativeResource {
    /// C type name, used in diagnostics.
    const NAME: &'static str;

    /// Destroy the handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live handle owned by the caller; it is invalid afterwards.
    unsafe fn release(ptr: *mut Self);
}

/// Marks a handle type as safe to move between threads.
///
/// # Safety
///
/// The native library must allow the handle to be used from a thread other
/// than the one that created it (never concurrently).
pub unsafe trait ThreadMovable {}

/// An owned native handle, released exactly once when dropped.
pub struct Owned<T: NativeResource> {
    ptr: NonNull<T>,
    _not_send: PhantomData<*mut T>,
}

unsafe impl<T: NativeResource + ThreadMovable> Send for Owned<T> {}

impl<T: NativeResource> Owned<T> {
    /// Take ownership of a handle returned by a create call.
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live handle that nothing else will release.
    pub unsafe fn from_raw(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _not_send: PhantomData,
        })
    }

    /// The raw handle, still owned by `self`.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Give up ownership without releasing.
    pub fn into_raw(self) -> *mut T {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// A non-owning view tied to this handle's lifetime.
    pub fn borrow(&self) -> Borrowed<'_, T> {
        Borrowed {
            ptr: self.ptr,
            _owner: PhantomData,
        }
    }
}

impl<T: NativeResource> Drop for Owned<T> {
    fn drop(&mut self) {
        tracing::trace!(handle = T::NAME, ptr = ?self.ptr, "releasing");
        // SAFETY: `self` owns the handle and this is the only release.
        unsafe { T::release(self.ptr.as_ptr()) }
    }
}

impl<T: NativeResource> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({:p})", T::NAME, self.ptr)
    }
}

/// A handle the caller may use but must not release.
pub struct Borrowed<'a, T> {
    ptr: NonNull<T>,
    _owner: PhantomData<&'a *mut T>,
}

impl<T> Clone for Borrowed<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Borrowed<'_, T> {}

impl<T> Borrowed<'_, T> {
    /// Wrap a handle owned elsewhere (e.g. one the library hands out).
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for the chosen lifetime.
    pub unsafe fn from_raw(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _owner: PhantomData,
        })
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> fmt::Debug for Borrowed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Borrowed({:p})", self.ptr)
    }
}

/// Anything that can lend a live handle to a native call.
pub trait AsHandle<T> {
    fn as_handle_ptr(&self) -> *mut T;
}

impl<T: NativeResource> AsHandle<T> for Owned<T> {
    fn as_handle_ptr(&self) -> *mut T {
        self.as_ptr()
    }
}

impl<T> AsHandle<T> for Borrowed<'_, T> {
    fn as_handle_ptr(&self) -> *mut T {
        self.as_ptr()
    }
}

impl<T, H: AsHandle<T> + ?Sized> AsHandle<T> for &H {
    fn as_handle_ptr(&self) -> *mut T {
        (**self).as_handle_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static RELEASED: Cell<usize> = const { Cell::new(0) };
    }

    struct Fake {
        _value: u32,
    }

    unsafe impl NativeResource for Fake {
        const NAME: &'static str = "Fake";

        unsafe fn release(ptr: *mut Self) {
            drop(Box::from_raw(ptr));
            RELEASED.with(|r| r.set(r.get() + 1));
        }
    }

    fn create() -> Owned<Fake> {
        let raw = Box::into_raw(Box::new(Fake { _value: 7 }));
        unsafe { Owned::from_raw(raw) }.unwrap()
    }

    fn released() -> usize {
        RELEASED.with(Cell::get)
    }

    fn lend(h: &impl AsHandle<Fake>) -> *mut Fake {
        h.as_handle_ptr()
    }

    #[test]
    fn drop_releases_once() {
        let before = released();
        {
            let h = create();
            let _view = h.borrow();
        }
        assert_eq!(released(), before + 1);
    }

    #[test]
    fn into_raw_skips_release() {
        let before = released();
        let raw = create().into_raw();
        assert_eq!(released(), before);
        drop(unsafe { Owned::from_raw(raw) });
        assert_eq!(released(), before + 1);
    }

    #[test]
    fn null_is_rejected() {
        assert!(unsafe { Owned::<Fake>::from_raw(std::ptr::null_mut()) }.is_none());
        assert!(unsafe { Borrowed::<Fake>::from_raw(std::ptr::null_mut()) }.is_none());
    }

    #[test]
    fn owned_and_borrowed_lend_the_same_pointer() {
        let h = create();
        let view = h.borrow();
        assert_eq!(lend(&h), h.as_ptr());
        assert_eq!(lend(&view), h.as_ptr());
        assert!(format!("{h:?}").starts_with("Owned<Fake>"));
    }
}
