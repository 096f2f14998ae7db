//! Conversions between Rust slices and C pointer/length pairs.

use std::ffi::c_char;

use crate::error::{Error, Result};

/// Integer types a native library uses for buffer lengths.
pub trait LengthType: Copy {
    fn from_len(len: usize) -> Option<Self>;
    fn to_len(self) -> Option<usize>;
}

macro_rules! impl_length_type {
    ($($t:ty),*) => {
        $(
            impl LengthType for $t {
                fn from_len(len: usize) -> Option<Self> {
                    <$t>::try_from(len).ok()
                }

                fn to_len(self) -> Option<usize> {
                    usize::try_from(self).ok()
                }
            }
        )*
    };
}

impl_length_type!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// Convert a Rust length to the native length type of `function`.
pub fn length<L: LengthType>(function: &'static str, len: usize) -> Result<L> {
    L::from_len(len).ok_or(Error::LengthOverflow { function, len })
}

/// Convert a length written back by `function`.
pub fn written<L: LengthType>(function: &'static str, len: L) -> Result<usize> {
    len.to_len().ok_or(Error::LengthOverflow { function, len: usize::MAX })
}

/// Convert a length written back into a buffer of `capacity` bytes.
///
/// Libraries that report the size they needed on truncation can return more
/// than `capacity`; that is an error rather than a length past the buffer.
pub fn written_within<L: LengthType>(function: &'static str, len: L, capacity: usize) -> Result<usize> {
    let len = written(function, len)?;
    if len > capacity {
        return Err(Error::LengthOverflow { function, len });
    }
    Ok(len)
}

/// Copy a native pointer/length string into an owned `String`.
///
/// A null pointer yields an empty string.
///
/// # Safety
///
/// `ptr` must be null or point to `len` readable bytes.
pub unsafe fn string_from_raw(function: &'static str, ptr: *const c_char, len: usize) -> Result<String> {
    if ptr.is_null() || len == 0 {
        return Ok(String::new());
    }
    let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len);
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8 { function })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_conversion() {
        assert_eq!(length::<u32>("f", 10).unwrap(), 10u32);
        assert_eq!(
            length::<u8>("f", 300),
            Err(Error::LengthOverflow { function: "f", len: 300 })
        );
        assert_eq!(written("f", 5u32).unwrap(), 5);
        assert!(written("f", -1i32).is_err());
    }

    #[test]
    fn written_length_is_bounded_by_capacity() {
        assert_eq!(written_within("f", 8u64, 8).unwrap(), 8);
        assert_eq!(written_within("f", 0u32, 8).unwrap(), 0);
        assert_eq!(
            written_within("f", 42u64, 16),
            Err(Error::LengthOverflow { function: "f", len: 42 })
        );
        assert!(written_within("f", -3i32, 16).is_err());
    }

    #[test]
    fn strings_from_pointer_and_length() {
        let text = "dpi-version";
        let s = unsafe { string_from_raw("f", text.as_ptr().cast(), 3) }.unwrap();
        assert_eq!(s, "dpi");
        let empty = unsafe { string_from_raw("f", std::ptr::null(), 4) }.unwrap();
        assert!(empty.is_empty());
        let bad = [0xffu8, 0xfe];
        assert!(unsafe { string_from_raw("f", bad.as_ptr().cast(), 2) }.is_err());
    }
}
