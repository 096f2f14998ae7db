//! Safe enumeration support.
//!
//! Constified enumerations are closed Rust enums that reject integers
//! outside their declared set. Bitfield enumerations are `bitflags` types;
//! undeclared bits are kept and reported by [`bitflags::Flags`].

use crate::error::{Error, Result};

/// A closed enumeration generated from a C enum or constant group.
pub trait ConstifiedEnum: Sized + Copy + 'static {
    /// Native integer representation.
    type Repr: Copy + TryInto<i128>;

    /// C name of the enumeration.
    const NAME: &'static str;

    /// Every declared value, in declaration order.
    const VARIANTS: &'static [Self];

    /// Convert a native integer, returning `None` for undeclared values.
    fn from_raw(value: Self::Repr) -> Option<Self>;

    fn to_raw(self) -> Self::Repr;

    /// Convert a native integer, reporting undeclared values as an error.
    fn try_from_raw(value: Self::Repr) -> Result<Self> {
        Self::from_raw(value).ok_or_else(|| Error::UnknownValue {
            enumeration: Self::NAME,
            value: value.try_into().unwrap_or(i128::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitflags::Flags;
    use proptest::prelude::*;

    bitflags::bitflags! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        struct Mode: u32 {
            const READ = 1;
            const WRITE = 2;
            const READWRITE = 3;
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    enum Purity {
        Default = 0,
        New = 1,
        Self_ = 2,
    }

    impl ConstifiedEnum for Purity {
        type Repr = u32;
        const NAME: &'static str = "dpiPurity";
        const VARIANTS: &'static [Self] = &[Purity::Default, Purity::New, Purity::Self_];

        fn from_raw(value: u32) -> Option<Self> {
            Self::VARIANTS.iter().copied().find(|v| v.to_raw() == value)
        }

        fn to_raw(self) -> u32 {
            self as u32
        }
    }

    #[test]
    fn readwrite_is_union_of_read_and_write() {
        assert_eq!(Mode::READ | Mode::WRITE, Mode::READWRITE);
        assert!(Mode::READWRITE.contains(Mode::READ));
        assert!(Mode::READWRITE.contains(Mode::WRITE));
        assert_eq!(Mode::READWRITE & Mode::READ, Mode::READ);
    }

    #[test]
    fn unknown_bits_are_preserved() {
        let m = Mode::from_bits_retain(0x10 | 1);
        assert_eq!(m.bits(), 0x11);
        assert_eq!(Flags::unknown_bits(&m), 0x10);
        assert!(Flags::contains_unknown_bits(&m));
        assert!(m.contains(Mode::READ));
        assert_eq!((m | Mode::WRITE).bits(), 0x13);
        assert!(!Flags::contains_unknown_bits(&Mode::READ));
        let names: Vec<&str> = Mode::READWRITE.iter_names().map(|(name, _)| name).collect();
        assert_eq!(names, ["READ", "WRITE"]);
    }

    #[test]
    fn constified_rejects_undeclared_values() {
        assert_eq!(Purity::from_raw(1), Some(Purity::New));
        assert_eq!(Purity::from_raw(7), None);
        assert_eq!(
            Purity::try_from_raw(7),
            Err(Error::UnknownValue {
                enumeration: "dpiPurity",
                value: 7
            })
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_flag_union_round_trips(a in any::<u32>(), b in any::<u32>()) {
            let fa = Mode::from_bits_retain(a);
            let fb = Mode::from_bits_retain(b);
            prop_assert_eq!((fa | fb).bits(), a | b);
            prop_assert_eq!((fa & fb).bits(), a & b);
            prop_assert_eq!(Mode::from_bits_retain((fa | fb).bits()), fa | fb);
        }

        #[test]
        fn prop_constified_bijection(v in 0u32..8) {
            match Purity::from_raw(v) {
                Some(p) => prop_assert_eq!(p.to_raw(), v),
                None => prop_assert!(v > 2),
            }
        }
    }
}
