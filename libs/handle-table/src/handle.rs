//! Opaque handle values.
//!
//! A handle is a 64-bit value. The upper 16 bits name the table that issued
//! it, the lower 48 bits are a per-table serial starting at 1. Serials are
//! never reused, so a retired handle can not alias a later object.

use std::fmt;

const SERIAL_BITS: u32 = 48;
const SERIAL_MASK: u64 = (1 << SERIAL_BITS) - 1;

/// Largest serial a table may issue.
pub(crate) const MAX_SERIAL: u64 = SERIAL_MASK;

/// Opaque identifier handed across the API boundary.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Never issued by any table.
    pub const INVALID: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// `true` when the value is structurally a handle some table could have
    /// issued. Says nothing about whether it is still live.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.table_id() != 0 && self.serial() != 0
    }

    /// Id of the issuing table.
    #[inline]
    #[must_use]
    pub const fn table_id(self) -> u16 {
        // Upper 16 bits always fit.
        #[allow(clippy::cast_possible_truncation)]
        let id = (self.0 >> SERIAL_BITS) as u16;
        id
    }

    #[inline]
    #[must_use]
    pub const fn serial(self) -> u64 {
        self.0 & SERIAL_MASK
    }

    pub(crate) const fn compose(table_id: u16, serial: u64) -> Self {
        Self(((table_id as u64) << SERIAL_BITS) | (serial & SERIAL_MASK))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({self})")
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn compose_splits_back_into_parts() {
        let h = Handle::compose(3, 42);
        assert_eq!(h.table_id(), 3);
        assert_eq!(h.serial(), 42);
        assert_eq!(h.as_raw(), 0x0003_0000_0000_002a);
        assert!(h.is_valid());
    }

    #[test]
    fn invalid_handle_is_zero() {
        assert_eq!(Handle::INVALID.as_raw(), 0);
        assert!(!Handle::INVALID.is_valid());
        assert_eq!(Handle::default(), Handle::INVALID);
    }

    #[test]
    fn missing_table_or_serial_is_not_valid() {
        assert!(!Handle::compose(0, 1).is_valid());
        assert!(!Handle::compose(1, 0).is_valid());
    }

    #[test]
    fn serial_is_masked_to_48_bits() {
        let h = Handle::compose(1, MAX_SERIAL);
        assert_eq!(h.serial(), MAX_SERIAL);
        assert_eq!(h.table_id(), 1);
    }

    #[test]
    fn display_is_fixed_width_hex() {
        assert_eq!(Handle::compose(1, 7).to_string(), "0x0001000000000007");
        assert_eq!(format!("{:?}", Handle::INVALID), "Handle(0x0000000000000000)");
    }
}
