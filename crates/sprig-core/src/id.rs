#![forbid(unsafe_code)]

//! Globally unique ids for subscribers and rendered elements.

use std::cell::Cell;
use std::fmt;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Identity of a subscriber (binding, component node) or a rendered element.
///
/// Ids come from a single monotonically increasing counter, so an id handed
/// out later always compares greater. Element ids of children are allocated
/// after their parent's, which is what makes ascending order a valid
/// parent-before-child update order.
///
/// Ids are never reused while the thread lives. An invalid (negative) id
/// cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    /// Wrap a raw id value.
    ///
    /// Intended for tests and for embedders replaying ids produced by
    /// [`Id::next`]; fabricating ids that collide with live ones breaks the
    /// registry's uniqueness guarantee.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Issue a fresh id from the thread-scoped counter.
    #[must_use]
    pub fn next() -> Self {
        NEXT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Self(id)
        })
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let a = Id::next();
        let b = Id::next();
        let c = Id::next();
        assert!(a < b && b < c);
    }

    #[test]
    fn display_uses_hash_prefix() {
        assert_eq!(Id::from_raw(42).to_string(), "#42");
    }
}
