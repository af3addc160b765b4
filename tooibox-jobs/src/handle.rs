// SPDX-License-Identifier: MIT

//! Typed opaque handles.
//!
//! A [`Handle`] is a thin, copyable wrapper around a scalar. The `Tag` type
//! parameter keeps handles for different kinds of objects apart at compile
//! time, so a job handle can never be passed where some other handle is
//! expected. The scalar's default value is reserved as the invalid handle.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub struct Handle<Tag, I = u64> {
    value: I,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag, I: Default + PartialEq> Handle<Tag, I> {
    /// The sentinel handle. It never names a live object.
    pub fn invalid() -> Self {
        Self {
            value: I::default(),
            _tag: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value != I::default()
    }
}

impl<Tag, I> Handle<Tag, I> {
    pub const fn from_raw(value: I) -> Self {
        Self {
            value,
            _tag: PhantomData,
        }
    }
}

impl<Tag, I: Copy> Handle<Tag, I> {
    pub fn into_raw(self) -> I {
        self.value
    }
}

// The impls below are written by hand so that `Tag` does not have to
// implement the traits itself (derives would add `Tag: Trait` bounds).

impl<Tag, I: Default + PartialEq> Default for Handle<Tag, I> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<Tag, I: Copy> Clone for Handle<Tag, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag, I: Copy> Copy for Handle<Tag, I> {}

impl<Tag, I: PartialEq> PartialEq for Handle<Tag, I> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<Tag, I: Eq> Eq for Handle<Tag, I> {}

impl<Tag, I: PartialOrd> PartialOrd for Handle<Tag, I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<Tag, I: Ord> Ord for Handle<Tag, I> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<Tag, I: Hash> Hash for Handle<Tag, I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<Tag, I: fmt::Debug> fmt::Debug for Handle<Tag, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:?})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Apples;
    type AppleHandle = Handle<Apples, u64>;

    #[test]
    fn test_default_is_invalid() {
        let h = AppleHandle::default();
        assert_eq!(h, AppleHandle::invalid());
        assert!(!h.is_valid());
        assert!(AppleHandle::from_raw(7).is_valid());
    }

    #[test]
    fn test_raw_value_survives_conversion() {
        let h = AppleHandle::from_raw(42);
        assert_eq!(h.into_raw(), 42);
    }

    #[test]
    fn test_comparison_follows_raw_value() {
        let a = AppleHandle::from_raw(1);
        let b = AppleHandle::from_raw(2);
        assert!(a < b);
        assert!(b > a);
        assert_ne!(a, b);
        assert_eq!(a, AppleHandle::from_raw(1));
    }

    #[test]
    fn test_usable_as_set_key() {
        let mut set = HashSet::new();
        set.insert(AppleHandle::from_raw(3));
        set.insert(AppleHandle::from_raw(3));
        set.insert(AppleHandle::from_raw(4));
        assert_eq!(set.len(), 2);
    }
}
