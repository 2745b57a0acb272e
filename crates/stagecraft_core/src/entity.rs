//! # Entity References
//!
//! Entities are opaque integer handles. A reference stays unique for as long
//! as it is alive; `0` is reserved as "no entity".

use std::collections::HashSet;
use std::fmt;

use crate::error::{SceneError, SceneResult};

/// Opaque handle identifying a logical record across columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityRef(u32);

impl EntityRef {
    /// The reserved "no entity" reference.
    pub const NIL: Self = Self(0);

    /// Wraps a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Checks if this is the reserved nil reference.
    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Table of live entity references.
///
/// Allocation scans upward from the last issued value, wrapping around and
/// skipping nil and every reference still alive.
#[derive(Debug, Default)]
pub struct EntityTable {
    live: HashSet<EntityRef>,
    next: u32,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table whose scan starts at `next`.
    #[must_use]
    pub fn starting_at(next: u32) -> Self {
        Self {
            live: HashSet::new(),
            next,
        }
    }

    /// Allocates a fresh reference.
    ///
    /// # Errors
    ///
    /// Returns `EntitiesExhausted` when every non-nil value is alive.
    pub fn alloc(&mut self) -> SceneResult<EntityRef> {
        if self.live.len() >= u32::MAX as usize {
            return Err(SceneError::EntitiesExhausted);
        }
        loop {
            let candidate = EntityRef(self.next);
            self.next = self.next.wrapping_add(1);
            if !candidate.is_nil() && !self.live.contains(&candidate) {
                self.live.insert(candidate);
                return Ok(candidate);
            }
        }
    }

    /// Frees a reference. Returns false if it was not alive.
    pub fn free(&mut self, entity: EntityRef) -> bool {
        self.live.remove(&entity)
    }

    /// Checks if a reference is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, entity: EntityRef) -> bool {
        self.live.contains(&entity)
    }

    /// Number of live references.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if no reference is alive.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_never_returns_nil() {
        let mut table = EntityTable::new();
        let first = table.alloc().unwrap();
        assert!(!first.is_nil());
        assert_eq!(first.raw(), 1);
    }

    #[test]
    fn test_alloc_unique_without_delete() {
        let mut table = EntityTable::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(table.alloc().unwrap()));
        }
        assert_eq!(table.len(), 10_000);
    }

    #[test]
    fn test_alloc_wraps_and_skips_live() {
        let mut table = EntityTable::starting_at(u32::MAX - 1);
        let a = table.alloc().unwrap();
        let b = table.alloc().unwrap();
        assert_eq!(a.raw(), u32::MAX - 1);
        assert_eq!(b.raw(), u32::MAX);

        // Wrapped: 0 is skipped.
        let c = table.alloc().unwrap();
        assert_eq!(c.raw(), 1);

        // Free and re-scan from the top: live values are skipped.
        let mut table = EntityTable::starting_at(1);
        let one = table.alloc().unwrap();
        let two = table.alloc().unwrap();
        assert!(table.free(one));
        table.next = 1;
        let again = table.alloc().unwrap();
        assert_eq!(again, one);
        let three = table.alloc().unwrap();
        assert_ne!(three, two);
        assert_eq!(three.raw(), 3);
    }

    #[test]
    fn test_free_unknown() {
        let mut table = EntityTable::new();
        assert!(!table.free(EntityRef::from_raw(42)));
        assert!(!table.is_alive(EntityRef::NIL));
    }
}
