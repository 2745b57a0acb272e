//! # Column System
//!
//! A column maps entity references to values of exactly one type. A world
//! holds at most one column per column type and per value type.
//!
//! Columns are plain data. Subsystems receive private copies of the columns
//! they require, so every column must be `Clone`.
//!
//! ## Example
//!
//! ```rust,ignore
//! #[derive(Clone, Default)]
//! struct Names(MapColumn<String>);
//!
//! impl Column for Names {
//!     type Value = String;
//!     fn add(&mut self, e: EntityRef, v: String) { self.0.add(e, v) }
//!     fn del(&mut self, e: EntityRef) -> Option<String> { self.0.del(e) }
//!     fn get(&self, e: EntityRef) -> Option<&String> { self.0.get(e) }
//!     fn put(&mut self, e: EntityRef, v: String) -> bool { self.0.put(e, v) }
//!     fn len(&self) -> usize { self.0.len() }
//! }
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use crate::entity::EntityRef;

/// A typed, homogeneous store keyed by entity reference.
pub trait Column: Clone + Send + 'static {
    /// The single value type this column stores.
    type Value: Clone + Send + 'static;

    /// Inserts or replaces the value for `entity`.
    fn add(&mut self, entity: EntityRef, value: Self::Value);

    /// Removes the value for `entity`, returning it.
    fn del(&mut self, entity: EntityRef) -> Option<Self::Value>;

    /// Reads the value for `entity`.
    fn get(&self, entity: EntityRef) -> Option<&Self::Value>;

    /// Overwrites an existing value. Returns false if `entity` has none.
    fn put(&mut self, entity: EntityRef, value: Self::Value) -> bool;

    /// Number of entities with data in this column.
    fn len(&self) -> usize;

    /// Checks if `entity` has data in this column.
    fn contains(&self, entity: EntityRef) -> bool {
        self.get(entity).is_some()
    }

    /// Returns true if the column holds no data.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash-map backed column. The stock column most user columns wrap.
#[derive(Clone, Debug)]
pub struct MapColumn<V> {
    data: HashMap<EntityRef, V>,
}

impl<V> Default for MapColumn<V> {
    fn default() -> Self {
        Self {
            data: HashMap::new(),
        }
    }
}

impl<V> MapColumn<V> {
    /// Creates an empty column.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterates over every (entity, value) pair.
    pub fn iter(&self) -> impl Iterator<Item = (EntityRef, &V)> {
        self.data.iter().map(|(e, v)| (*e, v))
    }

    /// Iterates mutably over every (entity, value) pair.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityRef, &mut V)> {
        self.data.iter_mut().map(|(e, v)| (*e, v))
    }

    /// Mutable access to the value for `entity`.
    pub fn get_mut(&mut self, entity: EntityRef) -> Option<&mut V> {
        self.data.get_mut(&entity)
    }
}

impl<V: Clone + Send + 'static> Column for MapColumn<V> {
    type Value = V;

    #[inline]
    fn add(&mut self, entity: EntityRef, value: V) {
        self.data.insert(entity, value);
    }

    #[inline]
    fn del(&mut self, entity: EntityRef) -> Option<V> {
        self.data.remove(&entity)
    }

    #[inline]
    fn get(&self, entity: EntityRef) -> Option<&V> {
        self.data.get(&entity)
    }

    fn put(&mut self, entity: EntityRef, value: V) -> bool {
        match self.data.get_mut(&entity) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Type identity of a column: the column type and the value type it stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    /// `TypeId` of the column type.
    pub column: TypeId,
    /// `TypeId` of the value type.
    pub value: TypeId,
    /// Readable column type name.
    pub name: &'static str,
}

impl ColumnKey {
    /// Key for column type `C`.
    #[must_use]
    pub fn of<C: Column>() -> Self {
        Self {
            column: TypeId::of::<C>(),
            value: TypeId::of::<C::Value>(),
            name: type_name::<C>(),
        }
    }
}

/// A column value handed to the world by `Context::declare`.
pub struct DeclaredColumn(pub(crate) Box<dyn AnyColumn>);

impl DeclaredColumn {
    /// Wraps a column for declaration.
    #[must_use]
    pub fn new<C: Column>(column: C) -> Self {
        Self(Box::new(column))
    }

    /// Type identity of the wrapped column.
    #[must_use]
    pub fn key(&self) -> ColumnKey {
        self.0.key()
    }
}

/// Type-erased column, as stored in slots and working copies.
///
/// Values cross the erased boundary as `Option<C::Value>` behind `&mut dyn Any`:
/// inserts take the value out of the option, reads write a clone into it.
pub(crate) trait AnyColumn: Send + 'static {
    fn key(&self) -> ColumnKey;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn clone_boxed(&self) -> Box<dyn AnyColumn>;
    /// Overwrites `self` with a copy of `other`. Returns false on type mismatch.
    fn copy_from(&mut self, other: &dyn AnyColumn) -> bool;
    fn add_erased(&mut self, entity: EntityRef, value: &mut dyn Any) -> bool;
    fn put_erased(&mut self, entity: EntityRef, value: &mut dyn Any) -> Option<bool>;
    fn get_erased(&self, entity: EntityRef, out: &mut dyn Any) -> Option<bool>;
    /// Like `get_erased`, but moves the value out of the column.
    fn take_erased(&mut self, entity: EntityRef, out: &mut dyn Any) -> Option<bool>;
    fn remove(&mut self, entity: EntityRef) -> bool;
    fn has_entity(&self, entity: EntityRef) -> bool;
    fn entity_count(&self) -> usize;
}

impl<C: Column> AnyColumn for C {
    fn key(&self) -> ColumnKey {
        ColumnKey::of::<C>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn AnyColumn> {
        Box::new(self.clone())
    }

    fn copy_from(&mut self, other: &dyn AnyColumn) -> bool {
        match other.as_any().downcast_ref::<C>() {
            Some(other) => {
                self.clone_from(other);
                true
            }
            None => false,
        }
    }

    fn add_erased(&mut self, entity: EntityRef, value: &mut dyn Any) -> bool {
        match value.downcast_mut::<Option<C::Value>>().and_then(Option::take) {
            Some(value) => {
                Column::add(self, entity, value);
                true
            }
            None => false,
        }
    }

    fn put_erased(&mut self, entity: EntityRef, value: &mut dyn Any) -> Option<bool> {
        let value = value.downcast_mut::<Option<C::Value>>()?.take()?;
        Some(Column::put(self, entity, value))
    }

    fn get_erased(&self, entity: EntityRef, out: &mut dyn Any) -> Option<bool> {
        let out = out.downcast_mut::<Option<C::Value>>()?;
        *out = Column::get(self, entity).cloned();
        Some(out.is_some())
    }

    fn take_erased(&mut self, entity: EntityRef, out: &mut dyn Any) -> Option<bool> {
        let out = out.downcast_mut::<Option<C::Value>>()?;
        *out = Column::del(self, entity);
        Some(out.is_some())
    }

    fn remove(&mut self, entity: EntityRef) -> bool {
        Column::del(self, entity).is_some()
    }

    fn has_entity(&self, entity: EntityRef) -> bool {
        Column::contains(self, entity)
    }

    fn entity_count(&self) -> usize {
        Column::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Heights(MapColumn<f32>);

    impl Column for Heights {
        type Value = f32;
        fn add(&mut self, e: EntityRef, v: f32) {
            self.0.add(e, v);
        }
        fn del(&mut self, e: EntityRef) -> Option<f32> {
            self.0.del(e)
        }
        fn get(&self, e: EntityRef) -> Option<&f32> {
            self.0.get(e)
        }
        fn put(&mut self, e: EntityRef, v: f32) -> bool {
            self.0.put(e, v)
        }
        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_map_column_add_put_del() {
        let e = EntityRef::from_raw(7);
        let mut col: MapColumn<u32> = MapColumn::new();
        assert!(!col.put(e, 1));
        col.add(e, 1);
        assert!(col.put(e, 2));
        assert_eq!(col.get(e), Some(&2));
        assert_eq!(col.del(e), Some(2));
        assert!(col.is_empty());
    }

    #[test]
    fn test_key_distinguishes_column_and_value() {
        let a = ColumnKey::of::<Heights>();
        let b = ColumnKey::of::<MapColumn<f32>>();
        assert_ne!(a.column, b.column);
        assert_eq!(a.value, b.value);
        assert!(a.name.contains("Heights"));
    }

    #[test]
    fn test_erased_roundtrip() {
        let e = EntityRef::from_raw(3);
        let mut col: Box<dyn AnyColumn> = Box::new(Heights::default());

        let mut value = Some(1.5_f32);
        assert!(col.add_erased(e, &mut value));
        assert!(value.is_none());

        let mut out: Option<f32> = None;
        assert_eq!(col.get_erased(e, &mut out), Some(true));
        assert_eq!(out, Some(1.5));

        // Wrong value type is rejected, not misread.
        let mut wrong: Option<u8> = None;
        assert_eq!(col.get_erased(e, &mut wrong), None);

        let mut next = Some(2.5_f32);
        assert_eq!(col.put_erased(e, &mut next), Some(true));
        assert!(col.has_entity(e));

        let mut taken: Option<f32> = None;
        assert_eq!(col.take_erased(e, &mut taken), Some(true));
        assert_eq!(taken, Some(2.5));
        assert!(!col.remove(e));
        assert_eq!(col.entity_count(), 0);
    }

    #[test]
    fn test_copy_from_is_deep() {
        let e = EntityRef::from_raw(1);
        let mut shared: Box<dyn AnyColumn> = Box::new(MapColumn::<i64>::new());
        let mut working = shared.clone_boxed();

        let mut v = Some(10_i64);
        working.add_erased(e, &mut v);
        assert!(!shared.has_entity(e));

        assert!(shared.copy_from(&*working));
        assert!(shared.has_entity(e));
        assert!(!shared.copy_from(&Heights::default()));
    }
}
