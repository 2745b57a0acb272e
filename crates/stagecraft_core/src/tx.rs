//! # Transactions
//!
//! Ad-hoc structural edits from outside the stepped subsystems. A
//! transaction holds the world's pause lock for its whole lifetime, so no
//! frame advances while it is open and every slot value is at rest.
//!
//! ```rust,ignore
//! let mut tx = world.edit();
//! let player = tx.create(Position::default())?;
//! tx.add(player, Health(100))?;
//! tx.commit();
//! ```
//!
//! There is no rollback: edits apply immediately, and dropping an
//! uncommitted transaction behaves like committing it.

use std::any::type_name;
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::entity::EntityRef;
use crate::error::{SceneError, SceneResult};
use crate::sync::Slot;
use crate::world::Registry;

/// Exclusive edit window on a world. See [`crate::World::edit`].
#[must_use = "a transaction blocks every step until committed or dropped"]
pub struct Transaction<'w> {
    registry: MutexGuard<'w, Registry>,
}

impl<'w> Transaction<'w> {
    pub(crate) fn new(registry: MutexGuard<'w, Registry>) -> Self {
        Self { registry }
    }

    /// Creates a new entity holding `value` in the column for `V`.
    ///
    /// # Errors
    ///
    /// `NoColumn` if no column stores `V`, `EntitiesExhausted` if every
    /// reference is in use.
    pub fn create<V: Send + 'static>(&mut self, value: V) -> SceneResult<EntityRef> {
        let slot = self.registry.slot_for_value::<V>()?;
        let entity = self.registry.entities.alloc()?;
        // Subsystems can publish data under references that were not alive;
        // a fresh entity must not inherit it.
        for stale in self.registry.slots() {
            stale.with_value(|column| column.remove(entity));
        }
        let mut value = Some(value);
        slot.with_value(|column| column.add_erased(entity, &mut value));
        tracing::debug!(%entity, column = slot.key().name, "entity created");
        Ok(entity)
    }

    /// Deletes an entity and its data in every column.
    ///
    /// # Errors
    ///
    /// `EntityNotFound` if `entity` is not alive.
    pub fn delete(&mut self, entity: EntityRef) -> SceneResult<()> {
        if !self.registry.entities.free(entity) {
            return Err(SceneError::EntityNotFound(entity));
        }
        let mut removed = 0_usize;
        for slot in self.registry.slots() {
            if slot.with_value(|column| column.remove(entity)) {
                removed += 1;
            }
        }
        tracing::debug!(%entity, columns = removed, "entity deleted");
        Ok(())
    }

    /// Reads a copy of the entity's `V` value.
    ///
    /// # Errors
    ///
    /// `NoColumn`, `EntityNotFound`, or `MissingData` if the entity has no
    /// `V` value.
    pub fn get<V: Send + 'static>(&self, entity: EntityRef) -> SceneResult<V> {
        let slot = self.live_slot::<V>(entity)?;
        let mut out: Option<V> = None;
        slot.with_value(|column| column.get_erased(entity, &mut out));
        out.ok_or(SceneError::MissingData {
            entity,
            value: type_name::<V>(),
        })
    }

    /// Overwrites the entity's existing `V` value.
    ///
    /// # Errors
    ///
    /// `NoColumn`, `EntityNotFound`, or `MissingData` if the entity has no
    /// `V` value yet (use [`Transaction::add`] to attach one).
    pub fn set<V: Send + 'static>(&mut self, entity: EntityRef, value: V) -> SceneResult<()> {
        let slot = self.live_slot::<V>(entity)?;
        let mut value = Some(value);
        match slot.with_value(|column| column.put_erased(entity, &mut value)) {
            Some(true) => Ok(()),
            _ => Err(SceneError::MissingData {
                entity,
                value: type_name::<V>(),
            }),
        }
    }

    /// Attaches (or replaces) a `V` value on a live entity.
    ///
    /// # Errors
    ///
    /// `NoColumn` or `EntityNotFound`.
    pub fn add<V: Send + 'static>(&mut self, entity: EntityRef, value: V) -> SceneResult<()> {
        let slot = self.live_slot::<V>(entity)?;
        let mut value = Some(value);
        slot.with_value(|column| column.add_erased(entity, &mut value));
        Ok(())
    }

    /// Detaches the entity's `V` value and returns it. The entity stays
    /// alive.
    ///
    /// # Errors
    ///
    /// `NoColumn`, `EntityNotFound`, or `MissingData`.
    pub fn remove<V: Send + 'static>(&mut self, entity: EntityRef) -> SceneResult<V> {
        let slot = self.live_slot::<V>(entity)?;
        let mut out: Option<V> = None;
        slot.with_value(|column| column.take_erased(entity, &mut out));
        out.ok_or(SceneError::MissingData {
            entity,
            value: type_name::<V>(),
        })
    }

    /// Checks whether the entity has a `V` value. False for dead entities
    /// and undeclared value types.
    #[must_use]
    pub fn contains<V: Send + 'static>(&self, entity: EntityRef) -> bool {
        self.live_slot::<V>(entity)
            .map(|slot| slot.with_value(|column| column.has_entity(entity)))
            .unwrap_or(false)
    }

    /// Checks whether the reference was created and not yet deleted.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, entity: EntityRef) -> bool {
        self.registry.entities.is_alive(entity)
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.registry.entities.len()
    }

    /// Ends the transaction and lets frames advance again.
    pub fn commit(self) {}

    fn live_slot<V: Send + 'static>(&self, entity: EntityRef) -> SceneResult<Arc<Slot>> {
        let slot = self.registry.slot_for_value::<V>()?;
        if !self.registry.entities.is_alive(entity) {
            return Err(SceneError::EntityNotFound(entity));
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use crate::column::MapColumn;
    use crate::context::{subsystem_fn, Subsystem};
    use crate::error::SceneError;
    use crate::world::World;

    #[derive(Clone, Debug, PartialEq)]
    struct Label(String);

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Mass(f32);

    fn world() -> World {
        let systems: Vec<Box<dyn Subsystem>> = vec![Box::new(subsystem_fn("columns", |ctx| {
            ctx.declare((MapColumn::<Label>::new(), MapColumn::<Mass>::new()))?;
            while ctx.step() {}
            Ok(())
        }))];
        World::new(systems).unwrap()
    }

    #[test]
    fn test_create_get_set() {
        let world = world();
        let mut tx = world.edit();
        let e = tx.create(Label("crate".into())).unwrap();
        assert!(tx.is_alive(e));
        assert_eq!(tx.get::<Label>(e).unwrap(), Label("crate".into()));

        tx.set(e, Label("barrel".into())).unwrap();
        assert_eq!(tx.get::<Label>(e).unwrap().0, "barrel");
        tx.commit();
    }

    #[test]
    fn test_strict_lookups() {
        let world = world();
        let mut tx = world.edit();
        let e = tx.create(Label("a".into())).unwrap();

        assert!(matches!(
            tx.get::<Mass>(e),
            Err(SceneError::MissingData { .. })
        ));
        assert!(matches!(
            tx.set(e, Mass(1.0)),
            Err(SceneError::MissingData { .. })
        ));
        assert!(matches!(tx.get::<u64>(e), Err(SceneError::NoColumn { .. })));
        assert!(matches!(tx.create(7_u64), Err(SceneError::NoColumn { .. })));
        assert_eq!(tx.entity_count(), 1);
    }

    #[test]
    fn test_add_remove_and_cascade_delete() {
        let world = world();
        let mut tx = world.edit();
        let e = tx.create(Label("rock".into())).unwrap();
        tx.add(e, Mass(3.5)).unwrap();
        assert!(tx.contains::<Mass>(e));

        assert_eq!(tx.remove::<Mass>(e).unwrap(), Mass(3.5));
        assert!(!tx.contains::<Mass>(e));
        assert!(tx.is_alive(e));

        tx.add(e, Mass(1.0)).unwrap();
        tx.delete(e).unwrap();
        assert!(!tx.is_alive(e));
        assert!(!tx.contains::<Label>(e));
        assert!(!tx.contains::<Mass>(e));
        assert_eq!(tx.delete(e), Err(SceneError::EntityNotFound(e)));
        assert_eq!(tx.add(e, Mass(2.0)), Err(SceneError::EntityNotFound(e)));
    }

    #[test]
    fn test_dropped_transaction_keeps_edits() {
        let world = world();
        let e = {
            let mut tx = world.edit();
            tx.create(Mass(9.0)).unwrap()
        };
        let tx = world.edit();
        assert_eq!(tx.get::<Mass>(e).unwrap(), Mass(9.0));
    }
}
