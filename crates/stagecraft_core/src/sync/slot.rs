//! # Column Slots
//!
//! A slot is the unit of mutual exclusion: one per declared column type,
//! holding the authoritative column value. Subsystems never touch slot
//! values directly; they lock their whole requirement at once and work on
//! private copies.
//!
//! ## Acquisition (AB-BA safe)
//!
//! ```text
//! lock resource mutex
//! loop:
//!     any slot in request locked?  -> wait on THAT slot's condvar, rescan
//!     none locked                  -> mark ALL locked, unlock mutex, done
//! ```
//!
//! A requester never holds a strict subset of its slots while waiting for
//! the rest, so two requesters with overlapping sets in opposite orders
//! cannot deadlock.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::column::{AnyColumn, Column, ColumnKey};

/// Index of a slot in the world's slot table.
pub(crate) type SlotId = usize;

/// The shared value backing one column type.
pub(crate) struct Slot {
    id: SlotId,
    key: ColumnKey,
    value: Mutex<Box<dyn AnyColumn>>,
    /// Signalled whenever this slot is released.
    freed: Condvar,
}

impl Slot {
    pub(crate) fn new(id: SlotId, value: Box<dyn AnyColumn>) -> Self {
        Self {
            id,
            key: value.key(),
            value: Mutex::new(value),
            freed: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> SlotId {
        self.id
    }

    #[inline]
    pub(crate) fn key(&self) -> ColumnKey {
        self.key
    }

    /// Direct access to the authoritative value.
    ///
    /// Only valid while no subsystem holds the slot, i.e. under the world's
    /// pause lock between frames.
    pub(crate) fn with_value<R>(
        &self,
        f: impl FnOnce(&mut (dyn AnyColumn + 'static)) -> R,
    ) -> R {
        let mut value = self.value.lock();
        f(&mut **value)
    }
}

/// The world's shared resource mutex and the locked flag of every slot.
#[derive(Default)]
pub(crate) struct SlotLocks {
    locked: Mutex<Vec<bool>>,
}

impl SlotLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserves the flag for a new slot.
    pub(crate) fn register(&self) -> SlotId {
        let mut locked = self.locked.lock();
        locked.push(false);
        locked.len() - 1
    }

    /// Locks every slot in `request`, all or nothing.
    pub(crate) fn acquire(&self, request: &[Arc<Slot>]) {
        if request.is_empty() {
            return;
        }
        let mut locked = self.locked.lock();
        'scan: loop {
            for slot in request {
                if locked[slot.id] {
                    // resource mutex released while waiting, retaken on wake
                    slot.freed.wait(&mut locked);
                    continue 'scan;
                }
            }
            for slot in request {
                locked[slot.id] = true;
            }
            return;
        }
    }

    /// Unlocks every slot in `request` and wakes their waiters.
    pub(crate) fn release(&self, request: &[Arc<Slot>]) {
        if request.is_empty() {
            return;
        }
        let mut locked = self.locked.lock();
        for slot in request {
            locked[slot.id] = false;
            slot.freed.notify_all();
        }
    }

    #[cfg(test)]
    fn is_locked(&self, id: SlotId) -> bool {
        self.locked.lock()[id]
    }
}

/// A subsystem's resolved requirement: the slots it locks every frame and
/// its private working copy of each.
pub(crate) struct ColumnRequest {
    slots: Vec<Arc<Slot>>,
    working: Vec<Box<dyn AnyColumn>>,
    held: bool,
}

impl ColumnRequest {
    /// Starts with working copies of the current slot values.
    pub(crate) fn new(slots: Vec<Arc<Slot>>) -> Self {
        let working = slots
            .iter()
            .map(|slot| slot.with_value(|value| value.clone_boxed()))
            .collect();
        Self {
            slots,
            working,
            held: false,
        }
    }

    /// An empty request, used before setup completes.
    pub(crate) fn empty() -> Self {
        Self {
            slots: Vec::new(),
            working: Vec::new(),
            held: false,
        }
    }

    /// Locks the slots and copies their values in.
    pub(crate) fn acquire(&mut self, locks: &SlotLocks) {
        locks.acquire(&self.slots);
        for (slot, working) in self.slots.iter().zip(self.working.iter_mut()) {
            let shared = slot.value.lock();
            working.copy_from(&**shared);
        }
        self.held = true;
    }

    /// Copies the working values back (if `copy_back`) and unlocks the slots.
    /// Does nothing if the slots are not held.
    pub(crate) fn release(&mut self, locks: &SlotLocks, copy_back: bool) {
        if !self.held {
            return;
        }
        if copy_back {
            for (slot, working) in self.slots.iter().zip(self.working.iter()) {
                slot.value.lock().copy_from(&**working);
            }
        }
        locks.release(&self.slots);
        self.held = false;
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.held
    }

    pub(crate) fn get<C: Column>(&self, index: usize) -> Option<&C> {
        self.working.get(index)?.as_any().downcast_ref::<C>()
    }

    pub(crate) fn get_mut<C: Column>(&mut self, index: usize) -> Option<&mut C> {
        self.working.get_mut(index)?.as_any_mut().downcast_mut::<C>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::MapColumn;
    use crate::entity::EntityRef;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn slot<V: Clone + Send + 'static>(locks: &SlotLocks) -> Arc<Slot> {
        let id = locks.register();
        Arc::new(Slot::new(id, Box::new(MapColumn::<V>::new())))
    }

    #[test]
    fn test_acquire_release_flags() {
        let locks = SlotLocks::new();
        let a = slot::<u8>(&locks);
        let b = slot::<u16>(&locks);
        let request = vec![Arc::clone(&a), Arc::clone(&b)];

        locks.acquire(&request);
        assert!(locks.is_locked(a.id()) && locks.is_locked(b.id()));
        locks.release(&request);
        assert!(!locks.is_locked(a.id()) && !locks.is_locked(b.id()));
    }

    #[test]
    fn test_blocked_requester_holds_nothing() {
        let locks = Arc::new(SlotLocks::new());
        let x = slot::<u8>(&locks);
        let y = slot::<u16>(&locks);

        // Holder takes X.
        locks.acquire(&[Arc::clone(&x)]);

        // Requester wants {Y, X}: must block without taking Y.
        let (done_tx, done_rx) = mpsc::channel();
        let blocked = {
            let locks = Arc::clone(&locks);
            let request = vec![Arc::clone(&y), Arc::clone(&x)];
            thread::spawn(move || {
                locks.acquire(&request);
                done_tx.send(()).unwrap();
                locks.release(&request);
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!locks.is_locked(y.id()));

        // Y alone is still available while the requester waits.
        locks.acquire(&[Arc::clone(&y)]);
        locks.release(&[Arc::clone(&y)]);

        locks.release(&[Arc::clone(&x)]);
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        blocked.join().unwrap();
    }

    #[test]
    fn test_request_copies_in_and_back() {
        let locks = SlotLocks::new();
        let shared = slot::<i32>(&locks);
        let e = EntityRef::from_raw(1);

        let mut first = ColumnRequest::new(vec![Arc::clone(&shared)]);
        let mut second = ColumnRequest::new(vec![Arc::clone(&shared)]);

        first.acquire(&locks);
        first.get_mut::<MapColumn<i32>>(0).unwrap().add(e, 5);
        // Not visible until released.
        assert!(!shared.with_value(|v| v.has_entity(e)));
        first.release(&locks, true);
        assert!(shared.with_value(|v| v.has_entity(e)));

        second.acquire(&locks);
        assert_eq!(second.get::<MapColumn<i32>>(0).unwrap().get(e), Some(&5));
        second.release(&locks, false);
        assert!(!second.is_held());

        // The releasing worker keeps its copy.
        assert_eq!(first.get::<MapColumn<i32>>(0).unwrap().get(e), Some(&5));
        assert!(first.get::<MapColumn<u8>>(0).is_none());
    }

    #[test]
    fn test_release_without_hold_is_noop() {
        let locks = SlotLocks::new();
        let a = slot::<u8>(&locks);
        locks.acquire(&[Arc::clone(&a)]);

        let mut idle = ColumnRequest::new(vec![Arc::clone(&a)]);
        idle.release(&locks, true);
        // Still held by the first locker.
        assert!(locks.is_locked(a.id()));
        assert!(ColumnRequest::empty().get::<MapColumn<u8>>(0).is_none());
    }
}
