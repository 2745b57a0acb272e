//! # Synchronization Primitives for Staged Subsystems
//!
//! ## The Problem
//!
//! ```text
//! Subsystem A (stage 0):  WRITE positions
//! Subsystem B (stage 0):  WRITE positions, READ velocities
//! Subsystem C (stage 1):  READ positions
//!
//! Without ordering:        C may see A's frame N+1 before B's frame N
//! With per-column locks:   A takes P then V, B takes V then P -> DEADLOCK
//! ```
//!
//! ## The Solution
//!
//! - `stage`: one lockstep barrier per stage, cycled in ascending order
//!   by the world, so stage N always finishes a frame before stage N+1
//!   starts it.
//! - `slot`: all-or-nothing acquisition of every column a subsystem
//!   requires, with copy-in on acquire and copy-back on release.

mod slot;
mod stage;

pub(crate) use slot::{ColumnRequest, Slot, SlotId, SlotLocks};
pub(crate) use stage::Stage;
