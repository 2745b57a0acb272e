//! # STAGECRAFT Core Scheduler
//!
//! Lockstep scheduling of independent subsystems over shared entity data:
//! - Every subsystem runs on its own thread and loops on `Context::step`
//! - Subsystems are grouped into stages, run in ascending stage order
//! - Column data is shared only through private per-frame copies
//!
//! ## Architecture Rules
//!
//! 1. **All or nothing** - A subsystem locks every column it needs at once
//! 2. **Copy in, copy back** - No live column reference survives a frame
//! 3. **One pause lock** - Structural edits never overlap frame advancement
//!
//! ## Example
//!
//! ```rust,ignore
//! use stagecraft_core::{subsystem_fn, MapColumn, Subsystem, World};
//!
//! let counter = subsystem_fn("counter", |ctx| {
//!     ctx.declare(MapColumn::<u64>::new())?;
//!     let counts = ctx.require::<MapColumn<u64>>()?;
//!     while ctx.step() {
//!         for (_, n) in ctx.column_mut(counts).iter_mut() {
//!             *n += 1;
//!         }
//!     }
//!     Ok(())
//! });
//! let world = World::new(vec![Box::new(counter) as Box<dyn Subsystem>])?;
//! let e = world.edit().create(0_u64)?;
//! world.step();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::perf)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod column;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
mod sync;
pub mod tx;
pub mod world;

pub use bundle::{ColumnBundle, Required, Requirement};
pub use column::{Column, ColumnKey, DeclaredColumn, MapColumn};
pub use config::SceneConfig;
pub use context::{subsystem_fn, Context, FnSubsystem, StageId, Subsystem};
pub use entity::{EntityRef, EntityTable};
pub use error::{SceneError, SceneResult, SetupFault};
pub use tx::Transaction;
pub use world::World;
