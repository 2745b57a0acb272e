//! # STAGECRAFT
//!
//! Drives a [`stagecraft_core::World`] at a fixed frame rate.
//!
//! ```rust,ignore
//! use stagecraft::{FrameLoop, FrameLoopConfig};
//!
//! let world = World::new(subsystems)?;
//! let mut frame_loop = FrameLoop::new(&FrameLoopConfig { target_fps: 30, max_frames: Some(300) });
//! frame_loop.run(&world);
//! world.close();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod frame_loop;

pub use frame_loop::{FrameLoop, FrameLoopConfig, FrameStats};
pub use stagecraft_core as core;
