//! # Frame Loop
//!
//! Fixed-rate driver for a [`World`]. Each frame is one `World::step`,
//! followed by a sleep for whatever is left of the frame budget.
//!
//! ```text
//! ┌── frame N ─────────────────────────────────────────┐
//! │ World::step (every stage, ascending)  │  sleep     │
//! └───────────────────────────────────────┴────────────┘
//!   late if step alone exceeds the budget
//! ```

use std::time::{Duration, Instant};

use serde::Deserialize;
use stagecraft_core::{SceneError, SceneResult, World};

/// Configuration for the frame loop.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameLoopConfig {
    /// Target frames per second. Zero runs unthrottled.
    pub target_fps: u32,
    /// Stop after this many frames. Runs until the world closes if unset.
    pub max_frames: Option<u64>,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            max_frames: None,
        }
    }
}

impl FrameLoopConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> SceneResult<Self> {
        toml::from_str(text).map_err(|e| SceneError::InvalidConfig(e.to_string()))
    }
}

/// Frame timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStats {
    /// Fastest step observed, in microseconds.
    pub min_frame_us: u64,
    /// Slowest step observed, in microseconds.
    pub max_frame_us: u64,
    /// Rolling average step time, in microseconds.
    pub avg_frame_us: u64,
    /// Steps that took longer than the frame budget.
    pub late_frames: u64,
    /// Steps measured.
    pub total_frames: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            avg_frame_us: 0,
            late_frames: 0,
            total_frames: 0,
        }
    }
}

/// Drives a world at a fixed rate.
pub struct FrameLoop {
    /// `None` when unthrottled.
    budget: Option<Duration>,
    max_frames: Option<u64>,
    stats: FrameStats,
}

impl FrameLoop {
    /// Creates a loop from its configuration.
    #[must_use]
    pub fn new(config: &FrameLoopConfig) -> Self {
        let budget = (config.target_fps > 0)
            .then(|| Duration::from_micros(1_000_000 / u64::from(config.target_fps)));
        Self {
            budget,
            max_frames: config.max_frames,
            stats: FrameStats::default(),
        }
    }

    /// Runs one frame: steps the world, records timing, then sleeps out
    /// the rest of the budget. Returns false if the world is closed.
    pub fn tick(&mut self, world: &World) -> bool {
        if world.is_closed() {
            return false;
        }
        let start = Instant::now();
        world.step();
        let elapsed = start.elapsed();
        self.record(elapsed);

        if let Some(budget) = self.budget {
            if elapsed > budget {
                tracing::warn!(
                    frame = world.frame(),
                    elapsed_us = duration_us(elapsed),
                    budget_us = duration_us(budget),
                    "late frame"
                );
            } else {
                std::thread::sleep(budget - elapsed);
            }
        }
        true
    }

    /// Ticks until `max_frames` is reached or the world closes. Returns the
    /// number of frames run.
    pub fn run(&mut self, world: &World) -> u64 {
        self.run_while(world, |_| true)
    }

    /// Like [`FrameLoop::run`], but also stops as soon as `keep_going`
    /// returns false. It is called before every frame.
    pub fn run_while(&mut self, world: &World, mut keep_going: impl FnMut(&FrameStats) -> bool) -> u64 {
        let mut frames = 0;
        while self.max_frames.map_or(true, |max| frames < max) && keep_going(&self.stats) {
            if !self.tick(world) {
                break;
            }
            frames += 1;
        }
        tracing::info!(
            frames,
            avg_frame_us = self.stats.avg_frame_us,
            late_frames = self.stats.late_frames,
            "frame loop finished"
        );
        frames
    }

    /// Timing statistics so far.
    #[must_use]
    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// The per-frame budget, if throttled.
    #[must_use]
    pub const fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Clears statistics.
    pub fn reset_stats(&mut self) {
        self.stats = FrameStats::default();
    }

    fn record(&mut self, elapsed: Duration) {
        let us = duration_us(elapsed);
        let stats = &mut self.stats;
        stats.min_frame_us = stats.min_frame_us.min(us);
        stats.max_frame_us = stats.max_frame_us.max(us);
        stats.avg_frame_us = if stats.total_frames == 0 {
            us
        } else {
            // Rolling average
            (stats.avg_frame_us * 15 + us) / 16
        };
        stats.total_frames += 1;
        if self.budget.is_some_and(|budget| elapsed > budget) {
            stats.late_frames += 1;
        }
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new(&FrameLoopConfig::default())
    }
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
