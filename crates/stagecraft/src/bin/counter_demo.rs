//! # Counter Demo
//!
//! Three stages counting in lockstep over one shared column:
//!
//! ```text
//! stage 0    tick     counter[0] += 1
//! stage 1    follow   counter[1] = counter[0]
//! stage 100  report   log both, check they agree
//! ```
//!
//! ```bash
//! # Defaults: 60 fps, 120 frames
//! RUST_LOG=info ./counter_demo
//!
//! # Custom settings
//! ./counter_demo demo.toml
//! ```
//!
//! `demo.toml`:
//!
//! ```toml
//! [scene]
//! thread_name = "demo"
//!
//! [frame_loop]
//! target_fps = 30
//! max_frames = 90
//! ```

use std::process::ExitCode;

use serde::Deserialize;
use stagecraft::core::{subsystem_fn, MapColumn, SceneConfig, SceneError, StageId, Subsystem, World};
use stagecraft::{FrameLoop, FrameLoopConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DemoConfig {
    #[serde(default)]
    scene: SceneConfig,
    #[serde(default = "demo_frame_loop")]
    frame_loop: FrameLoopConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            scene: SceneConfig::default(),
            frame_loop: demo_frame_loop(),
        }
    }
}

fn demo_frame_loop() -> FrameLoopConfig {
    FrameLoopConfig {
        target_fps: 60,
        max_frames: Some(120),
    }
}

type Counter = MapColumn<[u64; 2]>;

fn subsystems() -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(subsystem_fn("tick", |ctx| {
            ctx.stage(StageId::DEFAULT)?;
            ctx.declare(Counter::new())?;
            let counter = ctx.require::<Counter>()?;
            while ctx.step() {
                for (_, c) in ctx.column_mut(counter).iter_mut() {
                    c[0] += 1;
                }
            }
            Ok(())
        })),
        Box::new(subsystem_fn("follow", |ctx| {
            ctx.stage(StageId(1))?;
            let counter = ctx.require::<Counter>()?;
            while ctx.step() {
                for (_, c) in ctx.column_mut(counter).iter_mut() {
                    c[1] = c[0];
                }
            }
            Ok(())
        })),
        Box::new(subsystem_fn("report", |ctx| {
            ctx.stage(StageId::OUTPUT)?;
            let counter = ctx.require::<Counter>()?;
            while ctx.step() {
                for (e, c) in ctx.column(counter).iter() {
                    if c[0] != c[1] {
                        return Err(SceneError::subsystem(format!(
                            "{e} out of step: {} vs {}",
                            c[0], c[1]
                        )));
                    }
                    if c[0] % 30 == 0 {
                        tracing::info!(entity = %e, count = c[0], frame = ctx.frame(), "counter");
                    }
                }
            }
            Ok(())
        })),
    ]
}

fn load_config() -> Result<DemoConfig, String> {
    match std::env::args().nth(1) {
        None => Ok(DemoConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| format!("{path}: {e}"))?;
            toml::from_str(&text).map_err(|e| format!("{path}: {e}"))
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let world = match World::with_config(&config.scene, subsystems()) {
        Ok(world) => world,
        Err(e) => {
            tracing::error!(error = %e, "failed to start world");
            return ExitCode::FAILURE;
        }
    };

    let mut tx = world.edit();
    let created = tx.create([0_u64; 2]);
    tx.commit();
    if let Err(e) = created {
        tracing::error!(error = %e, "failed to create counter");
        return ExitCode::FAILURE;
    }

    let mut frame_loop = FrameLoop::new(&config.frame_loop);
    let frames = frame_loop.run(&world);
    world.close();

    let stats = frame_loop.stats();
    tracing::info!(
        frames,
        min_us = stats.min_frame_us,
        avg_us = stats.avg_frame_us,
        max_us = stats.max_frame_us,
        late = stats.late_frames,
        "demo complete"
    );
    ExitCode::SUCCESS
}
