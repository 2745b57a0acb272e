//! # Subsystems and Their Context
//!
//! A subsystem is an independent worker running on its own thread. It sets
//! itself up once through its [`Context`] (stage, declared columns, required
//! columns) and then loops on [`Context::step`]:
//!
//! ```rust,ignore
//! impl Subsystem for Physics {
//!     fn run(&mut self, ctx: &mut Context) -> SceneResult<()> {
//!         ctx.stage(StageId(1))?;
//!         ctx.declare(Positions::default())?;
//!         let (pos, vel) = ctx.require::<(Positions, Velocities)>()?;
//!         while ctx.step() {
//!             // work on private copies; published at the next step
//!             integrate(ctx.column_mut(pos), ctx.column(vel));
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::any::type_name;
use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::bundle::{ColumnBundle, Required, Requirement};
use crate::column::{Column, ColumnKey};
use crate::error::{SceneError, SceneResult};
use crate::sync::{ColumnRequest, Stage};
use crate::world::WorldShared;

/// When in a world step a subsystem runs. Stages run in ascending order;
/// subsystems sharing a stage run concurrently in unspecified order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(pub i32);

impl StageId {
    /// Most work is done in the default stage.
    pub const DEFAULT: Self = Self(0);
    /// The scene is presented after everything else.
    pub const OUTPUT: Self = Self(100);
}

/// An independent process in the world.
pub trait Subsystem: Send + 'static {
    /// Runs the subsystem to completion. Should loop until `ctx.step()`
    /// returns false.
    ///
    /// # Errors
    ///
    /// An error returned before the first `step` fails world construction.
    fn run(&mut self, ctx: &mut Context) -> SceneResult<()>;

    /// Name used in logs and setup errors.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

/// Subsystem backed by a closure.
pub struct FnSubsystem<F> {
    name: String,
    body: F,
}

/// Wraps a closure as a named subsystem.
pub fn subsystem_fn<F>(name: impl Into<String>, body: F) -> FnSubsystem<F>
where
    F: FnMut(&mut Context) -> SceneResult<()> + Send + 'static,
{
    FnSubsystem {
        name: name.into(),
        body,
    }
}

impl<F> Subsystem for FnSubsystem<F>
where
    F: FnMut(&mut Context) -> SceneResult<()> + Send + 'static,
{
    fn run(&mut self, ctx: &mut Context) -> SceneResult<()> {
        (self.body)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// What a worker tells the world when it finishes setup.
pub(crate) enum SetupReport {
    Ready {
        stage: StageId,
        wants: Vec<ColumnKey>,
    },
    Failed(SceneError),
}

/// The world's answer to a `Ready` report.
pub(crate) struct Attachment {
    pub(crate) stage: Arc<Stage>,
    pub(crate) request: ColumnRequest,
}

/// Channels linking one worker to the world during setup.
pub(crate) struct SetupLink {
    pub(crate) report: Sender<(usize, SetupReport)>,
    /// `None` means setup was aborted.
    pub(crate) reply: Receiver<Option<Attachment>>,
}

/// How a subsystem's `run` ended: its result, or the panic message.
pub(crate) type Outcome = Result<SceneResult<()>, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Setup,
    Running,
    Finished,
}

/// A subsystem's view of its world.
pub struct Context {
    index: usize,
    name: String,
    shared: Arc<WorldShared>,
    link: SetupLink,
    phase: Phase,
    stage_id: Option<StageId>,
    declared: bool,
    wants: Option<Vec<ColumnKey>>,
    /// First setup error, reported even if the subsystem ignored it.
    fault: Option<SceneError>,
    stage: Option<Arc<Stage>>,
    request: ColumnRequest,
}

impl Context {
    pub(crate) fn new(index: usize, name: String, shared: Arc<WorldShared>, link: SetupLink) -> Self {
        Self {
            index,
            name,
            shared,
            link,
            phase: Phase::Setup,
            stage_id: None,
            declared: false,
            wants: None,
            fault: None,
            stage: None,
            request: ColumnRequest::empty(),
        }
    }

    /// Position of this subsystem in the world's subsystem list.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of this subsystem.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stage this subsystem runs in.
    #[must_use]
    pub fn stage_id(&self) -> StageId {
        self.stage_id.unwrap_or_default()
    }

    /// Frames completed by this subsystem's stage. Zero before setup.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.stage.as_ref().map_or(0, |stage| stage.frame())
    }

    /// Sets which stage this subsystem runs in. Must come before `declare`
    /// and `require`; subsystems that never call it run in
    /// [`StageId::DEFAULT`].
    ///
    /// # Errors
    ///
    /// `RepeatedCall` on a second call, `OutOfOrder` after `declare`,
    /// `require` or `step`.
    pub fn stage(&mut self, id: StageId) -> SceneResult<()> {
        let result = self.check_setup("stage").and_then(|()| {
            if self.stage_id.is_some() {
                return Err(SceneError::RepeatedCall { call: "stage" });
            }
            if self.declared || self.wants.is_some() {
                return Err(SceneError::OutOfOrder {
                    call: "stage",
                    reason: "must precede declare and require",
                });
            }
            self.stage_id = Some(id);
            Ok(())
        });
        self.record(result)
    }

    /// Adds columns to the world. Subsystems must not keep references to
    /// declared columns; they access them through `require`.
    ///
    /// # Errors
    ///
    /// `DuplicateColumn` if any column's type or value type already exists
    /// (nothing is declared in that case), `RepeatedCall` on a second call,
    /// `OutOfOrder` after `step`.
    pub fn declare<B: ColumnBundle>(&mut self, columns: B) -> SceneResult<()> {
        let result = self.check_setup("declare").and_then(|()| {
            if self.declared {
                return Err(SceneError::RepeatedCall { call: "declare" });
            }
            let keys = self
                .shared
                .registry
                .lock()
                .declare(&self.shared.locks, columns.into_columns())?;
            tracing::debug!(
                subsystem = %self.name,
                columns = ?keys.iter().map(|key| key.name).collect::<Vec<_>>(),
                "columns declared"
            );
            self.declared = true;
            Ok(())
        });
        self.record(result)
    }

    /// Names the columns this subsystem works on every frame. The returned
    /// handles give access to private copies that are refreshed by each
    /// `step` and published by the next one.
    ///
    /// # Errors
    ///
    /// `DuplicateRequirement` if a column appears twice, `RepeatedCall` on a
    /// second call, `OutOfOrder` after `step`. Requiring a column nobody
    /// declares fails world construction with `UndeclaredDependency`.
    pub fn require<R: Requirement>(&mut self) -> SceneResult<R::Handles> {
        let result = self.check_setup("require").and_then(|()| {
            if self.wants.is_some() {
                return Err(SceneError::RepeatedCall { call: "require" });
            }
            let keys = R::keys();
            let mut seen = HashSet::with_capacity(keys.len());
            if let Some(dup) = keys.iter().find(|key| !seen.insert(key.column)) {
                return Err(SceneError::DuplicateRequirement { column: dup.name });
            }
            self.wants = Some(keys);
            Ok(R::handles())
        });
        self.record(result)
    }

    /// Ends the current frame and waits for the next one.
    ///
    /// The first call completes setup and blocks until every subsystem of
    /// the world has done the same. Every call publishes the working copies
    /// of required columns, parks on the stage barrier and, if the world is
    /// still running, re-acquires fresh copies.
    ///
    /// Returns false once the world is closed (or setup failed); the
    /// subsystem should then return from `run`.
    pub fn step(&mut self) -> bool {
        match self.phase {
            Phase::Finished => return false,
            Phase::Setup => {
                if !self.finish_setup() {
                    return false;
                }
            }
            Phase::Running => {}
        }

        self.request.release(&self.shared.locks, true);
        let alive = match &self.stage {
            Some(stage) => stage.wait(),
            None => false,
        };
        if !alive {
            self.phase = Phase::Finished;
            return false;
        }
        self.request.acquire(&self.shared.locks);
        true
    }

    /// The working copy of a required column.
    ///
    /// # Panics
    ///
    /// Panics if called before the first successful `step`, or with a
    /// handle from another context.
    #[must_use]
    pub fn column<C: Column>(&self, handle: Required<C>) -> &C {
        match self.request.get::<C>(handle.index()) {
            Some(column) => column,
            None => panic!("{} not available to {}", type_name::<C>(), self.name),
        }
    }

    /// Mutable working copy of a required column.
    ///
    /// # Panics
    ///
    /// Same as [`Context::column`].
    pub fn column_mut<C: Column>(&mut self, handle: Required<C>) -> &mut C {
        let name = &self.name;
        match self.request.get_mut::<C>(handle.index()) {
            Some(column) => column,
            None => panic!("{} not available to {name}", type_name::<C>()),
        }
    }

    fn check_setup(&self, call: &'static str) -> SceneResult<()> {
        if self.phase == Phase::Setup {
            Ok(())
        } else {
            Err(SceneError::OutOfOrder {
                call,
                reason: "setup already completed by step",
            })
        }
    }

    fn record<T>(&mut self, result: SceneResult<T>) -> SceneResult<T> {
        if let Err(err) = &result {
            if self.fault.is_none() && self.phase == Phase::Setup {
                self.fault = Some(err.clone());
            }
        }
        result
    }

    /// Reports to the world and waits for wiring. False if setup failed.
    fn finish_setup(&mut self) -> bool {
        let report = match self.fault.take() {
            Some(err) => SetupReport::Failed(err),
            None => SetupReport::Ready {
                stage: self.stage_id(),
                wants: self.wants.take().unwrap_or_default(),
            },
        };
        let ready = matches!(report, SetupReport::Ready { .. });
        self.phase = Phase::Finished;
        if self.link.report.send((self.index, report)).is_err() || !ready {
            return false;
        }
        match self.link.reply.recv() {
            Ok(Some(attachment)) => {
                self.stage = Some(attachment.stage);
                self.request = attachment.request;
                self.phase = Phase::Running;
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// Called by the worker thread once `run` has returned or panicked.
    pub(crate) fn retire(&mut self, outcome: Outcome) {
        match self.phase {
            Phase::Setup => {
                let report = match outcome {
                    Err(message) => SetupReport::Failed(SceneError::SubsystemPanicked { message }),
                    Ok(Err(err)) => SetupReport::Failed(err),
                    // A recorded setup error outranks the early exit itself.
                    Ok(Ok(())) => SetupReport::Failed(
                        self.fault.take().unwrap_or(SceneError::ExitedDuringSetup),
                    ),
                };
                // The world may already have given up on setup.
                let _ = self.link.report.send((self.index, report));
            }
            Phase::Running => {
                let clean = matches!(outcome, Ok(Ok(())));
                match &outcome {
                    Ok(Ok(())) => tracing::warn!(
                        subsystem = %self.name,
                        "subsystem returned while its world is running; leaving stage"
                    ),
                    Ok(Err(err)) => tracing::error!(subsystem = %self.name, error = %err, "subsystem failed"),
                    Err(message) => tracing::error!(subsystem = %self.name, %message, "subsystem panicked"),
                }
                // A failed worker's copies may be half-written: unlock only.
                self.request.release(&self.shared.locks, clean);
                if let Some(stage) = &self.stage {
                    stage.leave();
                }
            }
            Phase::Finished => match &outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(subsystem = %self.name, error = %err, "subsystem failed after leaving its stage"),
                Err(message) => tracing::error!(subsystem = %self.name, %message, "subsystem panicked after leaving its stage"),
            },
        }
        self.phase = Phase::Finished;
    }
}
