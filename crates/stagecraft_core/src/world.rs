//! # Scene World
//!
//! The world owns every column, the entity table and the stage barriers.
//! One mutex, the pause lock, serializes all structural mutation (column
//! declaration, transactions) against frame advancement. It is held only
//! around barrier cycling, never around subsystem computation.
//!
//! ## Lifecycle
//!
//! ```text
//! World::new ──> spawn one thread per subsystem
//!            ──> wait for every setup report (stage, declared, required)
//!            ──> resolve requirements to slots, sort stages, wire workers
//! World::step ─> cycle each stage in ascending id order
//! World::edit ─> Transaction (holds the pause lock until commit)
//! World::close > kill each stage; workers see step() == false
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::column::{ColumnKey, DeclaredColumn};
use crate::config::SceneConfig;
use crate::context::{Attachment, Context, SetupLink, SetupReport, StageId, Subsystem};
use crate::entity::EntityTable;
use crate::error::{SceneError, SceneResult, SetupFault};
use crate::sync::{ColumnRequest, Slot, SlotId, SlotLocks, Stage};
use crate::tx::Transaction;

/// Structural state guarded by the pause lock.
pub(crate) struct Registry {
    pub(crate) entities: EntityTable,
    slots: Vec<Arc<Slot>>,
    by_column: HashMap<TypeId, SlotId>,
    by_value: HashMap<TypeId, SlotId>,
    frame: u64,
    closed: bool,
}

impl Registry {
    fn new() -> Self {
        Self {
            entities: EntityTable::new(),
            slots: Vec::new(),
            by_column: HashMap::new(),
            by_value: HashMap::new(),
            frame: 0,
            closed: false,
        }
    }

    /// Registers columns, all or nothing.
    pub(crate) fn declare(
        &mut self,
        locks: &SlotLocks,
        columns: Vec<DeclaredColumn>,
    ) -> SceneResult<Vec<ColumnKey>> {
        let mut batch_columns = HashSet::new();
        let mut batch_values = HashSet::new();
        for column in &columns {
            let key = column.key();
            if self.by_column.contains_key(&key.column)
                || self.by_value.contains_key(&key.value)
                || !batch_columns.insert(key.column)
                || !batch_values.insert(key.value)
            {
                return Err(SceneError::DuplicateColumn { column: key.name });
            }
        }

        let mut keys = Vec::with_capacity(columns.len());
        for DeclaredColumn(value) in columns {
            let key = value.key();
            let id = locks.register();
            let slot = Arc::new(Slot::new(id, value));
            debug_assert_eq!(slot.id(), self.slots.len());
            self.slots.push(slot);
            self.by_column.insert(key.column, id);
            self.by_value.insert(key.value, id);
            keys.push(key);
        }
        Ok(keys)
    }

    fn slot_for_column(&self, key: &ColumnKey) -> Option<Arc<Slot>> {
        self.by_column
            .get(&key.column)
            .map(|&id| Arc::clone(&self.slots[id]))
    }

    /// The slot of the column storing values of type `V`.
    pub(crate) fn slot_for_value<V: Any>(&self) -> SceneResult<Arc<Slot>> {
        self.by_value
            .get(&TypeId::of::<V>())
            .map(|&id| Arc::clone(&self.slots[id]))
            .ok_or(SceneError::NoColumn {
                value: type_name::<V>(),
            })
    }

    pub(crate) fn slots(&self) -> &[Arc<Slot>] {
        &self.slots
    }
}

/// State shared between the world and every subsystem context.
pub(crate) struct WorldShared {
    /// The pause lock.
    pub(crate) registry: Mutex<Registry>,
    /// The resource mutex and slot flags.
    pub(crate) locks: SlotLocks,
}

/// A scene: subsystems stepping in lockstep over shared columns.
pub struct World {
    shared: Arc<WorldShared>,
    /// Sorted by stage id.
    stages: Vec<Arc<Stage>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Registration {
    index: usize,
    stage: StageId,
    wants: Vec<ColumnKey>,
}

impl World {
    /// Starts one worker per subsystem and waits until all of them have
    /// completed setup.
    ///
    /// # Errors
    ///
    /// `Setup` listing every subsystem that declared a duplicate column,
    /// required an undeclared one, misused its context, returned an error
    /// or panicked before its first step.
    pub fn new(subsystems: Vec<Box<dyn Subsystem>>) -> SceneResult<Self> {
        Self::with_config(&SceneConfig::default(), subsystems)
    }

    /// Like [`World::new`], with explicit thread and timeout settings.
    ///
    /// # Errors
    ///
    /// As [`World::new`], plus `SetupTimeout` if the configured timeout
    /// elapses before every subsystem reports.
    pub fn with_config(
        config: &SceneConfig,
        subsystems: Vec<Box<dyn Subsystem>>,
    ) -> SceneResult<Self> {
        let shared = Arc::new(WorldShared {
            registry: Mutex::new(Registry::new()),
            locks: SlotLocks::new(),
        });
        let (report_tx, report_rx) = crossbeam_channel::unbounded();

        let mut names = Vec::with_capacity(subsystems.len());
        let mut replies = Vec::with_capacity(subsystems.len());
        let mut workers = Vec::with_capacity(subsystems.len());
        let mut faults = Vec::new();

        for (index, subsystem) in subsystems.into_iter().enumerate() {
            names.push(subsystem.name().to_string());
            let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
            let link = SetupLink {
                report: report_tx.clone(),
                reply: reply_rx,
            };
            match spawn_worker(config, index, subsystem, Arc::clone(&shared), link) {
                Ok(handle) => {
                    workers.push(handle);
                    replies.push(Some(reply_tx));
                }
                Err(error) => {
                    faults.push(SetupFault {
                        index,
                        subsystem: names[index].clone(),
                        error,
                    });
                    replies.push(None);
                }
            }
        }
        drop(report_tx);

        let expected = workers.len();
        let (registrations, mut report_faults) =
            match collect_reports(&report_rx, expected, config, &names) {
                Ok(collected) => collected,
                Err(timeout) => {
                    tracing::warn!(error = %timeout, "world setup abandoned");
                    abort(&replies);
                    return Err(timeout);
                }
            };
        faults.append(&mut report_faults);

        // Resolve requirements now that every declaration is in.
        let mut requests = Vec::with_capacity(registrations.len());
        {
            let registry = shared.registry.lock();
            for reg in &registrations {
                let mut slots = Vec::with_capacity(reg.wants.len());
                for key in &reg.wants {
                    match registry.slot_for_column(key) {
                        Some(slot) => slots.push(slot),
                        None => faults.push(SetupFault {
                            index: reg.index,
                            subsystem: names[reg.index].clone(),
                            error: SceneError::UndeclaredDependency { column: key.name },
                        }),
                    }
                }
                requests.push(slots);
            }
        }

        if !faults.is_empty() {
            faults.sort_by_key(|fault| fault.index);
            tracing::warn!(faults = faults.len(), "world setup failed");
            abort(&replies);
            join_all(workers);
            return Err(SceneError::Setup { faults });
        }

        let mut stages: BTreeMap<StageId, Arc<Stage>> = BTreeMap::new();
        let mut wiring = Vec::with_capacity(registrations.len());
        for (reg, slots) in registrations.iter().zip(requests) {
            let stage = Arc::clone(
                stages
                    .entry(reg.stage)
                    .or_insert_with(|| Arc::new(Stage::new(reg.stage))),
            );
            stage.join();
            tracing::debug!(
                subsystem = %names[reg.index],
                stage = reg.stage.0,
                requires = ?reg.wants.iter().map(|key| key.name).collect::<Vec<_>>(),
                "subsystem wired"
            );
            wiring.push((reg.index, stage, ColumnRequest::new(slots)));
        }
        for (index, stage, request) in wiring {
            if let Some(reply) = &replies[index] {
                // A worker that vanished cannot be waiting for this.
                let _ = reply.send(Some(Attachment { stage, request }));
            }
        }

        let stages: Vec<Arc<Stage>> = stages.into_values().collect();
        tracing::info!(
            subsystems = names.len(),
            stages = stages.len(),
            "world started"
        );
        Ok(Self {
            shared,
            stages,
            workers: Mutex::new(workers),
        })
    }

    /// Advances every stage by one frame, in ascending stage order. Blocks
    /// until the frame is complete. Serialized with other steps and with
    /// transactions; does nothing once the world is closed.
    pub fn step(&self) {
        let mut registry = self.shared.registry.lock();
        if registry.closed {
            return;
        }
        for stage in &self.stages {
            stage.cycle();
        }
        registry.frame += 1;
    }

    /// Opens a transaction. No step or other transaction can proceed until
    /// it is committed or dropped.
    #[must_use]
    pub fn edit(&self) -> Transaction<'_> {
        Transaction::new(self.shared.registry.lock())
    }

    /// Stops the world. Every subsystem's next (or pending) `step` returns
    /// false. Returns once every subsystem has acknowledged; a subsystem
    /// that never calls `step` again blocks this forever.
    pub fn close(&self) {
        let mut registry = self.shared.registry.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;
        for stage in &self.stages {
            stage.kill();
        }
        tracing::info!(frames = registry.frame, "world closed");
    }

    /// Number of completed `step` calls.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.shared.registry.lock().frame
    }

    /// The distinct stages in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id()).collect()
    }

    /// Checks whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.registry.lock().closed
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.close();
        join_all(std::mem::take(self.workers.get_mut()));
    }
}

fn spawn_worker(
    config: &SceneConfig,
    index: usize,
    mut subsystem: Box<dyn Subsystem>,
    shared: Arc<WorldShared>,
    link: SetupLink,
) -> SceneResult<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(format!("{}-{index}", config.thread_name));
    if let Some(size) = config.stack_size {
        builder = builder.stack_size(size);
    }
    let name = subsystem.name().to_string();
    builder
        .spawn(move || {
            let mut ctx = Context::new(index, name, shared, link);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subsystem.run(&mut ctx)))
                .map_err(panic_message);
            ctx.retire(outcome);
        })
        .map_err(|e| SceneError::Spawn {
            reason: e.to_string(),
        })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type Collected = (Vec<Registration>, Vec<SetupFault>);

fn collect_reports(
    reports: &Receiver<(usize, SetupReport)>,
    expected: usize,
    config: &SceneConfig,
    names: &[String],
) -> SceneResult<Collected> {
    let started = Instant::now();
    let deadline = config.setup_timeout().map(|timeout| started + timeout);
    let mut registrations = Vec::with_capacity(expected);
    let mut faults = Vec::new();

    for received in 0..expected {
        let next = match deadline {
            Some(deadline) => reports.recv_deadline(deadline),
            None => reports.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let (index, report) = match next {
            Ok(report) => report,
            Err(RecvTimeoutError::Timeout) => {
                return Err(SceneError::SetupTimeout {
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    pending: expected - received,
                });
            }
            // Every worker reports before its thread ends; losing all
            // senders early means the remaining workers are gone.
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match report {
            SetupReport::Ready { stage, wants } => registrations.push(Registration {
                index,
                stage,
                wants,
            }),
            SetupReport::Failed(error) => faults.push(SetupFault {
                index,
                subsystem: names[index].clone(),
                error,
            }),
        }
    }
    Ok((registrations, faults))
}

/// Tells every worker still waiting on setup that it will never run.
fn abort(replies: &[Option<Sender<Option<Attachment>>>]) {
    for reply in replies.iter().flatten() {
        let _ = reply.try_send(None);
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        // Panics were already caught and logged inside the worker.
        let _ = worker.join();
    }
}
