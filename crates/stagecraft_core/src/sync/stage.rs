//! # Stage Barrier
//!
//! Lockstep rendezvous for every subsystem in one stage.
//!
//! ```text
//!   driver (World::step)                 worker (Context::step)
//!   ────────────────────                 ──────────────────────
//!   wait current == 0      <──────────   current -= 1, next += 1
//!   swap(current, next)                  sleep until frame changes
//!   frame += 1, wake all   ──────────>   run one frame
//!   wait current == 0      <──────────   current -= 1, next += 1 ...
//! ```
//!
//! `current` counts workers still owed one report for the running frame,
//! `next` counts workers already parked for the following one. Swapping the
//! two generations at each cycle means a wakeup can never be lost between
//! cycles, whatever the number of workers.

use parking_lot::{Condvar, Mutex};

use crate::context::StageId;

#[derive(Debug)]
struct Generations {
    current: usize,
    next: usize,
    frame: u64,
    alive: bool,
}

/// Barrier shared by the world and every worker of one stage.
#[derive(Debug)]
pub(crate) struct Stage {
    id: StageId,
    state: Mutex<Generations>,
    /// Workers park here between frames.
    resume: Condvar,
    /// The driver parks here until `current` drains.
    settled: Condvar,
}

impl Stage {
    pub(crate) fn new(id: StageId) -> Self {
        Self {
            id,
            state: Mutex::new(Generations {
                current: 0,
                next: 0,
                frame: 0,
                alive: true,
            }),
            resume: Condvar::new(),
            settled: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> StageId {
        self.id
    }

    /// Registers a worker that is still running its setup frame.
    pub(crate) fn join(&self) {
        self.state.lock().current += 1;
    }

    /// Frame counter, incremented by every cycle.
    pub(crate) fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// Lets every parked worker run one frame and waits for all of them to
    /// report back.
    pub(crate) fn cycle(&self) {
        self.advance(false);
    }

    /// Like `cycle`, but every woken worker observes death instead of
    /// running a frame.
    pub(crate) fn kill(&self) {
        self.advance(true);
    }

    fn advance(&self, kill: bool) {
        let mut state = self.state.lock();
        while state.current > 0 {
            self.settled.wait(&mut state);
        }
        if !state.alive {
            return;
        }
        let gens = &mut *state;
        std::mem::swap(&mut gens.current, &mut gens.next);
        if kill {
            state.alive = false;
        }
        state.frame += 1;
        tracing::trace!(
            stage = self.id.0,
            frame = state.frame,
            workers = state.current,
            kill,
            "stage cycle"
        );
        self.resume.notify_all();
        while state.current > 0 {
            self.settled.wait(&mut state);
        }
    }

    /// Reports the caller's frame as done and parks until the next cycle.
    ///
    /// Returns false if the stage died while parked, or was already dead.
    pub(crate) fn wait(&self) -> bool {
        let mut state = self.state.lock();
        if !state.alive {
            return false;
        }
        state.current -= 1;
        state.next += 1;
        if state.current == 0 {
            self.settled.notify_all();
        }
        let frame = state.frame;
        while state.frame == frame {
            self.resume.wait(&mut state);
        }
        if !state.alive {
            // The kill cycle still counts us once.
            Self::report(&mut state, &self.settled);
            return false;
        }
        true
    }

    /// Withdraws a worker that is owed a report but will never park again.
    pub(crate) fn leave(&self) {
        let mut state = self.state.lock();
        Self::report(&mut state, &self.settled);
    }

    fn report(state: &mut Generations, settled: &Condvar) {
        state.current -= 1;
        if state.current == 0 {
            settled.notify_all();
        }
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.current, state.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn spawn_workers(
        stage: &Arc<Stage>,
        count: usize,
        frames: &Arc<AtomicUsize>,
    ) -> Vec<thread::JoinHandle<usize>> {
        (0..count)
            .map(|_| {
                stage.join();
                let stage = Arc::clone(stage);
                let frames = Arc::clone(frames);
                thread::spawn(move || {
                    let mut ran = 0;
                    while stage.wait() {
                        frames.fetch_add(1, Ordering::SeqCst);
                        ran += 1;
                    }
                    ran
                })
            })
            .collect()
    }

    #[test]
    fn test_cycle_runs_each_worker_once() {
        let stage = Arc::new(Stage::new(StageId(0)));
        let frames = Arc::new(AtomicUsize::new(0));
        let workers = spawn_workers(&stage, 4, &frames);

        for n in 1..=5 {
            stage.cycle();
            // cycle returns only after every worker finished its frame
            assert_eq!(frames.load(Ordering::SeqCst), 4 * n);
            assert_eq!(stage.frame(), n as u64);
        }

        stage.kill();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), 5);
        }
        assert_eq!(stage.counts(), (0, 0));
    }

    #[test]
    fn test_wait_after_kill_returns_immediately() {
        let stage = Stage::new(StageId(3));
        stage.kill();
        assert!(!stage.wait());
        // cycling a dead stage is a no-op
        stage.cycle();
        assert_eq!(stage.frame(), 1);
    }

    #[test]
    fn test_leave_unblocks_kill() {
        let stage = Arc::new(Stage::new(StageId(0)));
        stage.join();
        stage.join();

        let parked = {
            let stage = Arc::clone(&stage);
            thread::spawn(move || stage.wait())
        };
        // Second worker exits without ever parking.
        stage.leave();

        stage.kill();
        assert!(!parked.join().unwrap());
    }

    #[test]
    fn test_empty_stage_cycles() {
        let stage = Stage::new(StageId(1));
        stage.cycle();
        stage.cycle();
        assert_eq!(stage.frame(), 2);
        assert_eq!(stage.id(), StageId(1));
    }
}
