//! Subgame parallelism.
//!
//! At the configured split street the pre-phase pass packages each
//! street-initial subtree into a [`Subgame`] and hands it to a bounded
//! [`SubgamePool`]. Workers run the same traversal recursion against the
//! shared stores (they touch disjoint nonterminals by construction) and
//! deposit a value vector for the parent street; the non-prephase pass picks
//! those up from the engine's final-vals cache.
//!
//! The completion protocol is ordering-sensitive: a worker clears its
//! running flag *before* posting the semaphore, so a semaphore wake always
//! finds at least one joinable slot somewhere in the scan.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::engine::{CfrEngine, EngineContext};
use crate::error::EngineError;
use crate::tree::NodeId;
use crate::values::{CfrTables, CurrentStrategy};

/// Counting semaphore. `parking_lot` primitives, no spurious-wake immunity
/// assumed by callers.
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Reset the token count. Only safe while no waiter is blocked.
    pub fn reset(&self, count: usize) {
        *self.count.lock() = count;
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        *self.count.lock()
    }
}

/// An independently solvable subtree below the split street: a snapshot of
/// everything the worker needs, plus the result slot it fills in.
pub struct Subgame {
    ctx: Arc<EngineContext>,
    regrets: Arc<CfrTables>,
    sumprobs: Arc<CfrTables>,
    current_strategy: Option<Arc<CurrentStrategy>>,

    root: NodeId,
    /// Parent-street local board index in the spawning engine's coordinates;
    /// keys the final-vals cache.
    parent_lbd: usize,
    /// Parent-street global board index; roots the worker's traversal.
    root_gbd: usize,
    action_seq: String,

    p: usize,
    target_p: usize,
    it: u32,
    last_checkpoint_it: u32,
    opp_probs: Vec<f64>,
    value_calculation: bool,
    br_current: bool,
    best_response_streets: Vec<bool>,

    outcome: Option<Result<Vec<f64>, EngineError>>,
}

impl Subgame {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        regrets: Arc<CfrTables>,
        sumprobs: Arc<CfrTables>,
        current_strategy: Option<Arc<CurrentStrategy>>,
        root: NodeId,
        parent_lbd: usize,
        root_gbd: usize,
        action_seq: String,
        p: usize,
        target_p: usize,
        it: u32,
        last_checkpoint_it: u32,
        opp_probs: Vec<f64>,
        value_calculation: bool,
        br_current: bool,
        best_response_streets: Vec<bool>,
    ) -> Self {
        Self {
            ctx,
            regrets,
            sumprobs,
            current_strategy,
            root,
            parent_lbd,
            root_gbd,
            action_seq,
            p,
            target_p,
            it,
            last_checkpoint_it,
            opp_probs,
            value_calculation,
            br_current,
            best_response_streets,
            outcome: None,
        }
    }

    /// Solve the subtree: run the street-initial expansion at the split
    /// street with this subgame's board as the traversal root.
    pub fn run(&mut self) {
        let root_street = self.ctx.tree().node(self.root).street();
        let parent_street = root_street - 1;
        let mut engine = CfrEngine::subgame_instance(
            Arc::clone(&self.ctx),
            Arc::clone(&self.regrets),
            Arc::clone(&self.sumprobs),
            self.current_strategy.clone(),
            parent_street,
            self.root_gbd,
        );
        engine.set_iteration(self.it);
        engine.set_last_checkpoint_it(self.last_checkpoint_it);
        engine.set_target_p(self.target_p);
        engine.set_value_calculation(self.value_calculation);
        engine.set_br_current(self.br_current);
        if let Err(err) = engine.set_best_response_streets(self.best_response_streets.clone()) {
            self.outcome = Some(Err(err));
            return;
        }
        log::debug!(
            "subgame {} board {} player {} it {} starting",
            self.action_seq,
            self.root_gbd,
            self.p,
            self.it
        );
        let action_seq = self.action_seq.clone();
        let opp_probs = std::mem::take(&mut self.opp_probs);
        self.outcome = Some(engine.run_subgame(self.root, self.p, &opp_probs, &action_seq));
    }

    /// Root node of the subtree.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Parent-street local board index, keying the final-vals cache.
    #[must_use]
    pub fn parent_lbd(&self) -> usize {
        self.parent_lbd
    }

    /// Transfer the solved value vector out of the subgame.
    ///
    /// # Errors
    ///
    /// Propagates any traversal error from the worker; a subgame that never
    /// ran reports a concurrency-invariant violation.
    pub fn take_final_vals(&mut self) -> Result<Vec<f64>, EngineError> {
        self.outcome.take().unwrap_or_else(|| {
            Err(EngineError::ConcurrencyInvariant(
                "subgame joined before it ran".into(),
            ))
        })
    }
}

struct Slot {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Subgame>>,
}

/// Bounded worker pool for subgame solves.
///
/// Slot state is owned here: `running` marks a live worker, a retained join
/// handle marks results not yet harvested. The semaphore is reset to the
/// slot count at the start of each pre-phase pass and drains back to zero by
/// the time [`SubgamePool::wait_for_all`] returns.
pub struct SubgamePool {
    slots: Vec<Slot>,
    available: Arc<Semaphore>,
    num_active: usize,
}

impl SubgamePool {
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        let slots = (0..num_threads)
            .map(|_| Slot {
                running: Arc::new(AtomicBool::new(false)),
                worker: None,
            })
            .collect();
        Self {
            slots,
            available: Arc::new(Semaphore::new(0)),
            num_active: 0,
        }
    }

    /// Make every slot's token available for the coming spawn pass.
    pub fn reset_for_pass(&self) {
        self.available.reset(self.slots.len());
    }

    /// Hand a subgame to a worker slot, blocking while the pool is full.
    ///
    /// When the chosen slot still holds a completed-but-unharvested subgame
    /// it is joined first and returned to the caller.
    ///
    /// # Errors
    ///
    /// Fails when the semaphore wake finds no free slot or the OS refuses to
    /// spawn a thread.
    pub fn spawn(&mut self, subgame: Subgame) -> Result<Option<Subgame>, EngineError> {
        self.available.wait();
        let t = self
            .slots
            .iter()
            .position(|slot| !slot.running.load(Ordering::Acquire))
            .ok_or_else(|| {
                EngineError::ConcurrencyInvariant(
                    "semaphore wake found every slot running".into(),
                )
            })?;

        let stale = match self.slots[t].worker.take() {
            Some(handle) => {
                let joined = join_worker(handle)?;
                self.num_active -= 1;
                Some(joined)
            }
            None => None,
        };

        let slot = &mut self.slots[t];
        slot.running.store(true, Ordering::Release);
        let running = Arc::clone(&slot.running);
        let available = Arc::clone(&self.available);
        let handle = std::thread::Builder::new()
            .name(format!("subgame-{t}"))
            .spawn(move || {
                let mut subgame = subgame;
                subgame.run();
                // Clear the flag before posting: a wake must always find a
                // joinable slot.
                running.store(false, Ordering::Release);
                available.post();
                subgame
            })
            .map_err(|e| {
                EngineError::ConcurrencyInvariant(format!("thread creation failed: {e}"))
            })?;
        slot.worker = Some(handle);
        self.num_active += 1;
        Ok(stale)
    }

    /// Join every outstanding subgame, feeding each to `harvest` as it
    /// completes. Idempotent: with nothing outstanding this returns at once.
    ///
    /// # Errors
    ///
    /// Fails when the live-active counter disagrees with a direct slot scan,
    /// or when a worker panicked.
    pub fn wait_for_all(
        &mut self,
        mut harvest: impl FnMut(Subgame) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let mut remaining = self.slots.iter().filter(|s| s.worker.is_some()).count();
        if remaining != self.num_active {
            return Err(EngineError::ConcurrencyInvariant(format!(
                "{} active subgames but {} occupied slots",
                self.num_active, remaining
            )));
        }
        while remaining > 0 {
            self.available.wait();
            // The wake may correspond to a slot joined on an earlier pass;
            // an empty scan just waits again.
            let joinable = self.slots.iter().position(|slot| {
                !slot.running.load(Ordering::Acquire) && slot.worker.is_some()
            });
            if let Some(t) = joinable {
                let handle = self.slots[t].worker.take().expect("scanned occupied slot");
                let subgame = join_worker(handle)?;
                self.num_active -= 1;
                remaining -= 1;
                harvest(subgame)?;
            }
        }
        if self.num_active != 0 {
            return Err(EngineError::ConcurrencyInvariant(format!(
                "{} subgames still active after join-all",
                self.num_active
            )));
        }
        Ok(())
    }

    /// Number of slots.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.slots.len()
    }
}

fn join_worker(handle: JoinHandle<Subgame>) -> Result<Subgame, EngineError> {
    handle
        .join()
        .map_err(|_| EngineError::ConcurrencyInvariant("subgame worker panicked".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_macros::timed_test;

    #[timed_test]
    fn semaphore_counts_posts_and_waits() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.post();
        assert_eq!(sem.available(), 2);
        sem.wait();
        assert_eq!(sem.available(), 1);
        sem.reset(5);
        assert_eq!(sem.available(), 5);
    }

    #[timed_test]
    fn semaphore_unblocks_cross_thread() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let waiter = std::thread::spawn(move || sem2.wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        sem.post();
        waiter.join().unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[timed_test]
    fn empty_pool_join_all_is_a_noop() {
        let mut pool = SubgamePool::new(2);
        pool.reset_for_pass();
        pool.wait_for_all(|_| panic!("nothing to harvest")).unwrap();
        pool.wait_for_all(|_| panic!("nothing to harvest")).unwrap();
    }
}
