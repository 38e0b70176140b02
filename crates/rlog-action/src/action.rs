// SPDX-License-Identifier: Apache-2.0

//! The action state machine: submission, commit, suspension backoff,
//! failure accounting (`spec.md` §4.3).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::batch::{Batch, ElementState};
use crate::module::{ActionModule, ActionResult};
use crate::worker::{WorkerId, WorkerRegistry};

/// `spec.md` §4.3: "States of an action".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Rdy,
    Itx,
    Comm,
    Rtry,
    Susp,
    Died,
}

#[derive(Debug, Clone)]
pub struct SuspensionConfig {
    /// Initial resume delay in seconds.
    pub resume_interval: u64,
    /// Cap on the doubled resume delay.
    pub resume_interval_max: u64,
    /// Number of resume attempts before the action dies; `-1` means
    /// unlimited.
    pub resume_retry_count: i64,
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        SuspensionConfig {
            resume_interval: 10,
            resume_interval_max: 180,
            resume_retry_count: -1,
        }
    }
}

#[derive(Debug, Default)]
struct SuspendState {
    current_interval: u64,
    tt_resume_retry: Option<u64>,
    retries_remaining: i64,
    entered_at: Option<u64>,
}

/// Atomic counters updated under `spec.md` §4.3 "Failure accounting".
#[derive(Debug, Default)]
pub struct ActionCounters {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub suspended: AtomicU64,
    pub resumed: AtomicU64,
    pub suspend_duration_secs: AtomicU64,
}

impl ActionCounters {
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.suspended.load(Ordering::Relaxed),
            self.resumed.load(Ordering::Relaxed),
            self.suspend_duration_secs.load(Ordering::Relaxed),
        )
    }
}

/// A configured output binding bound to its module implementation.
pub struct Action {
    name: String,
    module: Arc<dyn ActionModule>,
    transactional: bool,
    disabled: AtomicBool,
    state: Mutex<ActionState>,
    suspend: Mutex<SuspendState>,
    suspension_config: SuspensionConfig,
    counters: ActionCounters,
    /// Worker threads currently dispatching batches through this
    /// action, keyed by the epoch second each one registered at
    /// (`spec.md` §4.3 "Worker bookkeeping" — `wrkrDataTable`).
    workers: WorkerRegistry<u64>,
}

impl Action {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        module: Arc<dyn ActionModule>,
        transactional: bool,
        suspension_config: SuspensionConfig,
    ) -> Self {
        let retries_remaining = suspension_config.resume_retry_count;
        Action {
            name: name.into(),
            module,
            transactional,
            disabled: AtomicBool::new(false),
            state: Mutex::new(ActionState::Rdy),
            suspend: Mutex::new(SuspendState {
                current_interval: suspension_config.resume_interval,
                tt_resume_retry: None,
                retries_remaining,
                entered_at: None,
            }),
            suspension_config,
            counters: ActionCounters::default(),
            workers: WorkerRegistry::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> ActionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn counters(&self) -> &ActionCounters {
        &self.counters
    }

    /// Registers a worker thread as actively dispatching batches
    /// through this action, `now` being its registration time.
    pub fn register_worker(&self, id: WorkerId, now: u64) {
        self.workers.register(id, now);
    }

    /// Drops a worker's bookkeeping entry, e.g. when its thread exits.
    pub fn unregister_worker(&self, id: WorkerId) {
        self.workers.unregister(id);
    }

    /// Number of worker threads currently registered against this
    /// action.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn enter_suspended(&self, now: u64) {
        let mut state = self.state.lock();
        let was_rdy_or_itx = matches!(*state, ActionState::Rdy | ActionState::Itx | ActionState::Comm);
        *state = ActionState::Susp;
        drop(state);

        let mut suspend = self.suspend.lock();
        suspend.tt_resume_retry = Some(now + suspend.current_interval);
        suspend.entered_at = Some(now);
        drop(suspend);

        if was_rdy_or_itx {
            self.counters.suspended.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Checks whether a suspended action may retry yet; on resume,
    /// doubles the backoff interval (capped) and decrements the retry
    /// budget, transitioning to `Died` (and CAS-disabling the action)
    /// once the budget is exhausted.
    fn try_resume(&self, now: u64) -> bool {
        let mut state = self.state.lock();
        if *state != ActionState::Susp {
            return true;
        }

        let mut suspend = self.suspend.lock();
        let Some(deadline) = suspend.tt_resume_retry else {
            *state = ActionState::Rdy;
            return true;
        };
        if now < deadline {
            return false;
        }

        if let Some(entered_at) = suspend.entered_at.take() {
            self.counters
                .suspend_duration_secs
                .fetch_add(now.saturating_sub(entered_at), Ordering::Relaxed);
        }

        if suspend.retries_remaining == 0 {
            *state = ActionState::Died;
            self.disabled.store(true, Ordering::Release);
            return false;
        }
        if suspend.retries_remaining > 0 {
            suspend.retries_remaining -= 1;
        }

        suspend.current_interval =
            (suspend.current_interval * 2).min(self.suspension_config.resume_interval_max);
        *state = ActionState::Rdy;
        drop(suspend);
        drop(state);
        self.counters.resumed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// `processBatch`: runs every non-committed element through
    /// `do_action`, applying each return code's effect on element and
    /// action state. Returns once every element is terminal
    /// (`Committed`/`Discarded`) or the action has suspended.
    pub fn process_batch(&self, batch: &mut Batch, now: u64) {
        if self.is_disabled() {
            for element in batch.elements_mut() {
                element.state = ElementState::Discarded;
            }
            self.counters
                .failed
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            return;
        }

        if self.state() == ActionState::Susp && !self.try_resume(now) {
            // Still within the backoff window: every element is
            // retried by the caller, nothing is marked terminal.
            return;
        }

        if self.transactional {
            if let ActionResult::Fatal(reason) = self.module.begin_transaction() {
                tracing::error!(action = %self.name, error = %reason, "begin_transaction failed");
                self.enter_suspended(now);
                return;
            }
            *self.state.lock() = ActionState::Itx;
        }

        let mut any_deferred = false;
        let elements = batch.elements_mut();
        for i in 0..elements.len() {
            if elements[i].state == ElementState::Committed {
                continue;
            }
            self.counters.processed.fetch_add(1, Ordering::Relaxed);

            match self.module.do_action(&elements[i].msg) {
                ActionResult::Ok => {
                    elements[i].state = ElementState::Committed;
                }
                ActionResult::DeferCommit => {
                    elements[i].state = ElementState::Submitted;
                    any_deferred = true;
                }
                ActionResult::PreviousCommitted => {
                    for prior in &mut elements[..i] {
                        if prior.state == ElementState::Submitted {
                            prior.state = ElementState::Committed;
                        }
                    }
                    elements[i].state = ElementState::Submitted;
                    any_deferred = true;
                }
                ActionResult::Suspended => {
                    self.enter_suspended(now);
                    return;
                }
                ActionResult::Fatal(reason) => {
                    tracing::error!(action = %self.name, error = %reason, "do_action failed");
                    elements[i].state = ElementState::Discarded;
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if self.transactional && any_deferred {
            *self.state.lock() = ActionState::Comm;
            match self.module.end_transaction() {
                ActionResult::Suspended => {
                    self.enter_suspended(now);
                    return;
                }
                ActionResult::Fatal(reason) => {
                    tracing::error!(action = %self.name, error = %reason, "end_transaction failed");
                    for element in batch.elements_mut() {
                        if element.state == ElementState::Submitted {
                            element.state = ElementState::Discarded;
                            self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ => {
                    for element in batch.elements_mut() {
                        if element.state == ElementState::Submitted {
                            element.state = ElementState::Committed;
                        }
                    }
                }
            }
        }

        *self.state.lock() = ActionState::Rdy;
    }
}
