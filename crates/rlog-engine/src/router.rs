// SPDX-License-Identifier: Apache-2.0

//! Ties rate limiting, the bounded queue, and action dispatch into one
//! submission path (`spec.md` §1 OVERVIEW: "classify, queue, dispatch").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use rlog_action::{Action, ActionState, Batch};
use rlog_message::Msg;
use rlog_queue::Queue;
use rlog_ratelimit::{MsgOutcome, RatelimitInstance};

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `Router` runs a single dispatch thread per action, so there is only
/// ever one worker id to register.
const ROUTER_WORKER_ID: rlog_action::WorkerId = 0;

pub struct RouterConfig {
    pub reduce_repeat_msgs: bool,
    pub dequeue_batch_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig { reduce_repeat_msgs: true, dequeue_batch_size: 256 }
    }
}

/// One ruleset's worth of wiring: a rate-limit instance gating
/// admission, a bounded queue holding admitted messages, and an action
/// whose worker thread drains it.
pub struct Router {
    config: RouterConfig,
    ratelimit: Arc<RatelimitInstance>,
    queue: Arc<Queue>,
    action: Arc<Action>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    #[must_use]
    pub fn new(
        config: RouterConfig,
        ratelimit: Arc<RatelimitInstance>,
        queue: Arc<Queue>,
        action: Arc<Action>,
    ) -> Arc<Self> {
        let router = Arc::new(Router {
            config,
            ratelimit,
            queue,
            action,
            running: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        });
        router.spawn_worker();
        router
    }

    fn spawn_worker(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("rlog-router-worker".into())
            .spawn(move || router.worker_loop())
            .expect("spawn router worker thread");
        *self.worker.lock() = Some(handle);
    }

    fn worker_loop(&self) {
        self.action.register_worker(ROUTER_WORKER_ID, now_epoch_secs());

        // Driven by `running` rather than queue depth: a permanently
        // suspended action retains its element on every pass, so depth
        // never reaches zero on its own and must not gate shutdown.
        while self.running.load(Ordering::Acquire) {
            let Some(first) = self.queue.dequeue() else {
                break;
            };
            let mut messages = vec![first];
            while messages.len() < self.config.dequeue_batch_size {
                match self.queue.try_dequeue_one() {
                    Some(msg) => messages.push(msg),
                    None => break,
                }
            }

            let mut batch = Batch::from_messages(messages);
            self.action.process_batch(&mut batch, now_epoch_secs());
            let retained = batch.retained();
            let has_retained = !retained.is_empty();
            for msg in retained {
                // At-least-once: still-outstanding elements (suspended
                // action, deferred commit never resolved) go back on
                // the queue for the next pass.
                self.queue.enqueue(msg);
            }

            if has_retained && self.action.state() == ActionState::Susp {
                // The action is backing off; without this, a suspended
                // action's retained element would be redequeued and
                // resuspended on every iteration with no delay.
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        self.action.unregister_worker(ROUTER_WORKER_ID);
    }

    /// `submit`: classifies `msg` through the rate-limit instance and,
    /// if admitted, enqueues it (and any folded repeat-compression
    /// summary, which is enqueued first to preserve ordering).
    pub fn submit(&self, msg: Msg) -> bool {
        match self.ratelimit.msg(&msg, self.config.reduce_repeat_msgs) {
            MsgOutcome::Admit { repeat_summary } => {
                if let Some(summary) = repeat_summary {
                    self.queue.enqueue(summary);
                }
                self.queue.enqueue(msg);
                true
            }
            MsgOutcome::Discard => false,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    #[must_use]
    pub fn action(&self) -> &Arc<Action> {
        &self.action
    }

    /// Flushes any pending repeat-compression summary, shuts the queue
    /// down (spilling its backlog to disk if disk-assist is
    /// configured), and joins the worker thread.
    pub fn shutdown(&self) {
        if let Some(summary) = self.ratelimit.destruct() {
            self.queue.enqueue(summary);
        }
        self.running.store(false, Ordering::Release);
        // Wakes a worker blocked in `dequeue` and spills whatever is
        // queued right now.
        if let Err(err) = self.queue.shutdown() {
            tracing::error!(error = %err, "queue shutdown failed");
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        // The worker may have been mid-batch when the call above ran
        // and re-enqueued a retained element afterwards; a second pass
        // catches it rather than leaving it stranded in memory.
        if let Err(err) = self.queue.shutdown() {
            tracing::error!(error = %err, "final queue shutdown failed");
        }
    }
}
