// SPDX-License-Identifier: Apache-2.0

//! Process-wide mutable state, isolated into one object per `spec.md`
//! §9's design note on the original's scattered globals
//! (`Debug`, `runConf`, `loadConf`, `bTerminateInputs`). Every field
//! that used to be a bare global is an explicit atomic here, and the
//! object is passed by shared reference (`Arc`) rather than reached
//! for implicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, lock-free process state consulted across subsystems.
#[derive(Debug)]
pub struct ProcessContext {
    /// Polled by input loops; set by the control plane on `SIGTERM`/
    /// `SIGINT` (subject to `shutdown_enable_ctlc`) to stop admitting
    /// new work while shutdown drains in-flight messages.
    terminate_inputs: AtomicBool,
    /// If set, a configuration error at startup aborts the process
    /// instead of disabling the offending object (`spec.md` §7).
    abort_on_unclean_config: AtomicBool,
    /// If set, a queue that fails to start aborts the process.
    abort_on_failed_queue_startup: AtomicBool,
    /// Global switch for repeat-message compression (`spec.md` §4.2).
    reduce_repeat_msgs: AtomicBool,
    /// Whether `SIGINT` runs the full shutdown sequence.
    shutdown_enable_ctlc: AtomicBool,
}

impl Default for ProcessContext {
    fn default() -> Self {
        ProcessContext {
            terminate_inputs: AtomicBool::new(false),
            abort_on_unclean_config: AtomicBool::new(false),
            abort_on_failed_queue_startup: AtomicBool::new(false),
            reduce_repeat_msgs: AtomicBool::new(true),
            shutdown_enable_ctlc: AtomicBool::new(false),
        }
    }
}

impl ProcessContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(ProcessContext::default())
    }

    #[must_use]
    pub fn terminate_inputs(&self) -> bool {
        self.terminate_inputs.load(Ordering::Acquire)
    }

    pub fn set_terminate_inputs(&self, value: bool) {
        self.terminate_inputs.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn abort_on_unclean_config(&self) -> bool {
        self.abort_on_unclean_config.load(Ordering::Acquire)
    }

    pub fn set_abort_on_unclean_config(&self, value: bool) {
        self.abort_on_unclean_config.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn abort_on_failed_queue_startup(&self) -> bool {
        self.abort_on_failed_queue_startup.load(Ordering::Acquire)
    }

    pub fn set_abort_on_failed_queue_startup(&self, value: bool) {
        self.abort_on_failed_queue_startup
            .store(value, Ordering::Release);
    }

    #[must_use]
    pub fn reduce_repeat_msgs(&self) -> bool {
        self.reduce_repeat_msgs.load(Ordering::Acquire)
    }

    pub fn set_reduce_repeat_msgs(&self, value: bool) {
        self.reduce_repeat_msgs.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn shutdown_enable_ctlc(&self) -> bool {
        self.shutdown_enable_ctlc.load(Ordering::Acquire)
    }

    pub fn set_shutdown_enable_ctlc(&self, value: bool) {
        self.shutdown_enable_ctlc.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_engine_behaviour() {
        let ctx = ProcessContext::default();
        assert!(!ctx.terminate_inputs());
        assert!(ctx.reduce_repeat_msgs());
        assert!(!ctx.shutdown_enable_ctlc());
    }

    #[test]
    fn flags_are_independently_settable() {
        let ctx = ProcessContext::default();
        ctx.set_terminate_inputs(true);
        ctx.set_reduce_repeat_msgs(false);
        assert!(ctx.terminate_inputs());
        assert!(!ctx.reduce_repeat_msgs());
        assert!(!ctx.abort_on_unclean_config());
    }
}
