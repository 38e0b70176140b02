// SPDX-License-Identifier: Apache-2.0

//! Per-input rate-limit instance (`spec.md` §3 "Rate-limit instance",
//! §4.2 token bucket and repeat compression).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use rlog_message::Msg;

use crate::policy::{GlobalBucketConfig, PerSourceOutcome, SharedPolicy};

#[derive(Debug, Default)]
struct TokenBucketState {
    begin: u64,
    done: u32,
    missed: u32,
}

#[derive(Debug, Default)]
struct RepeatState {
    nsupp: u32,
    pending_msg: Option<Msg>,
}

/// Result of classifying one message through `msg()`.
#[derive(Debug, Clone)]
pub enum MsgOutcome {
    /// The message is admitted. `repeat_summary`, if present, is a
    /// synthesized "message repeated N times" summary that the caller
    /// must enqueue *before* the message itself.
    Admit { repeat_summary: Option<Msg> },
    /// The message is dropped (token-bucket limit, or folded into an
    /// in-progress repeat run).
    Discard,
}

/// A per-input rate-limit handle. May own a standalone policy
/// (`interval=0` by default) or share one registered in a
/// [`crate::PolicyRegistry`].
pub struct RatelimitInstance {
    policy: Arc<SharedPolicy>,
    thread_safe: bool,
    no_time_cache: bool,
    bucket: Mutex<TokenBucketState>,
    repeat: Mutex<RepeatState>,
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RatelimitInstance {
    /// `new_from_config`: binds to a named shared policy.
    #[must_use]
    pub fn new_from_config(policy: Arc<SharedPolicy>) -> Self {
        RatelimitInstance {
            policy,
            thread_safe: false,
            no_time_cache: false,
            bucket: Mutex::new(TokenBucketState::default()),
            repeat: Mutex::new(RepeatState::default()),
        }
    }

    /// `new`: a standalone instance owning its own, empty policy
    /// (`interval=0`, i.e. rate-limiting disabled until tuned).
    #[must_use]
    pub fn standalone() -> Self {
        let policy = Arc::new(SharedPolicy::standalone());
        RatelimitInstance::new_from_config(policy)
    }

    /// `set_linux_like`: sets the standalone policy's token-bucket
    /// tunables. Intended to be called during construction only.
    pub fn set_linux_like(&self, interval_seconds: u64, burst: u32) {
        let mut config = self.policy.global_config();
        config.interval_seconds = interval_seconds;
        config.burst = burst;
        self.policy.set_global_config(config);
    }

    pub fn set_severity(&self, severity_threshold: u8) {
        let mut config = self.policy.global_config();
        config.severity_threshold = Some(severity_threshold);
        self.policy.set_global_config(config);
    }

    pub fn set_thread_safe(&mut self, thread_safe: bool) {
        self.thread_safe = thread_safe;
    }

    pub fn set_no_time_cache(&mut self, no_time_cache: bool) {
        self.no_time_cache = no_time_cache;
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<SharedPolicy> {
        &self.policy
    }

    fn time_source(&self, msg: &Msg) -> u64 {
        if self.no_time_cache {
            now_epoch_secs()
        } else {
            msg.generated_epoch_secs()
        }
    }

    fn token_bucket_admit(&self, msg: &Msg, config: &GlobalBucketConfig, now: u64) -> bool {
        if config.interval_seconds == 0 {
            return true;
        }
        if let Some(threshold) = config.severity_threshold {
            if msg.severity().as_u8() > threshold {
                return true;
            }
        }

        let mut bucket = self.bucket.lock();
        if now > bucket.begin + config.interval_seconds || now < bucket.begin {
            if bucket.missed > 0 {
                tracing::warn!(policy = %self.policy.name(), missed = bucket.missed, "messages lost due to rate-limiting");
            }
            bucket.begin = now;
            bucket.done = 0;
            bucket.missed = 0;
        }

        if bucket.done < config.burst {
            bucket.done += 1;
            true
        } else {
            if bucket.missed == 0 {
                tracing::warn!(policy = %self.policy.name(), "begin to drop messages due to rate-limiting");
            }
            bucket.missed += 1;
            false
        }
    }

    fn repeat_check(&self, msg: &Msg) -> (bool, Option<Msg>) {
        let mut repeat = self.repeat.lock();
        match repeat.pending_msg.take() {
            Some(pending) if msg.is_repeat_of(&pending) => {
                repeat.nsupp += 1;
                repeat.pending_msg = Some(pending);
                (false, None)
            }
            Some(pending) => {
                // `nsupp` counts suppressed repeats only; the pending
                // message was already admitted directly when it first
                // arrived, so it is re-emitted as a summary only if a
                // run actually followed it.
                let summary = (repeat.nsupp > 0).then(|| pending.with_repeated_body(repeat.nsupp));
                repeat.pending_msg = Some(msg.clone());
                repeat.nsupp = 0;
                (true, summary)
            }
            None => {
                repeat.pending_msg = Some(msg.clone());
                repeat.nsupp = 0;
                (true, None)
            }
        }
    }

    /// `msg`: full classification path. Token-bucket check first, then
    /// (if the runtime-wide `reduce_repeat_msgs` flag is set)
    /// repeat-compression.
    pub fn msg(&self, msg: &Msg, reduce_repeat_msgs: bool) -> MsgOutcome {
        let config = self.policy.global_config();
        let now = self.time_source(msg);
        let admitted = self.token_bucket_admit(msg, &config, now);
        self.policy.record_global(admitted);
        if !admitted {
            return MsgOutcome::Discard;
        }

        if reduce_repeat_msgs {
            let (admit, repeat_summary) = self.repeat_check(msg);
            if admit {
                MsgOutcome::Admit { repeat_summary }
            } else {
                MsgOutcome::Discard
            }
        } else {
            MsgOutcome::Admit { repeat_summary: None }
        }
    }

    /// `add_msg_per_source`: as [`Self::msg`], additionally applying
    /// the shared policy's per-source check keyed by `key`. A
    /// per-source drop does not roll back the global admission; the
    /// message is considered "dropped by per-source".
    pub fn msg_per_source(&self, msg: &Msg, key: &str, reduce_repeat_msgs: bool) -> MsgOutcome {
        let outcome = self.msg(msg, reduce_repeat_msgs);
        let MsgOutcome::Admit { repeat_summary } = outcome else {
            return MsgOutcome::Discard;
        };
        let Some(per_source) = self.policy.per_source() else {
            return MsgOutcome::Admit { repeat_summary };
        };
        let now = self.time_source(msg);
        match per_source.check(key, now) {
            PerSourceOutcome::Admit => MsgOutcome::Admit { repeat_summary },
            PerSourceOutcome::Dropped => MsgOutcome::Discard,
        }
    }

    /// `destruct`: flushes any unflushed repeat run and reports a
    /// final "N messages lost" status if `missed>0`.
    pub fn destruct(&self) -> Option<Msg> {
        let summary = {
            let mut repeat = self.repeat.lock();
            let pending = repeat.pending_msg.take();
            let nsupp = repeat.nsupp;
            repeat.nsupp = 0;
            // As in `repeat_check`: the pending message was already
            // admitted directly, so only flush a summary if a
            // suppressed run actually followed it.
            pending.filter(|_| nsupp > 0).map(|p| p.with_repeated_body(nsupp))
        };
        let bucket = self.bucket.lock();
        if bucket.missed > 0 {
            tracing::warn!(policy = %self.policy.name(), missed = bucket.missed, "messages lost due to rate-limiting");
        }
        summary
    }
}
