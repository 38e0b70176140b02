// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory message queue with flow control and
//! disk-assisted overflow (`spec.md` §4.4).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use rlog_config::Result;
use rlog_message::Msg;

use crate::disk::{DiskQueue, DiskQueueConfig};

/// The flow-control class a producer currently falls under, derived
/// from queue depth against the configured watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowClass {
    Regular,
    LightDelay,
    FullDelay,
}

/// Depth thresholds governing admission and disk-assist behaviour.
#[derive(Debug, Clone)]
pub struct Watermarks {
    /// Hard cap on in-memory depth; `enqueue` blocks above this unless
    /// disk-assist is enabled.
    pub capacity: usize,
    /// Disk-assist activates once depth reaches this mark.
    pub high: usize,
    /// Disk-assist stays active until depth drops back below this mark.
    pub low: usize,
    /// Above this depth, only messages whose severity is `<= discard_severity`
    /// are admitted; all others are silently counted as discarded.
    pub discard: usize,
    pub discard_severity: u8,
    /// Above this depth, `Regular` producers block (`FlowClass::FullDelay`).
    pub full_delay: usize,
    /// Above this depth, below `full_delay`, producers may be asked to
    /// slow down cooperatively (`FlowClass::LightDelay`); this core
    /// treats it identically to `Regular` since there is no separate
    /// caller-visible throttle signal beyond the returned class.
    pub light_delay: usize,
}

impl Default for Watermarks {
    fn default() -> Self {
        Watermarks {
            capacity: 10_000,
            high: 8_000,
            low: 4_000,
            discard: 9_800,
            discard_severity: 3,
            full_delay: 9_000,
            light_delay: 7_000,
        }
    }
}

pub struct QueueConfig {
    pub watermarks: Watermarks,
    /// When `Some`, disk-assist overflow is backed by a [`DiskQueue`]
    /// rooted at this directory; when `None`, the queue is purely
    /// in-memory and simply blocks at `capacity`.
    pub disk_dir: Option<PathBuf>,
    pub disk_prefix: String,
    pub max_file_size: u64,
    pub file_num_digits: usize,
    pub persist_upd_cnt: u64,
    /// Upper bound on how long `enqueue` blocks waiting for room before
    /// giving up and discarding (`spec.md` §4.4 "toEnq").
    pub enqueue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            watermarks: Watermarks::default(),
            disk_dir: None,
            disk_prefix: String::from("rlog-queue"),
            max_file_size: 16 * 1024 * 1024,
            file_num_digits: 7,
            persist_upd_cnt: 10,
            enqueue_timeout: Duration::from_secs(2),
        }
    }
}

struct Inner {
    items: VecDeque<Msg>,
    da_active: bool,
    shutting_down: bool,
    discarded: u64,
    spilled_to_disk: u64,
    disk: Option<DiskQueue>,
}

/// Outcome of a single `enqueue` call, for callers that want to track
/// admission statistics without re-reading the queue's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Admitted,
    Discarded,
}

/// The bounded queue itself: a `VecDeque` guarded by one mutex, with
/// condition variables signalling the transitions producers and the
/// consumer worker block on.
pub struct Queue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
    below_full_delay: Condvar,
    below_light_delay: Condvar,
}

impl Queue {
    /// Builds a queue; opens its disk-assist child eagerly if
    /// `config.disk_dir` is set, so a prior run's spilled backlog (see
    /// Scenario S7) is visible before the first `enqueue`/`dequeue`.
    pub fn new(config: QueueConfig) -> Result<Self> {
        let disk = match &config.disk_dir {
            Some(dir) => Some(DiskQueue::open(DiskQueueConfig {
                dir: dir.clone(),
                prefix: config.disk_prefix.clone(),
                max_file_size: config.max_file_size,
                file_num_digits: config.file_num_digits,
                persist_upd_cnt: config.persist_upd_cnt,
            })?),
            None => None,
        };
        let da_active = disk.as_ref().is_some_and(|d| !d.is_empty());

        Ok(Queue {
            config,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                da_active,
                shutting_down: false,
                discarded: 0,
                spilled_to_disk: 0,
                disk,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            below_full_delay: Condvar::new(),
            below_light_delay: Condvar::new(),
        })
    }

    #[must_use]
    pub fn flow_class(&self) -> FlowClass {
        let inner = self.inner.lock();
        self.flow_class_locked(inner.items.len())
    }

    fn notify_below_watermarks(&self, depth: usize) {
        if depth < self.config.watermarks.capacity {
            self.not_full.notify_one();
        }
        if depth < self.config.watermarks.light_delay {
            self.below_light_delay.notify_all();
        }
        if depth < self.config.watermarks.full_delay {
            self.below_full_delay.notify_all();
        }
    }

    fn flow_class_locked(&self, depth: usize) -> FlowClass {
        let w = &self.config.watermarks;
        if depth >= w.full_delay {
            FlowClass::FullDelay
        } else if depth >= w.light_delay {
            FlowClass::LightDelay
        } else {
            FlowClass::Regular
        }
    }

    /// Convenience wrapper over [`Self::enqueue_with_flow_class`] for
    /// regular-priority producers (the common case).
    pub fn enqueue(&self, msg: Msg) -> EnqueueOutcome {
        self.enqueue_with_flow_class(msg, FlowClass::Regular)
    }

    /// `enqueue`: admits `msg` per `spec.md` §4.4's six-step algorithm —
    /// discard-mark rejection, full/light-delay backpressure gated by
    /// `flow_class`, capacity wait, insertion, then disk-assist spill
    /// once depth crosses the high watermark (resuming in-memory
    /// admission once it drops back below the low watermark).
    pub fn enqueue_with_flow_class(&self, msg: Msg, flow_class: FlowClass) -> EnqueueOutcome {
        let mut inner = self.inner.lock();
        let deadline = std::time::Instant::now() + self.config.enqueue_timeout;

        // Step 1: discard-mark rejection.
        if inner.items.len() >= self.config.watermarks.discard
            && msg.severity().as_u8() > self.config.watermarks.discard_severity
        {
            inner.discarded += 1;
            return EnqueueOutcome::Discarded;
        }

        // Step 2: full-delay backpressure.
        if flow_class == FlowClass::FullDelay {
            while inner.items.len() >= self.config.watermarks.full_delay && !inner.shutting_down {
                if self.below_full_delay.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
        } else if matches!(flow_class, FlowClass::LightDelay) {
            // Step 3: light-delay backpressure (full-delay producers
            // that already passed step 2 do not also wait here).
            while inner.items.len() >= self.config.watermarks.light_delay && !inner.shutting_down {
                if self.below_light_delay.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
        }

        // Step 4: capacity wait, unless disk-assist is already active
        // (in which case overflow goes to disk instead of blocking).
        if !inner.da_active {
            while inner.items.len() >= self.config.watermarks.capacity && !inner.shutting_down {
                if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
            if inner.items.len() >= self.config.watermarks.capacity && self.config.disk_dir.is_none()
            {
                inner.discarded += 1;
                return EnqueueOutcome::Discarded;
            }
        }

        // Step 6 (checked before insertion so the triggering message
        // itself can be the first one spilled): activate disk-assist
        // once depth reaches the high watermark.
        if !inner.da_active
            && self.config.disk_dir.is_some()
            && inner.items.len() >= self.config.watermarks.high
        {
            inner.da_active = true;
        }

        if inner.da_active {
            match inner.disk.as_mut().map(|d| d.push(&msg)) {
                Some(Ok(())) => {
                    inner.spilled_to_disk += 1;
                    if inner.items.len() < self.config.watermarks.low {
                        inner.da_active = false;
                    }
                    self.not_empty.notify_one();
                    return EnqueueOutcome::Admitted;
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, "disk-assist write failed, falling back to in-memory admission");
                }
                None => {}
            }
        }

        // Step 5: insert, increment depth, signal waiters.
        inner.items.push_back(msg);
        self.not_empty.notify_one();
        EnqueueOutcome::Admitted
    }

    /// `dequeue`: blocks until a message is available or the queue is
    /// shut down with nothing left to drain. Pulls from the in-memory
    /// deque first; once it is empty and disk-assist holds a backlog,
    /// refills from disk to keep draining in (approximately) original
    /// order.
    pub fn dequeue(&self) -> Option<Msg> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = inner.items.pop_front() {
                self.notify_below_watermarks(inner.items.len());
                return Some(msg);
            }

            let refilled = if let Some(disk) = inner.disk.as_mut() {
                match disk.pop() {
                    Ok(Some(msg)) => {
                        inner.items.push_back(msg);
                        true
                    }
                    Ok(None) => false,
                    Err(err) => {
                        tracing::error!(error = %err, "disk-assist read failed");
                        false
                    }
                }
            } else {
                false
            };
            if refilled {
                continue;
            }

            if inner.shutting_down {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Non-blocking variant of [`Self::dequeue`]: returns `None`
    /// immediately if nothing is available in memory or on the
    /// disk-assist child, instead of waiting.
    pub fn try_dequeue_one(&self) -> Option<Msg> {
        let mut inner = self.inner.lock();
        if let Some(msg) = inner.items.pop_front() {
            self.notify_below_watermarks(inner.items.len());
            return Some(msg);
        }
        if let Some(disk) = inner.disk.as_mut() {
            if let Ok(Some(msg)) = disk.pop() {
                return Some(msg);
            }
        }
        None
    }

    /// Current in-memory depth plus any disk-assist backlog.
    #[must_use]
    pub fn depth(&self) -> u64 {
        let inner = self.inner.lock();
        inner.items.len() as u64 + inner.disk.as_ref().map_or(0, DiskQueue::len)
    }

    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.inner.lock().discarded
    }

    #[must_use]
    pub fn spilled_to_disk(&self) -> u64 {
        self.inner.lock().spilled_to_disk
    }

    /// `shutdown`: per `spec.md` §4.4 "Shutdown", within `toQShutdown`
    /// every message still in memory is spilled to the disk-assist
    /// child so a restart with the same `disk_dir` can resume them in
    /// order (Scenario S7). Wakes any blocked producers/consumers.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.shutting_down = true;

        if inner.disk.is_none() && !inner.items.is_empty() {
            tracing::warn!(
                dropped = inner.items.len(),
                "queue shut down without disk-assist configured, in-memory backlog is lost"
            );
        } else if inner.disk.is_some() {
            let inner = &mut *inner;
            let disk = inner.disk.as_mut().expect("checked is_some above");
            while let Some(msg) = inner.items.pop_front() {
                disk.push(&msg)?;
            }
            disk.persist_index()?;
        }

        self.not_full.notify_all();
        self.not_empty.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlog_message::Severity;
    use std::sync::Arc;

    fn sample(body: &str, severity: Severity) -> Msg {
        Msg::new(body.as_bytes().to_vec(), severity, 1, 0, "127.0.0.1", "s", "h", "a", "1", 514)
    }

    #[test]
    fn fifo_order_is_preserved_in_memory() {
        let q = Queue::new(QueueConfig::default()).expect("new");
        q.enqueue(sample("a", Severity::Notice));
        q.enqueue(sample("b", Severity::Notice));
        assert_eq!(q.dequeue().expect("a").body(), b"a");
        assert_eq!(q.dequeue().expect("b").body(), b"b");
    }

    #[test]
    fn discard_watermark_drops_low_severity_above_threshold() {
        let mut config = QueueConfig::default();
        config.watermarks.discard = 1;
        config.watermarks.discard_severity = 3;
        config.watermarks.capacity = 100;
        config.watermarks.full_delay = 100;
        config.watermarks.light_delay = 100;
        let q = Queue::new(config).expect("new");

        q.enqueue(sample("first", Severity::Notice));
        let outcome = q.enqueue(sample("second", Severity::Informational));
        assert_eq!(outcome, EnqueueOutcome::Discarded);
        assert_eq!(q.discarded(), 1);

        let urgent = q.enqueue(sample("urgent", Severity::Critical));
        assert_eq!(urgent, EnqueueOutcome::Admitted);
    }

    #[test]
    fn flow_class_escalates_with_depth() {
        let mut config = QueueConfig::default();
        config.watermarks.capacity = 10;
        config.watermarks.light_delay = 2;
        config.watermarks.full_delay = 4;
        config.watermarks.discard = 10;
        let q = Queue::new(config).expect("new");
        assert_eq!(q.flow_class(), FlowClass::Regular);
        for _ in 0..3 {
            q.enqueue(sample("x", Severity::Notice));
        }
        assert_eq!(q.flow_class(), FlowClass::LightDelay);
        for _ in 0..2 {
            q.enqueue(sample("x", Severity::Notice));
        }
        assert_eq!(q.flow_class(), FlowClass::FullDelay);
    }

    #[test]
    fn full_delay_producer_blocks_until_a_consumer_drains_below_watermark() {
        let mut config = QueueConfig::default();
        config.watermarks.capacity = 10;
        config.watermarks.full_delay = 1;
        config.watermarks.light_delay = 1;
        config.watermarks.discard = 10;
        config.enqueue_timeout = Duration::from_millis(500);
        let q = Arc::new(Queue::new(config).expect("new"));

        q.enqueue(sample("first", Severity::Notice));
        assert_eq!(q.flow_class(), FlowClass::FullDelay);

        let blocked = Arc::clone(&q);
        let handle = std::thread::spawn(move || {
            blocked.enqueue_with_flow_class(sample("second", Severity::Notice), FlowClass::FullDelay)
        });

        std::thread::sleep(Duration::from_millis(50));
        let drained = q.dequeue().expect("drain the first message");
        assert_eq!(drained.body(), b"first");

        let outcome = handle.join().expect("producer thread");
        assert_eq!(outcome, EnqueueOutcome::Admitted);
    }

    #[test]
    fn disk_assist_spills_above_high_watermark_and_resumes_below_low() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = QueueConfig::default();
        config.disk_dir = Some(dir.path().to_path_buf());
        config.watermarks.capacity = 4;
        config.watermarks.high = 2;
        config.watermarks.low = 1;
        config.watermarks.full_delay = 100;
        config.watermarks.light_delay = 100;
        config.watermarks.discard = 100;
        let q = Queue::new(config).expect("new");

        for i in 0..4 {
            q.enqueue(sample(&format!("m{i}"), Severity::Notice));
        }
        assert!(q.spilled_to_disk() > 0, "expected some messages spilled to disk");

        let mut seen = Vec::new();
        while let Some(m) = q.try_dequeue_one() {
            seen.push(String::from_utf8(m.body().to_vec()).expect("utf8"));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn scenario_s7_shutdown_persists_backlog_for_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut config = QueueConfig::default();
            config.disk_dir = Some(dir.path().to_path_buf());
            let q = Queue::new(config).expect("new");
            q.enqueue(sample("first", Severity::Notice));
            q.enqueue(sample("second", Severity::Notice));
            q.shutdown().expect("shutdown");
        }

        let mut config = QueueConfig::default();
        config.disk_dir = Some(dir.path().to_path_buf());
        let q = Queue::new(config).expect("restart");
        assert_eq!(q.dequeue().expect("first").body(), b"first");
        assert_eq!(q.dequeue().expect("second").body(), b"second");
    }

}
