// SPDX-License-Identifier: Apache-2.0

//! Cardinality-bounded dynamic counter buckets (`spec.md` §4.5).
//!
//! Each bucket holds two parallel tables, `live` and `survivor`. A
//! metric touched in the current TTL window lives in `live`; one idle
//! for an entire window is demoted to `survivor` and destroyed if it
//! stays idle for a second consecutive window. This two-generation
//! scheme keeps cardinality bounded without needing per-metric
//! timestamps.

mod persist;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use rlog_config::{EngineError, Result};

pub use persist::{load_state, state_file_path, PersistWriter, StateFile};

/// Separator between a bucket name and a metric name when flattening
/// into the external stats namespace, e.g. `requests.errors`.
pub const METRIC_NAME_SEPARATOR: &str = ".";

const DEFAULT_MAX_CARDINALITY: u32 = 2_000;
const DEFAULT_UNUSED_METRIC_LIFE: Duration = Duration::from_secs(3_600);

/// Tunables for one bucket, mirroring `dynstatsNewBucket`'s parameters.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub resettable: bool,
    pub max_cardinality: u32,
    pub unused_metric_life: Duration,
    pub persist_state_write_count_interval: u64,
    pub persist_state_time_interval: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            resettable: false,
            max_cardinality: DEFAULT_MAX_CARDINALITY,
            unused_metric_life: DEFAULT_UNUSED_METRIC_LIFE,
            persist_state_write_count_interval: 0,
            persist_state_time_interval: Duration::ZERO,
        }
    }
}

struct Tables {
    live: HashMap<String, AtomicI64>,
    survivor: HashMap<String, AtomicI64>,
}

/// Meta-counters exported alongside a bucket's own metrics (`spec.md`
/// §6's `<bucket>.ops_overflow` family).
#[derive(Debug, Default, Clone, Copy)]
pub struct BucketMeta {
    pub new_metric_add: u64,
    pub metrics_purged: u64,
    pub ops_overflow: u64,
    pub ops_ignored: u64,
    pub purge_triggered: u64,
    pub flushed_bytes: u64,
    pub flushed_errors: u64,
}

/// Snapshot returned by a stats read: the bucket's live values plus
/// its meta-counters, after any due TTL eviction has run.
#[derive(Debug, Clone)]
pub struct BucketReport {
    pub name: String,
    pub values: BTreeMap<String, i64>,
    pub meta: BucketMeta,
}

pub struct Bucket {
    name: String,
    config: BucketConfig,
    tables: RwLock<Tables>,
    ctr_new_metric_add: AtomicU64,
    ctr_metrics_purged: AtomicU64,
    ctr_ops_overflow: AtomicU64,
    ctr_ops_ignored: AtomicU64,
    ctr_purge_triggered: AtomicU64,
    ctr_flushed_bytes: AtomicU64,
    ctr_flushed_errors: AtomicU64,
    update_counter: AtomicU64,
    deadline: parking_lot::Mutex<Instant>,
}

impl Bucket {
    /// Creates a bucket, seeding `survivor` from a persisted state
    /// file at `state_dir` if one exists for `name` (`spec.md` §4.5
    /// "On startup... values are loaded and merged").
    pub fn new(name: impl Into<String>, config: BucketConfig, state_dir: Option<&std::path::Path>) -> Result<Self> {
        let name = name.into();
        let mut survivor = HashMap::new();
        if let Some(dir) = state_dir {
            if let Some(values) = load_state(dir, &name)? {
                for (metric, value) in values {
                    let _ = survivor.insert(metric, AtomicI64::new(value));
                }
            }
        }
        let deadline = Instant::now() + config.unused_metric_life;
        Ok(Bucket {
            name,
            config,
            tables: RwLock::new(Tables {
                live: HashMap::new(),
                survivor,
            }),
            ctr_new_metric_add: AtomicU64::new(0),
            ctr_metrics_purged: AtomicU64::new(0),
            ctr_ops_overflow: AtomicU64::new(0),
            ctr_ops_ignored: AtomicU64::new(0),
            ctr_purge_triggered: AtomicU64::new(0),
            ctr_flushed_bytes: AtomicU64::new(0),
            ctr_flushed_errors: AtomicU64::new(0),
            update_counter: AtomicU64::new(0),
            deadline: parking_lot::Mutex::new(deadline),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `dynstats_inc`: single-writer-per-metric semantics under the
    /// bucket's table lock. Returns `Err(EngineError::DiscardMsg)` and
    /// counts `ops_overflow` if the cardinality bound is reached.
    pub fn inc(&self, metric_name: &str) -> Result<()> {
        {
            let tables = self.tables.read();
            if let Some(counter) = tables.live.get(metric_name) {
                let _ = counter.fetch_add(1, Ordering::Relaxed);
                self.update_counter.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let mut tables = self.tables.write();
        // Re-check: another writer may have created it between the
        // read-lock release above and acquiring the write lock.
        if let Some(counter) = tables.live.get(metric_name) {
            let _ = counter.fetch_add(1, Ordering::Relaxed);
            self.update_counter.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if tables.live.len() as u64 >= u64::from(self.config.max_cardinality) {
            let _ = self.ctr_ops_overflow.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::DiscardMsg);
        }

        let counter = match tables.survivor.remove(metric_name) {
            Some(revived) => revived,
            None => AtomicI64::new(0),
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
        let _ = tables.live.insert(metric_name.to_string(), counter);
        let _ = self.ctr_new_metric_add.fetch_add(1, Ordering::Relaxed);
        self.update_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Two-generation TTL eviction: `survivor = live; live = {}`.
    /// Runs only when `unused_metric_life` has elapsed since the last
    /// rebuild, re-arming the deadline either way.
    pub fn maybe_evict(&self) {
        let now = Instant::now();
        let mut deadline = self.deadline.lock();
        if now < *deadline {
            return;
        }
        *deadline = now + self.config.unused_metric_life;
        drop(deadline);

        let mut tables = self.tables.write();
        let purged = tables.survivor.len() as u64;
        let old_live = std::mem::take(&mut tables.live);
        tables.survivor = old_live;
        let _ = self.ctr_metrics_purged.fetch_add(purged, Ordering::Relaxed);
        let _ = self.ctr_purge_triggered.fetch_add(1, Ordering::Relaxed);
    }

    /// Lazy stats read: runs any due TTL eviction, then snapshots
    /// `live` values and the meta-counters.
    pub fn report(&self) -> BucketReport {
        self.maybe_evict();
        let tables = self.tables.read();
        let values = tables
            .live
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        BucketReport {
            name: self.name.clone(),
            values,
            meta: BucketMeta {
                new_metric_add: self.ctr_new_metric_add.load(Ordering::Relaxed),
                metrics_purged: self.ctr_metrics_purged.load(Ordering::Relaxed),
                ops_overflow: self.ctr_ops_overflow.load(Ordering::Relaxed),
                ops_ignored: self.ctr_ops_ignored.load(Ordering::Relaxed),
                purge_triggered: self.ctr_purge_triggered.load(Ordering::Relaxed),
                flushed_bytes: self.ctr_flushed_bytes.load(Ordering::Relaxed),
                flushed_errors: self.ctr_flushed_errors.load(Ordering::Relaxed),
            },
        }
    }

    /// Builds the persistable snapshot and records the flush, marking
    /// it failed (`ctr_flushed_errors`) if the caller reports one.
    #[must_use]
    pub fn snapshot_for_persist(&self) -> StateFile {
        let tables = self.tables.read();
        let values = tables
            .live
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        StateFile {
            name: self.name.clone(),
            values,
        }
    }

    pub fn record_flush_ok(&self, bytes: u64) {
        let _ = self.ctr_flushed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_flush_err(&self) {
        let _ = self.ctr_flushed_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether enough `inc` calls (or, by the caller driving a timer,
    /// enough elapsed time) have passed to justify a persistence flush.
    #[must_use]
    pub fn persist_due(&self) -> bool {
        let interval = self.config.persist_state_write_count_interval;
        interval > 0 && self.update_counter.load(Ordering::Relaxed) % interval == 0
    }
}
