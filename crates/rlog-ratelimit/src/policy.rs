// SPDX-License-Identifier: Apache-2.0

//! Named, reference-counted rate-limit policies (`spec.md` §3
//! "Rate-limit policy", §4.2).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use rlog_config::{EngineError, PerSourceOverride, PerSourcePolicyFile, RateLimitPolicyFile, Result};
use rlog_hashlru::LruTable;

use crate::key_template::{sanitise_key, KeyTemplate};

pub const DEFAULT_PER_SOURCE_MAX_STATES: usize = 10_000;
pub const DEFAULT_PER_SOURCE_TOPN: usize = 10;

/// The global token-bucket knobs, swappable as a unit on HUP.
#[derive(Debug, Clone, Copy)]
pub struct GlobalBucketConfig {
    pub interval_seconds: u64,
    pub burst: u32,
    pub severity_threshold: Option<u8>,
}

impl Default for GlobalBucketConfig {
    fn default() -> Self {
        GlobalBucketConfig {
            interval_seconds: 0,
            burst: 0,
            severity_threshold: None,
        }
    }
}

/// Static, non-reloadable per-source knobs set at `add_config` time.
#[derive(Debug, Clone)]
pub struct PerSourceStaticConfig {
    pub key_template: KeyTemplate,
    pub max_states: usize,
    pub topn: usize,
    pub per_source_policy_file: Option<PathBuf>,
}

impl Default for PerSourceStaticConfig {
    fn default() -> Self {
        PerSourceStaticConfig {
            key_template: KeyTemplate::FromHost,
            max_states: DEFAULT_PER_SOURCE_MAX_STATES,
            topn: DEFAULT_PER_SOURCE_TOPN,
            per_source_policy_file: None,
        }
    }
}

/// The reloadable half of the per-source policy: defaults plus the
/// override map, swapped together on HUP.
#[derive(Debug, Clone, Default)]
pub struct PerSourcePolicy {
    pub default_max: u32,
    pub default_window_seconds: u64,
    pub overrides: BTreeMap<String, PerSourceOverride>,
}

impl PerSourcePolicy {
    fn resolve(&self, key: &str) -> (u32, u64) {
        match self.overrides.get(key) {
            Some(ov) => (
                ov.max.unwrap_or(self.default_max),
                ov.window_seconds.unwrap_or(self.default_window_seconds),
            ),
            None => (self.default_max, self.default_window_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceState {
    pub count: u32,
    pub window_start: u64,
    pub total_allowed: u64,
    pub total_dropped: u64,
    pub last_seen: u64,
}

/// Everything the per-source mutex guards together: the reloadable
/// policy and the LRU-bounded state table derived from it.
#[derive(Debug)]
struct PerSourceGuarded {
    policy: PerSourcePolicy,
    table: LruTable<String, SourceState>,
}

/// Outcome of a per-source admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerSourceOutcome {
    Admit,
    Dropped,
}

#[derive(Debug)]
pub struct PerSourceState {
    static_config: PerSourceStaticConfig,
    guarded: Mutex<PerSourceGuarded>,
    allowed: AtomicU64,
    dropped: AtomicU64,
}

impl PerSourceState {
    fn new(static_config: PerSourceStaticConfig, policy: PerSourcePolicy) -> Self {
        let table = LruTable::new(static_config.max_states.max(1));
        PerSourceState {
            static_config,
            guarded: Mutex::new(PerSourceGuarded { policy, table }),
            allowed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn key_template(&self) -> &KeyTemplate {
        &self.static_config.key_template
    }

    /// Sliding fixed-window admission for `key` at time `now`
    /// (epoch seconds).
    pub fn check(&self, key: &str, now: u64) -> PerSourceOutcome {
        let mut guarded = self.guarded.lock();
        let (max, window) = guarded.policy.resolve(key);
        let (entry, _evicted) = guarded.table.get_or_insert_with(key.to_string(), || SourceState {
            count: 0,
            window_start: now,
            total_allowed: 0,
            total_dropped: 0,
            last_seen: now,
        });

        if now.saturating_sub(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.last_seen = now;

        if entry.count < max {
            entry.count += 1;
            entry.total_allowed += 1;
            self.allowed.fetch_add(1, Ordering::Relaxed);
            PerSourceOutcome::Admit
        } else {
            entry.total_dropped += 1;
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PerSourceOutcome::Dropped
        }
    }

    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (
            self.allowed.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }

    /// Lazy top-N report, triggered from the stats-read callback:
    /// picks the `topn` keys with highest `total_dropped` and names
    /// a counter for each (`per_source_drop_<rank>_<sanitised-key>`).
    #[must_use]
    pub fn top_n_report(&self) -> Vec<(String, u64)> {
        let guarded = self.guarded.lock();
        let mut entries: Vec<(&String, &SourceState)> = guarded.table.iter().collect();
        entries.sort_unstable_by(|a, b| b.1.total_dropped.cmp(&a.1.total_dropped));
        entries
            .into_iter()
            .take(self.static_config.topn)
            .enumerate()
            .map(|(rank, (key, state))| {
                (
                    format!("per_source_drop_{}_{}", rank + 1, sanitise_key(key)),
                    state.total_dropped,
                )
            })
            .collect()
    }

    fn reload(&self, new_policy: PerSourcePolicy) {
        let mut guarded = self.guarded.lock();
        guarded.policy = new_policy;
    }
}

/// A named, reference-counted rate-limit policy (`spec.md` §3).
#[derive(Debug)]
pub struct SharedPolicy {
    name: String,
    global: Mutex<GlobalBucketConfig>,
    policy_file: Option<PathBuf>,
    per_source: Option<PerSourceState>,
    ctr_global_allowed: AtomicU64,
    ctr_global_dropped: AtomicU64,
}

impl SharedPolicy {
    /// An empty, standalone policy for `RatelimitInstance::standalone`:
    /// `interval=0` (rate-limiting disabled until tuned) and no
    /// per-source sub-policy.
    #[must_use]
    pub fn standalone() -> Self {
        SharedPolicy {
            name: String::from("(standalone)"),
            global: Mutex::new(GlobalBucketConfig::default()),
            policy_file: None,
            per_source: None,
            ctr_global_allowed: AtomicU64::new(0),
            ctr_global_dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn global_config(&self) -> GlobalBucketConfig {
        *self.global.lock()
    }

    pub fn set_global_config(&self, config: GlobalBucketConfig) {
        *self.global.lock() = config;
    }

    #[must_use]
    pub fn per_source(&self) -> Option<&PerSourceState> {
        self.per_source.as_ref()
    }

    pub fn record_global(&self, admitted: bool) {
        if admitted {
            self.ctr_global_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ctr_global_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn global_counters(&self) -> (u64, u64) {
        (
            self.ctr_global_allowed.load(Ordering::Relaxed),
            self.ctr_global_dropped.load(Ordering::Relaxed),
        )
    }

    /// Re-parses `policy_file`/`per_source_policy_file` (if configured)
    /// and swaps in the new values. Parse failures leave the old
    /// policy in effect and are logged, per `spec.md`'s
    /// fail-in-place HUP semantics.
    fn reload_from_disk(&self) {
        if let Some(path) = &self.policy_file {
            match RateLimitPolicyFile::load(path) {
                Ok(file) => {
                    let mut global = self.global.lock();
                    if let Some(interval) = file.interval {
                        global.interval_seconds = interval;
                    }
                    if let Some(burst) = file.burst {
                        global.burst = burst;
                    }
                    if let Some(sev) = file.severity {
                        global.severity_threshold = Some(sev);
                    }
                }
                Err(err) => {
                    tracing::error!(policy = %self.name, path = %path.display(), error = %err, "rate-limit policy file reload failed, keeping old policy");
                }
            }
        }
        if let Some(per_source) = &self.per_source {
            if let Some(path) = &per_source.static_config.per_source_policy_file {
                match PerSourcePolicyFile::load(path) {
                    Ok(file) => {
                        per_source.reload(PerSourcePolicy {
                            default_max: file.default_max,
                            default_window_seconds: file.default_window_seconds,
                            overrides: file.overrides,
                        });
                    }
                    Err(err) => {
                        tracing::error!(policy = %self.name, path = %path.display(), error = %err, "per-source policy file reload failed, keeping old policy");
                    }
                }
            }
        }
    }
}

/// Configuration-scoped registry of named policies (`add_config`,
/// `new_from_config`, `do_hup`).
#[derive(Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<SharedPolicy>>>,
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        PolicyRegistry::default()
    }

    /// Registers a named policy. Fails with `DuplicateName` if `name`
    /// is already registered. If `policy_file`/`per_source_policy_file`
    /// are present they are parsed now and override the in-line
    /// values, matching `add_config`'s contract.
    #[allow(clippy::too_many_arguments)]
    pub fn add_config(
        &self,
        name: impl Into<String>,
        interval_seconds: u64,
        burst: u32,
        severity_threshold: Option<u8>,
        policy_file: Option<PathBuf>,
        per_source: Option<PerSourceStaticConfig>,
        per_source_defaults: Option<PerSourcePolicy>,
    ) -> Result<Arc<SharedPolicy>> {
        let name = name.into();
        let mut policies = self.policies.write();
        if policies.contains_key(&name) {
            return Err(EngineError::DuplicateName(name));
        }

        let mut global = GlobalBucketConfig {
            interval_seconds,
            burst,
            severity_threshold,
        };
        if let Some(path) = &policy_file {
            let file = RateLimitPolicyFile::load(path)?;
            if let Some(interval) = file.interval {
                global.interval_seconds = interval;
            }
            if let Some(burst) = file.burst {
                global.burst = burst;
            }
            if let Some(sev) = file.severity {
                global.severity_threshold = Some(sev);
            }
        }

        let per_source_state = match per_source {
            None => None,
            Some(static_config) => {
                let mut policy = per_source_defaults.unwrap_or_default();
                if let Some(path) = &static_config.per_source_policy_file {
                    let file = PerSourcePolicyFile::load(path)?;
                    policy = PerSourcePolicy {
                        default_max: file.default_max,
                        default_window_seconds: file.default_window_seconds,
                        overrides: file.overrides,
                    };
                }
                Some(PerSourceState::new(static_config, policy))
            }
        };

        let shared = Arc::new(SharedPolicy {
            name: name.clone(),
            global: Mutex::new(global),
            policy_file,
            per_source: per_source_state,
            ctr_global_allowed: AtomicU64::new(0),
            ctr_global_dropped: AtomicU64::new(0),
        });
        let _ = policies.insert(name, Arc::clone(&shared));
        Ok(shared)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<SharedPolicy>> {
        self.policies.read().get(name).cloned()
    }

    /// Walks the registry under its read-lock; each policy re-parses
    /// its own files and swaps under its own mutex, never under the
    /// registry lock.
    pub fn do_hup(&self) {
        let names: Vec<Arc<SharedPolicy>> = self.policies.read().values().cloned().collect();
        for policy in names {
            policy.reload_from_disk();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_config_rejects_duplicate_names() {
        let registry = PolicyRegistry::new();
        registry
            .add_config("p", 10, 3, None, None, None, None)
            .expect("first registration succeeds");
        let err = registry
            .add_config("p", 10, 3, None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(_)));
    }

    #[test]
    fn per_source_sliding_window_matches_scenario_s2() {
        let static_config = PerSourceStaticConfig::default();
        let policy = registry_with_per_source(static_config, 2, 60);
        let per_source = policy.per_source().expect("configured");

        assert_eq!(per_source.check("A", 0), PerSourceOutcome::Admit);
        assert_eq!(per_source.check("A", 0), PerSourceOutcome::Admit);
        assert_eq!(per_source.check("A", 0), PerSourceOutcome::Dropped);
        assert_eq!(per_source.check("B", 0), PerSourceOutcome::Admit);

        // window resets at t=61
        assert_eq!(per_source.check("A", 61), PerSourceOutcome::Admit);
    }

    #[test]
    fn per_source_lru_bound_matches_scenario_s3() {
        let static_config = PerSourceStaticConfig {
            max_states: 2,
            ..PerSourceStaticConfig::default()
        };
        let policy = registry_with_per_source(static_config, 100, 3600);
        let per_source = policy.per_source().expect("configured");

        let _ = per_source.check("A", 0);
        let _ = per_source.check("B", 0);
        let _ = per_source.check("C", 0); // evicts A (LRU head)
        let _ = per_source.check("B", 0); // touches B

        let report = per_source.top_n_report();
        let keys: Vec<&str> = report.iter().map(|(name, _)| name.as_str()).collect();
        assert!(!keys.iter().any(|k| k.contains('A')));
    }

    #[test]
    fn top_n_reports_highest_droppers_first() {
        let static_config = PerSourceStaticConfig {
            topn: 2,
            ..PerSourceStaticConfig::default()
        };
        let policy = registry_with_per_source(static_config, 1, 3600);
        let per_source = policy.per_source().expect("configured");

        for _ in 0..5 {
            let _ = per_source.check("heavy", 0);
        }
        for _ in 0..2 {
            let _ = per_source.check("light", 0);
        }
        let _ = per_source.check("once", 0);

        let report = per_source.top_n_report();
        assert_eq!(report.len(), 2);
        assert!(report[0].0.contains("heavy"));
        assert!(report[0].1 >= report[1].1);
    }

    fn registry_with_per_source(
        static_config: PerSourceStaticConfig,
        default_max: u32,
        default_window_seconds: u64,
    ) -> Arc<SharedPolicy> {
        let registry = PolicyRegistry::new();
        registry
            .add_config(
                "p",
                0,
                0,
                None,
                None,
                Some(static_config),
                Some(PerSourcePolicy {
                    default_max,
                    default_window_seconds,
                    overrides: BTreeMap::new(),
                }),
            )
            .expect("registers")
    }
}
