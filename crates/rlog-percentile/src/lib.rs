// SPDX-License-Identifier: Apache-2.0

//! Sliding-window percentile buckets (`spec.md` §4.6).
//!
//! Each observed key keeps a fixed-size window of its most recent
//! values (maintained by the underlying ring buffer's overwrite
//! semantics) plus running `count`/`min`/`max`/`sum` aggregates that
//! describe only the interval *since the last stats read*. Percentile
//! values are computed lazily, on read, from a non-destructive copy of
//! the window.
//!
//! Percentile rank uses the nearest-rank method
//! (`rank = ceil(p / 100 * count)`, 1-based). `spec.md`'s prose gives a
//! floor-based formula, but that formula does not reproduce its own
//! worked example (Scenario S6: `p95` of `1..=10` is `10`, which only
//! the ceiling form yields); the ceiling form is used throughout and
//! is recorded as the resolved reading in `DESIGN.md`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use rlog_ringbuf::RingBuffer;

/// One bucket: a name, a metric-name delimiter, the percentiles to
/// track, and the window size shared by every key observed into it.
pub struct PercentileBucket {
    name: String,
    delimiter: String,
    percentiles: Vec<u8>,
    window_size: usize,
    keys: RwLock<HashMap<String, KeyState>>,
}

struct KeyState {
    ring: RingBuffer<i64>,
    count: u64,
    min: i64,
    max: i64,
    sum: i64,
    /// Set by `report`; the next `obs` clears the aggregates before
    /// accumulating, starting a fresh "since last read" interval.
    reported: bool,
}

impl KeyState {
    fn new(window_size: usize) -> Self {
        KeyState {
            // `RingBuffer` always wastes one slot; request one more
            // than the logical window so `window_size` items always
            // fit even when `window_size` is itself a power of two.
            ring: RingBuffer::new(window_size + 1),
            count: 0,
            min: i64::MAX,
            max: i64::MIN,
            sum: 0,
            reported: false,
        }
    }
}

/// Per-key snapshot returned by [`PercentileBucket::report`].
#[derive(Debug, Clone)]
pub struct KeyReport {
    pub key: String,
    pub percentiles: BTreeMap<u8, i64>,
    pub window_count: u64,
    pub window_min: i64,
    pub window_max: i64,
    pub window_sum: i64,
}

impl PercentileBucket {
    #[must_use]
    pub fn new(name: impl Into<String>, delimiter: impl Into<String>, percentiles: Vec<u8>, window_size: usize) -> Self {
        PercentileBucket {
            name: name.into(),
            delimiter: delimiter.into(),
            percentiles,
            window_size: window_size.max(1),
            keys: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders a counter name for `key`/`suffix` using this bucket's
    /// delimiter, e.g. `requests.p95`.
    #[must_use]
    pub fn counter_name(&self, key: &str, suffix: &str) -> String {
        format!("{key}{}{suffix}", self.delimiter)
    }

    /// `perctile_obs`: records `value` for `key`, evicting the oldest
    /// observation once the window is full so at most `window_size`
    /// observations are ever held for that key.
    pub fn obs(&self, key: &str, value: i64) {
        let mut keys = self.keys.write();
        let state = keys
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(self.window_size));

        if state.reported {
            state.count = 0;
            state.min = i64::MAX;
            state.max = i64::MIN;
            state.sum = 0;
            state.reported = false;
        }

        state.count += 1;
        state.sum += value;
        state.min = state.min.min(value);
        state.max = state.max.max(value);

        if state.ring.len() >= self.window_size {
            let mut discard = [0i64; 1];
            let _ = state.ring.read(&mut discard);
        }
        state.ring.append_with_overwrite(value);
    }

    /// Lazy stats read: computes percentiles from a non-destructive
    /// copy of each key's window, reports the aggregates accumulated
    /// since the previous read, then marks every key "reported" so
    /// the next `obs` starts a fresh interval.
    pub fn report(&self) -> Vec<KeyReport> {
        let mut keys = self.keys.write();
        let mut out = Vec::with_capacity(keys.len());
        for (key, state) in keys.iter_mut() {
            let mut scratch = state.ring.clone();
            let mut buf = vec![0i64; self.window_size];
            let n = scratch.read_to_end(&mut buf);
            let mut values = buf[..n].to_vec();
            values.sort_unstable();

            let mut percentiles = BTreeMap::new();
            for &p in &self.percentiles {
                let _ = percentiles.insert(p, percentile_value(&values, p));
            }

            out.push(KeyReport {
                key: key.clone(),
                percentiles,
                window_count: state.count,
                window_min: if state.count == 0 { 0 } else { state.min },
                window_max: if state.count == 0 { 0 } else { state.max },
                window_sum: state.sum,
            });
            state.reported = true;
        }
        out
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }
}

fn percentile_value(sorted: &[i64], p: u8) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((f64::from(p) / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.max(1) - 1;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s6_first_read_matches_worked_example() {
        let bucket = PercentileBucket::new("b", ".", vec![50, 95], 10);
        for v in 1..=10 {
            bucket.obs("K", v);
        }
        let reports = bucket.report();
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.percentiles[&50], 5);
        assert_eq!(r.percentiles[&95], 10);
        assert_eq!(r.window_count, 10);
        assert_eq!(r.window_min, 1);
        assert_eq!(r.window_max, 10);
        assert_eq!(r.window_sum, 55);
    }

    #[test]
    fn scenario_s6_second_read_resets_aggregates_and_slides_window() {
        let bucket = PercentileBucket::new("b", ".", vec![50, 95], 10);
        for v in 1..=10 {
            bucket.obs("K", v);
        }
        let _ = bucket.report();

        bucket.obs("K", 100);
        let reports = bucket.report();
        let r = &reports[0];
        // window slides: oldest value (1) evicted, window is now {2..=10, 100}.
        assert_eq!(r.percentiles[&95], 100);
        assert_eq!(r.window_count, 1);
        assert_eq!(r.window_min, 100);
        assert_eq!(r.window_max, 100);
        assert_eq!(r.window_sum, 100);
    }

    #[test]
    fn window_never_exceeds_configured_size() {
        let bucket = PercentileBucket::new("b", ".", vec![100], 4);
        for v in 1..=10 {
            bucket.obs("K", v);
        }
        let reports = bucket.report();
        // p100 should be the max of the last 4 observations (7,8,9,10).
        assert_eq!(reports[0].percentiles[&100], 10);
    }

    #[test]
    fn distinct_keys_track_independent_windows() {
        let bucket = PercentileBucket::new("b", ".", vec![50], 4);
        bucket.obs("A", 1);
        bucket.obs("B", 100);
        assert_eq!(bucket.key_count(), 2);
        let reports = bucket.report();
        let a = reports.iter().find(|r| r.key == "A").expect("A present");
        let b = reports.iter().find(|r| r.key == "B").expect("B present");
        assert_eq!(a.percentiles[&50], 1);
        assert_eq!(b.percentiles[&50], 100);
    }

    #[test]
    fn counter_name_uses_configured_delimiter() {
        let bucket = PercentileBucket::new("lat", ".", vec![99], 8);
        assert_eq!(bucket.counter_name("host1", "p99"), "host1.p99");
    }
}
