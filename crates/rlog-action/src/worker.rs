// SPDX-License-Identifier: Apache-2.0

//! Per-worker bookkeeping for an action (`spec.md` §4.3 "Worker
//! bookkeeping"): every worker thread that touches an action registers
//! here so a HUP handler (e.g. "reopen output file") can reach it.

use std::collections::HashMap;

use parking_lot::Mutex;

pub type WorkerId = u64;

/// Registry of live workers for one action. Guards its map with a
/// single mutex, matching `mutWrkrDataTable`'s role in the original
/// engine.
#[derive(Default)]
pub struct WorkerRegistry<T> {
    workers: Mutex<HashMap<WorkerId, T>>,
}

impl<T> WorkerRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        WorkerRegistry { workers: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, id: WorkerId, data: T) {
        self.workers.lock().insert(id, data);
    }

    pub fn unregister(&self, id: WorkerId) -> Option<T> {
        self.workers.lock().remove(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    /// Runs `f` against every registered worker's data, holding the
    /// registry lock for the duration — used for HUP broadcasts such
    /// as "reopen output file".
    pub fn for_each(&self, mut f: impl FnMut(WorkerId, &mut T)) {
        let mut workers = self.workers.lock();
        for (id, data) in workers.iter_mut() {
            f(*id, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister_round_trip() {
        let registry: WorkerRegistry<&str> = WorkerRegistry::new();
        registry.register(1, "file-handle-a");
        registry.register(2, "file-handle-b");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.unregister(1), Some("file-handle-a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn for_each_visits_every_registered_worker() {
        let registry: WorkerRegistry<u32> = WorkerRegistry::new();
        registry.register(1, 0);
        registry.register(2, 0);
        registry.for_each(|_, data| *data += 1);
        let mut seen = Vec::new();
        registry.for_each(|id, data| seen.push((id, *data)));
        seen.sort();
        assert_eq!(seen, vec![(1, 1), (2, 1)]);
    }
}
