// SPDX-License-Identifier: Apache-2.0

//! Disk persistence for dynstats buckets (`spec.md` §4.5, §6).
//!
//! A dedicated writer thread receives snapshot jobs and serialises
//! them as JSON `{name, values: {metric: int_value, …}}` into
//! `<state_dir>/dynstats-state:<bucket>.tmp`, `fsync`s, then renames
//! over the final file. Bucket names containing path separators have
//! them replaced with `_` in the file name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use rlog_config::{EngineError, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct StateFile {
    pub name: String,
    pub values: BTreeMap<String, i64>,
}

fn sanitise_file_component(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

pub fn state_file_path(state_dir: &Path, bucket_name: &str) -> PathBuf {
    state_dir.join(format!("dynstats-state:{}", sanitise_file_component(bucket_name)))
}

/// Loads a previously persisted snapshot for `bucket_name`, if any file
/// exists for it under `state_dir`. Absence is not an error — a fresh
/// bucket has no prior state.
pub fn load_state(state_dir: &Path, bucket_name: &str) -> Result<Option<BTreeMap<String, i64>>> {
    let path = state_file_path(state_dir, bucket_name);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|source| EngineError::Io {
        path: path.clone(),
        source,
    })?;
    let parsed: StateFile =
        serde_json::from_str(&text).map_err(|source| EngineError::JsonParse { path, source })?;
    Ok(Some(parsed.values))
}

fn write_snapshot(state_dir: &Path, snapshot: &StateFile) -> Result<()> {
    let final_path = state_file_path(state_dir, &snapshot.name);
    let tmp_path = final_path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(snapshot).expect("StateFile serialises");
    let mut file = std::fs::File::create(&tmp_path).map_err(|source| EngineError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    use std::io::Write as _;
    file.write_all(&json).map_err(|source| EngineError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    file.sync_all().map_err(|source| EngineError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, &final_path).map_err(|source| EngineError::Io {
        path: final_path,
        source,
    })?;
    Ok(())
}

/// A dedicated writer thread serving snapshot jobs for one buckets set,
/// matching the original's "one writer thread per buckets set".
pub struct PersistWriter {
    tx: Option<Sender<StateFile>>,
    handle: Option<JoinHandle<()>>,
}

impl PersistWriter {
    #[must_use]
    pub fn spawn(state_dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel::<StateFile>();
        let handle = std::thread::Builder::new()
            .name("dynstats-writer".into())
            .spawn(move || {
                for snapshot in rx {
                    if let Err(err) = write_snapshot(&state_dir, &snapshot) {
                        tracing::warn!(bucket = %snapshot.name, error = %err, "dynstats persist failed");
                    }
                }
            })
            .expect("spawn dynstats writer thread");
        PersistWriter {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Enqueues a snapshot for asynchronous write. Never blocks the
    /// calling (hot) path beyond the channel send.
    pub fn enqueue(&self, snapshot: StateFile) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(snapshot);
        }
    }
}

impl Drop for PersistWriter {
    fn drop(&mut self) {
        // Drop the sender first so the writer thread's channel loop
        // observes the hang-up and exits before we join it.
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitises_path_separators_in_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_file_path(dir.path(), "app/sub");
        assert_eq!(
            path.file_name().expect("has a file name"),
            "dynstats-state:app_sub"
        );
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut values = BTreeMap::new();
        let _ = values.insert("errors".to_string(), 42);
        write_snapshot(
            dir.path(),
            &StateFile {
                name: "mybucket".into(),
                values,
            },
        )
        .expect("writes");

        let loaded = load_state(dir.path(), "mybucket")
            .expect("loads")
            .expect("state present");
        assert_eq!(loaded.get("errors"), Some(&42));
    }

    #[test]
    fn missing_state_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = load_state(dir.path(), "never-persisted").expect("no error");
        assert!(loaded.is_none());
    }

    #[test]
    fn writer_thread_persists_enqueued_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = PersistWriter::spawn(dir.path().to_path_buf());
        let mut values = BTreeMap::new();
        let _ = values.insert("hits".to_string(), 7);
        writer.enqueue(StateFile {
            name: "live".into(),
            values,
        });
        drop(writer); // joins the thread, draining the channel first

        let loaded = load_state(dir.path(), "live")
            .expect("loads")
            .expect("state present");
        assert_eq!(loaded.get("hits"), Some(&7));
    }
}
