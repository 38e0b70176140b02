// SPDX-License-Identifier: Apache-2.0

//! Disk-queue backing store (`spec.md` §4.4 "Disk persistence", §6
//! "Queue on-disk format").
//!
//! Records are length-prefixed JSON blobs written to a rotated
//! file-set `<prefix>.<NNNNNNN>` (zero-padded to `file_num_digits`),
//! each bounded by `max_file_size`. A companion `.qi` file persists
//! `{head, tail, bytes_read, total_written}` so a restart can resume
//! exactly where it left off.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use rlog_config::{EngineError, Result};
use rlog_message::{Msg, Severity};

/// On-disk mirror of a [`Msg`]'s fields (`spec.md` §6: "a serialised
/// message property-list preceded by its byte length").
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    body: Vec<u8>,
    severity: u8,
    facility: u8,
    generated_epoch_secs: u64,
    source_addr: String,
    source_id: String,
    hostname: String,
    app_name: String,
    proc_id: String,
    source_port: u16,
}

impl From<&Msg> for DiskRecord {
    fn from(msg: &Msg) -> Self {
        DiskRecord {
            body: msg.body().to_vec(),
            severity: msg.severity().as_u8(),
            facility: msg.facility(),
            generated_epoch_secs: msg.generated_epoch_secs(),
            source_addr: msg.source_addr().to_string(),
            source_id: msg.source_id().to_string(),
            hostname: msg.hostname().to_string(),
            app_name: msg.app_name().to_string(),
            proc_id: msg.proc_id().to_string(),
            source_port: msg.source_port(),
        }
    }
}

impl From<DiskRecord> for Msg {
    fn from(r: DiskRecord) -> Self {
        Msg::new(
            r.body,
            Severity::from_u8(r.severity),
            r.facility,
            r.generated_epoch_secs,
            r.source_addr,
            r.source_id,
            r.hostname,
            r.app_name,
            r.proc_id,
            r.source_port,
        )
    }
}

/// Persisted read/write cursor (`spec.md` §6's `.qi` file).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct QueueIndex {
    /// Number of the file currently being read from.
    head: u64,
    /// Number of the file currently being written to.
    tail: u64,
    /// Byte offset already consumed within the head file.
    bytes_read: u64,
    /// Monotonic count of records ever written.
    total_written: u64,
}

pub struct DiskQueueConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub max_file_size: u64,
    pub file_num_digits: usize,
    pub persist_upd_cnt: u64,
}

impl Default for DiskQueueConfig {
    fn default() -> Self {
        DiskQueueConfig {
            dir: PathBuf::from("."),
            prefix: String::from("rlog-queue"),
            max_file_size: 16 * 1024 * 1024,
            file_num_digits: 7,
            persist_upd_cnt: 1,
        }
    }
}

/// A disk-backed FIFO of messages, used as the queue's DA-child
/// overflow sink and as the optional `DISK` queue variant itself.
pub struct DiskQueue {
    config: DiskQueueConfig,
    index: QueueIndex,
    write_file: File,
    write_file_len: u64,
    read_file: Option<File>,
    writes_since_persist: u64,
    total_read: u64,
}

impl DiskQueue {
    fn file_path(&self, number: u64) -> PathBuf {
        self.config.dir.join(format!(
            "{}.{:0width$}",
            self.config.prefix,
            number,
            width = self.config.file_num_digits
        ))
    }

    fn qi_path(&self) -> PathBuf {
        self.config.dir.join(format!("{}.qi", self.config.prefix))
    }

    /// Opens (or creates) a disk queue at `config.dir`, resuming from a
    /// persisted `.qi` index if one is present and parses cleanly. A
    /// corrupt index is renamed to `.qi.previous` and a fresh index is
    /// started, keeping existing data files and resetting the read
    /// position to the oldest retained file (`spec.md` §9 Open
    /// Questions, resolved in `DESIGN.md`).
    pub fn open(config: DiskQueueConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir).map_err(|source| EngineError::Io {
            path: config.dir.clone(),
            source,
        })?;
        let qi_path = config.dir.join(format!("{}.qi", config.prefix));

        let index = if qi_path.exists() {
            match std::fs::read(&qi_path) {
                Ok(bytes) => match serde_json::from_slice::<QueueIndex>(&bytes) {
                    Ok(index) => index,
                    Err(err) => {
                        tracing::warn!(path = %qi_path.display(), error = %err, "disk-queue index corrupt, starting fresh");
                        let previous = qi_path.with_extension("qi.previous");
                        let _ = std::fs::rename(&qi_path, previous);
                        Self::recover_index(&config)
                    }
                },
                Err(_) => Self::recover_index(&config),
            }
        } else {
            QueueIndex::default()
        };

        let write_path = config.dir.join(format!(
            "{}.{:0width$}",
            config.prefix,
            index.tail,
            width = config.file_num_digits
        ));
        let write_file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&write_path)
            .map_err(|source| EngineError::Io {
                path: write_path.clone(),
                source,
            })?;
        let write_file_len = write_file
            .metadata()
            .map_err(|source| EngineError::Io {
                path: write_path,
                source,
            })?
            .len();

        let mut queue = DiskQueue {
            config,
            index,
            write_file,
            write_file_len,
            read_file: None,
            writes_since_persist: 0,
            total_read: 0,
        };
        queue.open_read_file()?;
        Ok(queue)
    }

    /// No persisted index: the oldest surviving numbered file (if any)
    /// becomes the new read head, starting at offset zero.
    fn recover_index(config: &DiskQueueConfig) -> QueueIndex {
        let mut numbers = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&config.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(suffix) = name.strip_prefix(&format!("{}.", config.prefix)) {
                    if let Ok(n) = suffix.parse::<u64>() {
                        numbers.push(n);
                    }
                }
            }
        }
        numbers.sort_unstable();
        let head = numbers.first().copied().unwrap_or(0);
        let tail = numbers.last().copied().unwrap_or(0);
        QueueIndex {
            head,
            tail,
            bytes_read: 0,
            total_written: 0,
        }
    }

    fn open_read_file(&mut self) -> Result<()> {
        let path = self.file_path(self.index.head);
        if !path.exists() {
            self.read_file = None;
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|source| EngineError::Io {
                path: path.clone(),
                source,
            })?;
        let _ = file
            .seek(SeekFrom::Start(self.index.bytes_read))
            .map_err(|source| EngineError::Io { path, source })?;
        self.read_file = Some(file);
        Ok(())
    }

    /// Writes `msg` to the tail file, rotating to a new numbered file
    /// first if it would exceed `max_file_size`.
    pub fn push(&mut self, msg: &Msg) -> Result<()> {
        let record = DiskRecord::from(msg);
        let payload = serde_json::to_vec(&record).expect("DiskRecord serialises");
        let frame_len = payload.len() as u64 + 4;

        if self.write_file_len > 0 && self.write_file_len + frame_len > self.config.max_file_size {
            self.index.tail += 1;
            self.write_file_len = 0;
            let path = self.file_path(self.index.tail);
            self.write_file = OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&path)
                .map_err(|source| EngineError::Io { path, source })?;
        }

        let len_prefix = (payload.len() as u32).to_be_bytes();
        self.write_file
            .write_all(&len_prefix)
            .and_then(|()| self.write_file.write_all(&payload))
            .map_err(|source| EngineError::Io {
                path: self.file_path(self.index.tail),
                source,
            })?;
        self.write_file_len += frame_len;
        self.index.total_written += 1;
        self.writes_since_persist += 1;

        if self.read_file.is_none() {
            self.open_read_file()?;
        }

        if self.writes_since_persist >= self.config.persist_upd_cnt.max(1) {
            self.persist_index()?;
        }
        Ok(())
    }

    /// Pops the oldest record, rotating past exhausted read files.
    pub fn pop(&mut self) -> Result<Option<Msg>> {
        loop {
            let Some(file) = self.read_file.as_mut() else {
                return Ok(None);
            };

            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {
                    let len = u32::from_be_bytes(len_buf) as usize;
                    let mut payload = vec![0u8; len];
                    file.read_exact(&mut payload).map_err(|source| EngineError::Io {
                        path: self.file_path(self.index.head),
                        source,
                    })?;
                    self.index.bytes_read += 4 + len as u64;
                    self.total_read += 1;
                    let record: DiskRecord = serde_json::from_slice(&payload)
                        .map_err(|source| EngineError::JsonParse {
                            path: self.file_path(self.index.head),
                            source,
                        })?;
                    return Ok(Some(Msg::from(record)));
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if self.index.head >= self.index.tail {
                        return Ok(None);
                    }
                    // Exhausted this file and more exist: rotate forward,
                    // deleting the fully-consumed file.
                    let old_path = self.file_path(self.index.head);
                    self.index.head += 1;
                    self.index.bytes_read = 0;
                    let _ = std::fs::remove_file(&old_path);
                    self.open_read_file()?;
                }
                Err(source) => {
                    return Err(EngineError::Io {
                        path: self.file_path(self.index.head),
                        source,
                    });
                }
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.total_written.saturating_sub(self.total_read) == 0
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.index.total_written.saturating_sub(self.total_read)
    }

    /// Persists `{head, tail, bytes_read, total_written}` atomically
    /// (tmp file + rename). Deletes the index file entirely once the
    /// queue is empty, matching "cleanly deleted on empty".
    pub fn persist_index(&mut self) -> Result<()> {
        self.writes_since_persist = 0;
        let qi_path = self.qi_path();
        if self.is_empty() {
            let _ = std::fs::remove_file(&qi_path);
            return Ok(());
        }
        let tmp_path = qi_path.with_extension("qi.tmp");
        let bytes = serde_json::to_vec(&self.index).expect("QueueIndex serialises");
        std::fs::write(&tmp_path, &bytes).map_err(|source| EngineError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &qi_path).map_err(|source| EngineError::Io {
            path: qi_path,
            source,
        })?;
        Ok(())
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        let _ = self.persist_index();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlog_message::Severity;
    use std::path::Path;

    fn sample(body: &str) -> Msg {
        Msg::new(body.as_bytes().to_vec(), Severity::Notice, 1, 0, "127.0.0.1", "s", "h", "a", "1", 514)
    }

    fn config(dir: &Path) -> DiskQueueConfig {
        DiskQueueConfig {
            dir: dir.to_path_buf(),
            prefix: "q".into(),
            max_file_size: 64,
            file_num_digits: 3,
            persist_upd_cnt: 1,
        }
    }

    #[test]
    fn push_then_pop_preserves_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut q = DiskQueue::open(config(dir.path())).expect("open");
        q.push(&sample("a")).expect("push a");
        q.push(&sample("b")).expect("push b");

        let first = q.pop().expect("pop").expect("has a");
        let second = q.pop().expect("pop").expect("has b");
        assert_eq!(first.body(), b"a");
        assert_eq!(second.body(), b"b");
        assert!(q.pop().expect("pop").is_none());
    }

    #[test]
    fn rotates_across_file_size_boundary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut q = DiskQueue::open(config(dir.path())).expect("open");
        for i in 0..20 {
            q.push(&sample(&format!("msg-{i}"))).expect("push");
        }
        let mut seen = Vec::new();
        while let Some(m) = q.pop().expect("pop") {
            seen.push(String::from_utf8(m.body().to_vec()).expect("utf8"));
        }
        assert_eq!(seen.len(), 20);
        assert_eq!(seen[0], "msg-0");
        assert_eq!(seen[19], "msg-19");
    }

    #[test]
    fn survives_restart_via_persisted_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut q = DiskQueue::open(config(dir.path())).expect("open");
            q.push(&sample("persisted")).expect("push");
            q.persist_index().expect("persist");
        }
        let mut q = DiskQueue::open(config(dir.path())).expect("reopen");
        let m = q.pop().expect("pop").expect("still there");
        assert_eq!(m.body(), b"persisted");
    }

    #[test]
    fn index_file_is_removed_once_queue_drains() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut q = DiskQueue::open(config(dir.path())).expect("open");
        q.push(&sample("only")).expect("push");
        let _ = q.pop().expect("pop");
        q.persist_index().expect("persist");
        assert!(!dir.path().join("q.qi").exists());
    }

    #[test]
    fn corrupt_index_falls_back_to_directory_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut q = DiskQueue::open(config(dir.path())).expect("open");
            q.push(&sample("a")).expect("push");
            q.persist_index().expect("persist");
        }
        std::fs::write(dir.path().join("q.qi"), b"not json").expect("corrupt index");

        let mut q = DiskQueue::open(config(dir.path())).expect("reopen despite corruption");
        let m = q.pop().expect("pop").expect("data file still readable");
        assert_eq!(m.body(), b"a");
        assert!(dir.path().join("q.qi.previous").exists());
    }
}
