use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::BackingStore;

/// Frame header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// A single mutation in the log.
///
/// On-disk frame:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LogRecord {
    Put {
        partition: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        partition: String,
        key: String,
    },
}

/// Configuration for the [`LogBackingStore`].
#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    /// `fsync` after every append. Without it the store relies on the OS
    /// page cache and a crash may lose the most recent writes.
    pub sync_on_write: bool,
}

type Index = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

struct LogState {
    writer: BufWriter<File>,
    /// Current end of the log file.
    offset: u64,
    /// Live view of the log, rebuilt by replay on open.
    index: Index,
    /// Set when a failed append could not be rolled back; the file may hold
    /// a partial frame past `offset`, so further appends are refused.
    failed: Option<String>,
}

/// File-backed backing store: an append-only log of puts and deletes.
///
/// Every mutation is framed with a length prefix and a CRC32 checksum and
/// appended to a single file; an in-memory index serves reads. On open the
/// log is replayed front-to-back. The first frame that is truncated or fails
/// its CRC marks a torn write from a crash: it and everything after it are
/// discarded and the file is truncated back to the last good frame.
///
/// A failed append is rolled back: the file is truncated to the end of the
/// last acknowledged frame and the writer is rebuilt, so a partial frame never
/// hides later appends from replay.
///
/// [`compact`](Self::compact) rewrites the file with only the live entries.
pub struct LogBackingStore {
    path: PathBuf,
    state: Mutex<LogState>,
    config: LogConfig,
}

impl LogBackingStore {
    /// Open (or create) the log at `path` and replay it.
    pub fn open(path: &Path, config: LogConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (index, good_len, frames) = replay(path)?;
        let file_len = file.metadata()?.len();
        if good_len < file_len {
            warn!(
                path = %path.display(),
                good_len,
                file_len,
                "discarding torn tail of record log"
            );
            file.set_len(good_len)?;
        }

        info!(path = %path.display(), frames, "record log opened");
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(LogState {
                writer: BufWriter::new(file),
                offset: good_len,
                index,
                failed: None,
            }),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log file in bytes.
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.lock()?.offset)
    }

    /// Rewrite the log with one `Put` frame per live entry.
    ///
    /// The new log is written to a sibling temp file, synced, and renamed
    /// over the old one, so a crash leaves either the old or the new log.
    /// Returns the size of the compacted log in bytes.
    pub fn compact(&self) -> StoreResult<u64> {
        let mut state = self.lock()?;
        let before = state.offset;

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?,
        );
        let mut written = 0u64;
        for (partition, entries) in &state.index {
            for (key, value) in entries {
                let record = LogRecord::Put {
                    partition: partition.clone(),
                    key: key.clone(),
                    value: value.clone(),
                };
                written += write_frame(&mut tmp, &record)?;
            }
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut state.writer, BufWriter::new(file));
        drop(stale.into_parts());
        state.offset = written;
        state.failed = None;

        info!(path = %self.path.display(), before, after = written, "record log compacted");
        Ok(written)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, LogState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn append(&self, state: &mut LogState, record: &LogRecord) -> StoreResult<()> {
        if let Some(reason) = &state.failed {
            return Err(StoreError::LogFailed(reason.clone()));
        }
        match self.write_record(state, record) {
            Ok(len) => {
                debug!(offset = state.offset, len, "record log append");
                state.offset += len;
                Ok(())
            }
            Err(e) => {
                warn!(offset = state.offset, error = %e, "record log append failed; rolling back");
                if let Err(rollback) = self.rollback(state) {
                    error!(error = %rollback, "record log rollback failed");
                    state.failed = Some(rollback.to_string());
                }
                Err(e)
            }
        }
    }

    fn write_record(&self, state: &mut LogState, record: &LogRecord) -> StoreResult<u64> {
        let len = write_frame(&mut state.writer, record)?;
        state.writer.flush()?;
        if self.config.sync_on_write {
            state.writer.get_ref().sync_data()?;
        }
        Ok(len)
    }

    /// Cut the file back to `state.offset` and start a fresh writer.
    ///
    /// Bytes still buffered in the old writer are discarded, not flushed.
    fn rollback(&self, state: &mut LogState) -> StoreResult<()> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut state.writer, BufWriter::new(file));
        let (old_file, _unflushed) = stale.into_parts();
        drop(old_file);
        state.writer.get_ref().set_len(state.offset)?;
        if self.config.sync_on_write {
            state.writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

/// Write one framed record, returning the number of bytes written.
fn write_frame<W: Write>(writer: &mut W, record: &LogRecord) -> StoreResult<u64> {
    let payload = bincode::serialize(record).map_err(|e| StoreError::Encoding(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Encoding(format!("record of {} bytes too large", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok((HEADER_SIZE + payload.len()) as u64)
}

/// Replay the log at `path`, returning the rebuilt index, the length of the
/// valid prefix, and the number of frames applied.
fn replay(path: &Path) -> StoreResult<(Index, u64, u64)> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut index = Index::new();
    let mut offset = 0usize;
    let mut frames = 0u64;

    while offset + HEADER_SIZE <= bytes.len() {
        let length = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let expected_crc = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]);

        let start = offset + HEADER_SIZE;
        if length == 0 || start + length > bytes.len() {
            warn!(offset, length, "truncated frame; stopping replay");
            break;
        }
        let payload = &bytes[start..start + length];

        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; stopping replay");
            break;
        }

        let record: LogRecord = match bincode::deserialize(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(offset, error = %e, "undecodable frame; stopping replay");
                break;
            }
        };
        apply(&mut index, record);

        frames += 1;
        offset = start + length;
    }

    Ok((index, offset as u64, frames))
}

fn apply(index: &mut Index, record: LogRecord) {
    match record {
        LogRecord::Put {
            partition,
            key,
            value,
        } => {
            index.entry(partition).or_default().insert(key, value);
        }
        LogRecord::Delete { partition, key } => {
            if let Some(part) = index.get_mut(&partition) {
                part.remove(&key);
                if part.is_empty() {
                    index.remove(&partition);
                }
            }
        }
    }
}

impl BackingStore for LogBackingStore {
    fn get(&self, partition: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let state = self.lock()?;
        Ok(state.index.get(partition).and_then(|p| p.get(key)).cloned())
    }

    fn put(&self, partition: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut state = self.lock()?;
        let record = LogRecord::Put {
            partition: partition.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
        };
        self.append(&mut state, &record)?;
        apply(&mut state.index, record);
        Ok(())
    }

    fn delete(&self, partition: &str, key: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let exists = state
            .index
            .get(partition)
            .is_some_and(|p| p.contains_key(key));
        if !exists {
            return Ok(false);
        }
        let record = LogRecord::Delete {
            partition: partition.to_string(),
            key: key.to_string(),
        };
        self.append(&mut state, &record)?;
        apply(&mut state.index, record);
        Ok(true)
    }

    fn scan_after(
        &self,
        partition: &str,
        after: Option<&str>,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let state = self.lock()?;
        let Some(part) = state.index.get(partition) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };
        Ok(part
            .range((lower, Bound::Unbounded))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn partitions(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.index.keys().cloned().collect())
    }
}

impl std::fmt::Debug for LogBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBackingStore")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish()
    }
}
