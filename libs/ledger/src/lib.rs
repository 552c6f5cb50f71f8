//! # Append-Only Event Ledger
//!
//! The ledger is the engine's source of truth: every state-changing event is
//! appended (and fsync'd) here before the state becomes observable anywhere
//! else. One JSON event per line, monotonic sequence numbers, exclusive
//! advisory lock so two engines can never share a file.
//!
//! On startup the whole file is replayed into a [`ReplayState`] that
//! reconstructs open executions, open bridge transfers, reserve balances and
//! cooldown windows. A partially-written trailing line, the footprint of a
//! crash mid-append, is truncated and startup proceeds; any other
//! inconsistency is unrecoverable corruption and the process must exit with
//! the dedicated code.

mod replay;

pub use replay::{OpenExecution, ReplayState};

use nix::fcntl::{Flock, FlockArg};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::{time, EventKind, LedgerEvent};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger {0} is locked by another engine instance")]
    Locked(String),

    #[error("ledger corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append handle over the locked ledger file.
///
/// Appends are serialized by an internal mutex; sequence numbers are assigned
/// under the same lock so they are gapless and strictly increasing.
pub struct Ledger {
    inner: Mutex<Writer>,
    path: PathBuf,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("path", &self.path).finish()
    }
}

struct Writer {
    file: Flock<File>,
    next_seq: u64,
}

impl Ledger {
    /// Open (creating if absent) and exclusively lock the ledger, replaying
    /// existing events. Returns the append handle and the replayed state.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, ReplayState), LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, _)) => return Err(LedgerError::Locked(path.display().to_string())),
        };

        let (state, truncate_to) = Self::replay_file(&mut file, &path)?;
        if let Some(offset) = truncate_to {
            tracing::warn!(
                "truncating torn trailing event in {} at byte {}",
                path.display(),
                offset
            );
            file.set_len(offset).map_err(|e| io_err(&path, e))?;
            file.seek(SeekFrom::End(0)).map_err(|e| io_err(&path, e))?;
        }

        let ledger = Self {
            inner: Mutex::new(Writer { file, next_seq: state.last_seq + 1 }),
            path,
        };
        Ok((ledger, state))
    }

    /// Append one event, fsync it, and return the full record.
    pub fn append(&self, kind: EventKind) -> Result<LedgerEvent, LedgerError> {
        let mut writer = self.inner.lock();
        let event = LedgerEvent { seq: writer.next_seq, ts_ns: time::now_ns(), kind };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        writer
            .file
            .write_all(line.as_bytes())
            .map_err(|e| io_err(&self.path, e))?;
        writer.file.sync_all().map_err(|e| io_err(&self.path, e))?;

        writer.next_seq += 1;
        Ok(event)
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan the file line by line. Returns the replayed state and, when the
    /// final line is torn, the byte offset to truncate to.
    fn replay_file(
        file: &mut Flock<File>,
        path: &Path,
    ) -> Result<(ReplayState, Option<u64>), LedgerError> {
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0)).map_err(|e| io_err(path, e))?;
        file.read_to_end(&mut bytes).map_err(|e| io_err(path, e))?;

        let mut state = ReplayState::default();
        let mut offset = 0usize;
        let mut line_no = 0usize;

        while offset < bytes.len() {
            line_no += 1;
            let line_start = offset;
            let rest = &bytes[offset..];
            let (line, consumed) = match rest.iter().position(|b| *b == b'\n') {
                Some(nl) => (&rest[..nl], nl + 1),
                None => (rest, rest.len()),
            };
            offset += consumed;

            let parsed = std::str::from_utf8(line)
                .ok()
                .and_then(|s| serde_json::from_str::<LedgerEvent>(s).ok());

            match parsed {
                Some(event) => {
                    state.apply(&event).map_err(|reason| LedgerError::Corrupt {
                        line: line_no,
                        reason,
                    })?;
                }
                None if offset >= bytes.len() => {
                    // Torn trailing event from a crash mid-append.
                    return Ok((state, Some(line_start as u64)));
                }
                None => {
                    return Err(LedgerError::Corrupt {
                        line: line_no,
                        reason: "unparseable event before end of file".to_string(),
                    });
                }
            }
        }

        Ok((state, None))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io { path: path.display().to_string(), source }
}
