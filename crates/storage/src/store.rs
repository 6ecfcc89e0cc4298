// Path: crates/storage/src/store.rs
//! The redb-backed WAL and snapshot store.

use keel_types::codec;
use keel_types::error::{CodecError, StorageError};
use keel_types::server::{Envelope, ServerFrame, ServerState};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// WAL table: zero-padded 20-digit decimal sequence -> entry envelope.
const WAL: TableDefinition<&str, &[u8]> = TableDefinition::new("wal");
/// Snapshot table: `state:` + zero-padded height -> canonical state bytes,
/// plus the `current` pointer.
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

const CURRENT_KEY: &str = "current";

fn wal_key(seq: u64) -> String {
    format!("{seq:020}")
}

fn snapshot_key(height: u64) -> String {
    format!("state:{height:020}")
}

fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// The two entry kinds of the WAL, strictly alternating: every input batch
/// is followed by the server frame it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalKind {
    /// A tick's input batch, appended before the tick is applied.
    InputBatch,
    /// The sealed server frame, appended after the tick is applied.
    ServerFrame,
}

/// One WAL record: the envelope fields plus the canonical payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Which of the two record kinds this is.
    pub kind: WalKind,
    /// Contiguous sequence number, assigned at append time.
    pub seq: u64,
    /// Wall-clock timestamp of the append, in milliseconds.
    pub wall_ts_ms: u64,
    /// Canonical-codec bytes of the batch or frame.
    pub payload: Vec<u8>,
}

impl WalEntry {
    /// Decodes an `InputBatch` payload.
    pub fn decode_batch(&self) -> Result<Vec<Envelope>, CodecError> {
        codec::from_bytes_canonical_list(&self.payload)
    }

    /// Decodes a `ServerFrame` payload.
    pub fn decode_frame(&self) -> Result<ServerFrame, CodecError> {
        codec::from_bytes_canonical(&self.payload)
    }
}

/// The single-writer store. The WAL append position is the only mutable
/// cell; appends are committed (durable) before returning.
pub struct Store {
    db: Database,
    next_seq: Mutex<u64>,
}

impl Store {
    /// Opens (or creates) the store at `path`, recovering the append
    /// position from the last WAL entry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(backend)?;

        // Ensure both tables exist before any read transaction runs.
        let init = db.begin_write().map_err(backend)?;
        {
            init.open_table(WAL).map_err(backend)?;
            init.open_table(SNAPSHOTS).map_err(backend)?;
        }
        init.commit().map_err(backend)?;

        let next_seq = {
            let read = db.begin_read().map_err(backend)?;
            let wal = read.open_table(WAL).map_err(backend)?;
            let seq = match wal.last().map_err(backend)? {
                Some((_, value)) => {
                    let entry: WalEntry =
                        bincode::deserialize(value.value()).map_err(backend)?;
                    entry.seq + 1
                }
                None => 0,
            };
            seq
        };
        debug!(target: "wal", next_seq, "store opened");

        Ok(Self {
            db,
            next_seq: Mutex::new(next_seq),
        })
    }

    fn append(&self, kind: WalKind, wall_ts_ms: u64, payload: Vec<u8>) -> Result<u64, StorageError> {
        let mut next = self
            .next_seq
            .lock()
            .map_err(|_| StorageError::Backend("wal lock poisoned".into()))?;
        let seq = *next;
        let entry = WalEntry {
            kind,
            seq,
            wall_ts_ms,
            payload,
        };
        let bytes = bincode::serialize(&entry).map_err(backend)?;

        let write = self.db.begin_write().map_err(backend)?;
        {
            let mut wal = write.open_table(WAL).map_err(backend)?;
            wal.insert(wal_key(seq).as_str(), bytes.as_slice())
                .map_err(backend)?;
        }
        write.commit().map_err(backend)?;

        *next = seq + 1;
        Ok(seq)
    }

    /// Appends an input batch. Must be durable before the tick's frame is
    /// appended, which the per-append commit guarantees.
    pub fn append_input_batch(
        &self,
        wall_ts_ms: u64,
        batch: &[Envelope],
    ) -> Result<u64, StorageError> {
        self.append(
            WalKind::InputBatch,
            wall_ts_ms,
            codec::to_bytes_canonical_list(batch),
        )
    }

    /// Appends a sealed server frame.
    pub fn append_server_frame(
        &self,
        wall_ts_ms: u64,
        frame: &ServerFrame,
    ) -> Result<u64, StorageError> {
        self.append(
            WalKind::ServerFrame,
            wall_ts_ms,
            codec::to_bytes_canonical(frame),
        )
    }

    /// Reads the whole WAL in sequence order.
    pub fn read_wal(&self) -> Result<Vec<WalEntry>, StorageError> {
        let read = self.db.begin_read().map_err(backend)?;
        let wal = read.open_table(WAL).map_err(backend)?;
        let mut out = Vec::new();
        for item in wal.iter().map_err(backend)? {
            let (_, value) = item.map_err(backend)?;
            out.push(bincode::deserialize(value.value()).map_err(backend)?);
        }
        Ok(out)
    }

    /// Writes a snapshot of the full server state at its height and moves
    /// the `current` pointer to it.
    pub fn write_snapshot(&self, state: &ServerState) -> Result<(), StorageError> {
        let key = snapshot_key(state.height);
        let bytes = codec::to_bytes_canonical(state);
        let write = self.db.begin_write().map_err(backend)?;
        {
            let mut snapshots = write.open_table(SNAPSHOTS).map_err(backend)?;
            snapshots
                .insert(key.as_str(), bytes.as_slice())
                .map_err(backend)?;
            snapshots
                .insert(CURRENT_KEY, key.as_bytes())
                .map_err(backend)?;
        }
        write.commit().map_err(backend)?;
        info!(target: "wal", height = state.height, "snapshot written");
        Ok(())
    }

    /// Loads the snapshot the `current` pointer names, if any.
    pub fn load_current_snapshot(&self) -> Result<Option<(u64, ServerState)>, StorageError> {
        let read = self.db.begin_read().map_err(backend)?;
        let snapshots = read.open_table(SNAPSHOTS).map_err(backend)?;
        let Some(pointer) = snapshots.get(CURRENT_KEY).map_err(backend)? else {
            return Ok(None);
        };
        let key = String::from_utf8(pointer.value().to_vec())
            .map_err(|e| StorageError::Backend(format!("corrupt current pointer: {e}")))?;
        let Some(value) = snapshots.get(key.as_str()).map_err(backend)? else {
            return Err(StorageError::Backend(format!(
                "current pointer names missing snapshot {key}"
            )));
        };
        let state: ServerState = codec::from_bytes_canonical(value.value())?;
        Ok(Some((state.height, state)))
    }

    /// All snapshot heights currently retained, ascending.
    pub fn snapshot_heights(&self) -> Result<Vec<u64>, StorageError> {
        let read = self.db.begin_read().map_err(backend)?;
        let snapshots = read.open_table(SNAPSHOTS).map_err(backend)?;
        let mut out = Vec::new();
        for item in snapshots.iter().map_err(backend)? {
            let (key, _) = item.map_err(backend)?;
            if let Some(height) = key.value().strip_prefix("state:") {
                let parsed = height
                    .parse::<u64>()
                    .map_err(|e| StorageError::Backend(format!("corrupt snapshot key: {e}")))?;
                out.push(parsed);
            }
        }
        Ok(out)
    }

    /// Removes old snapshots, keeping every multiple of `interval` and
    /// everything at or after `current - interval`.
    pub fn compact_snapshots(&self, interval: u64) -> Result<usize, StorageError> {
        let interval = interval.max(1);
        let Some((current, _)) = self.load_current_snapshot()? else {
            return Ok(0);
        };
        let floor = current.saturating_sub(interval);
        let doomed: Vec<u64> = self
            .snapshot_heights()?
            .into_iter()
            .filter(|h| *h % interval != 0 && *h < floor)
            .collect();

        let write = self.db.begin_write().map_err(backend)?;
        {
            let mut snapshots = write.open_table(SNAPSHOTS).map_err(backend)?;
            for height in &doomed {
                snapshots
                    .remove(snapshot_key(*height).as_str())
                    .map_err(backend)?;
            }
        }
        write.commit().map_err(backend)?;
        if !doomed.is_empty() {
            debug!(target: "wal", removed = doomed.len(), floor, "snapshots compacted");
        }
        Ok(doomed.len())
    }
}
