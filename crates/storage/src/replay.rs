// Path: crates/storage/src/replay.rs
//! Crash-recovery replay and WAL consistency validation.
//!
//! Replay rebuilds the server state by re-running every logged input batch
//! through the same pure reducer that produced it, starting from the latest
//! snapshot. With validation on (the default), the recomputed frame hash
//! and global root must match the logged ones byte for byte; a mismatch is
//! fatal, because it means the reducers are no longer deterministic
//! relative to the log.

use crate::store::{Store, WalEntry, WalKind};
use keel_crypto::SignatureOracle;
use keel_entity::Application;
use keel_server::apply_server;
use keel_types::config::Config;
use keel_types::error::ReplayError;
use keel_types::server::{Envelope, ServerFrame, ServerState};
use tracing::{debug, info};

/// Replay tuning.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    /// Verify recomputed frame hashes and roots against the log.
    pub validate: bool,
    /// Persist a checkpoint snapshot every this many replayed frames (and
    /// once at the end).
    pub compact_interval: u64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            validate: true,
            compact_interval: keel_types::config::COMPACT_INTERVAL,
        }
    }
}

/// Summary of a structurally valid WAL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalSummary {
    /// Total entries of both kinds.
    pub entries: usize,
    /// Number of batch/frame pairs.
    pub frames: usize,
    /// Height of the first logged frame, if any.
    pub first_height: Option<u64>,
    /// Height of the last logged frame, if any.
    pub last_height: Option<u64>,
}

fn pair_entries(entries: &[WalEntry]) -> Result<Vec<(Vec<Envelope>, ServerFrame)>, ReplayError> {
    if entries.len() % 2 != 0 {
        return Err(ReplayError::WalInconsistent(format!(
            "odd entry count {} (unpaired input batch)",
            entries.len()
        )));
    }
    let mut pairs = Vec::with_capacity(entries.len() / 2);
    for (i, chunk) in entries.chunks_exact(2).enumerate() {
        let (batch_entry, frame_entry) = (&chunk[0], &chunk[1]);
        if batch_entry.kind != WalKind::InputBatch || frame_entry.kind != WalKind::ServerFrame {
            return Err(ReplayError::WalInconsistent(format!(
                "pair {i} is not input-batch followed by server-frame"
            )));
        }
        let expected = (2 * i) as u64;
        if batch_entry.seq != expected || frame_entry.seq != expected + 1 {
            return Err(ReplayError::WalInconsistent(format!(
                "sequence gap at pair {i}: got ({}, {})",
                batch_entry.seq, frame_entry.seq
            )));
        }
        let batch = batch_entry
            .decode_batch()
            .map_err(|e| ReplayError::WalInconsistent(format!("pair {i} batch: {e}")))?;
        let frame = frame_entry
            .decode_frame()
            .map_err(|e| ReplayError::WalInconsistent(format!("pair {i} frame: {e}")))?;
        pairs.push((batch, frame));
    }
    Ok(pairs)
}

/// Rebuilds the latest state from the snapshot and the WAL suffix.
pub fn replay(
    store: &Store,
    app: &dyn Application,
    oracle: &dyn SignatureOracle,
    config: &Config,
    settings: &ReplaySettings,
) -> Result<ServerState, ReplayError> {
    let (snapshot_height, mut state) = match store.load_current_snapshot()? {
        Some((height, state)) => {
            info!(target: "replay", height, "starting from snapshot");
            (height, state)
        }
        None => {
            info!(target: "replay", "starting from genesis");
            (0, ServerState::genesis())
        }
    };

    let entries = store.read_wal()?;
    let pairs = pair_entries(&entries)?;
    let mut replayed = 0u64;

    for (batch, logged) in pairs {
        if logged.height <= snapshot_height {
            continue;
        }
        let outcome = apply_server(&state, &batch, logged.timestamp, app, oracle, config);

        if settings.validate {
            if outcome.frame.hash != logged.hash {
                return Err(ReplayError::Divergence {
                    height: logged.height,
                    field: "hash",
                    recomputed: outcome.frame.hash,
                    logged: logged.hash,
                });
            }
            if outcome.frame.root != logged.root {
                return Err(ReplayError::Divergence {
                    height: logged.height,
                    field: "root",
                    recomputed: outcome.frame.root,
                    logged: logged.root,
                });
            }
        }

        state = outcome.next;
        replayed += 1;
        debug!(target: "replay", height = logged.height, "frame replayed");

        if settings.compact_interval > 0 && replayed % settings.compact_interval == 0 {
            store.write_snapshot(&state)?;
        }
    }

    store.write_snapshot(&state)?;
    info!(target: "replay", height = state.height, replayed, "replay complete");
    Ok(state)
}

/// Structural WAL validation, independent of replay: paired entries,
/// contiguous sequences, frame heights increasing by exactly one, and an
/// unbroken parent-hash chain.
pub fn validate_wal(store: &Store) -> Result<WalSummary, ReplayError> {
    let entries = store.read_wal()?;
    let batches = entries
        .iter()
        .filter(|e| e.kind == WalKind::InputBatch)
        .count();
    let frames = entries.len() - batches;
    if batches != frames {
        return Err(ReplayError::WalInconsistent(format!(
            "{batches} input batches vs {frames} server frames"
        )));
    }

    let pairs = pair_entries(&entries)?;
    let mut prev: Option<ServerFrame> = None;
    for (_, frame) in &pairs {
        if let Some(prev) = &prev {
            if frame.height != prev.height + 1 {
                return Err(ReplayError::WalInconsistent(format!(
                    "height {} follows {}",
                    frame.height, prev.height
                )));
            }
            if frame.parent != prev.hash {
                return Err(ReplayError::WalInconsistent(format!(
                    "frame {} parent {} does not match previous hash {}",
                    frame.height, frame.parent, prev.hash
                )));
            }
        } else {
            let snapshot_floor = store
                .load_current_snapshot()?
                .map(|(h, _)| h)
                .filter(|h| *h < frame.height);
            if frame.height != 1 && snapshot_floor != Some(frame.height - 1) {
                return Err(ReplayError::WalInconsistent(format!(
                    "first frame height is {}, expected 1 or snapshot + 1",
                    frame.height
                )));
            }
        }
        prev = Some(frame.clone());
    }

    Ok(WalSummary {
        entries: entries.len(),
        frames: pairs.len(),
        first_height: pairs.first().map(|(_, f)| f.height),
        last_height: pairs.last().map(|(_, f)| f.height),
    })
}
