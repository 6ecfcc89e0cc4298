// Path: crates/node/src/runtime.rs
//! The tick-driving runtime.

use anyhow::{Context, Result};
use keel_crypto::{BlsOracle, SignatureOracle};
use keel_entity::Application;
use keel_server::{apply_server, TickOutcome};
use keel_storage::{replay, ReplaySettings, Store, WalKind};
use keel_types::config::Config;
use keel_types::server::{Command, Envelope, ReplicaKey, ServerFrame, ServerState};
use keel_types::Signature;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// What one tick produced: the sealed frame and the fulfilled outbox (a
/// copy of what was queued for the next tick's batch).
#[derive(Debug, Clone)]
pub struct TickResult {
    /// The sealed server frame.
    pub frame: ServerFrame,
    /// The outbox after placeholder fulfillment.
    pub outbox: Vec<Envelope>,
}

/// The single-threaded tick driver.
///
/// Owns the only mutable state in the system: the `ServerState` handle, the
/// key material (inside the oracle), the WAL/snapshot store, and the clock.
/// One tick runs to completion before the next begins; the reducers it
/// calls never suspend.
pub struct Runtime<A: Application> {
    state: ServerState,
    store: Store,
    oracle: BlsOracle,
    app: A,
    config: Config,
    clock_ms: u64,
    /// The embedded loopback transport: envelopes produced by tick `k`
    /// become the head of tick `k + 1`'s batch.
    pending: Vec<Envelope>,
}

impl<A: Application> Runtime<A> {
    /// Opens the runtime over a data directory, recovering state from the
    /// snapshot and WAL if any exist (hash-validated replay).
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        oracle: BlsOracle,
        app: A,
        config: Config,
    ) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).context("creating data directory")?;
        let store = Store::open(data_dir.as_ref().join("keel.redb"))?;
        let state = replay(
            &store,
            &app,
            &oracle,
            &config,
            &ReplaySettings {
                validate: true,
                compact_interval: config.compact_interval,
            },
        )
        .context("recovering state from the write-ahead log")?;
        info!(target: "runtime", height = state.height, "runtime opened");

        // Resume the monotonic clock after the last logged tick.
        let clock_ms = store
            .read_wal()?
            .iter()
            .rev()
            .filter(|e| e.kind == WalKind::ServerFrame)
            .find_map(|e| e.decode_frame().ok().map(|f| f.timestamp))
            .unwrap_or(0);
        Ok(Self {
            state,
            store,
            oracle,
            app,
            config,
            clock_ms,
            pending: Vec::new(),
        })
    }

    /// The current server state.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// The envelopes waiting for the next tick.
    pub fn pending(&self) -> &[Envelope] {
        &self.pending
    }

    /// The signature oracle (for building externally signed transactions).
    pub fn oracle(&self) -> &BlsOracle {
        &self.oracle
    }

    /// Runs one tick at the wall clock.
    pub fn tick(&mut self, external: &[Envelope]) -> Result<TickResult> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.tick_at(now, external)
    }

    /// Runs one tick at the given timestamp (clamped to stay strictly
    /// monotonic). Deterministic drivers and tests use this entry point.
    pub fn tick_at(&mut self, timestamp: u64, external: &[Envelope]) -> Result<TickResult> {
        let timestamp = timestamp.max(self.clock_ms + 1);
        self.clock_ms = timestamp;

        let mut batch = std::mem::take(&mut self.pending);
        batch.extend_from_slice(external);

        // The batch must be durable before the frame that derives from it.
        self.store.append_input_batch(timestamp, &batch)?;

        let TickOutcome {
            next,
            frame,
            outbox,
        } = apply_server(
            &self.state,
            &batch,
            timestamp,
            &self.app,
            &self.oracle,
            &self.config,
        );

        self.store.append_server_frame(timestamp, &frame)?;

        let outbox = self.fulfill(outbox, &next);
        self.state = next;
        self.pending = outbox.clone();

        if self.config.snapshot_every_n_frames > 0
            && self.state.height % self.config.snapshot_every_n_frames == 0
        {
            self.store.write_snapshot(&self.state)?;
            self.store
                .compact_snapshots(self.config.compact_interval)?;
        }

        debug!(
            target: "runtime",
            height = frame.height,
            batch = frame.inputs.len(),
            outbox = self.pending.len(),
            "tick complete"
        );

        Ok(TickResult { frame, outbox })
    }

    /// Replaces signature placeholders in the outbox: every `SIGN` request
    /// gets the signer's actual signature over the frame hash, and every
    /// `COMMIT` hanko is aggregated from the signatures the proposing
    /// replica collected. A placeholder that cannot be filled is left
    /// all-zero — it will fail verification downstream rather than
    /// masquerade as valid.
    fn fulfill(&self, outbox: Vec<Envelope>, next: &ServerState) -> Vec<Envelope> {
        outbox
            .into_iter()
            .map(|mut env| {
                match &mut env.cmd {
                    Command::Sign {
                        signer, frame_hash, sig, ..
                    } if sig.is_placeholder() => {
                        match self.oracle.sign(frame_hash.as_bytes(), signer) {
                            Ok(filled) => *sig = filled,
                            Err(e) => {
                                warn!(
                                    target: "runtime",
                                    signer = %signer,
                                    error = %e,
                                    "cannot fill sign placeholder"
                                );
                            }
                        }
                    }
                    Command::Commit {
                        address,
                        hanko,
                        signers,
                        ..
                    } if hanko.is_placeholder() => {
                        let key = ReplicaKey::new(address, env.from);
                        match self.collect_hanko(next, &key, signers) {
                            Some(agg) => *hanko = agg,
                            None => {
                                warn!(
                                    target: "runtime",
                                    replica = %key,
                                    "commit leaves with placeholder hanko; it will not verify"
                                );
                            }
                        }
                    }
                    _ => {}
                }
                env
            })
            .collect()
    }

    /// Aggregates the collected signatures of the proposing replica for the
    /// listed signers. `None` if any are missing or still placeholders.
    fn collect_hanko(
        &self,
        next: &ServerState,
        proposer: &ReplicaKey,
        signers: &[keel_types::Address],
    ) -> Option<Signature> {
        let replica = next.replicas.get(proposer)?;
        let proposal = replica.proposal.as_ref()?;
        let mut collected = Vec::with_capacity(signers.len());
        for signer in signers {
            let sig = proposal.sigs.get(signer)?;
            if sig.is_placeholder() {
                return None;
            }
            collected.push(*sig);
        }
        match self.oracle.aggregate(&collected) {
            Ok(agg) => Some(agg),
            Err(e) => {
                warn!(target: "runtime", error = %e, "hanko aggregation failed");
                None
            }
        }
    }
}
