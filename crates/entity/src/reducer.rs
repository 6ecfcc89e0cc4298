// Path: crates/entity/src/reducer.rs
//! The entity reducer: `(replica, command) -> (replica', outbox)`.

use crate::app::Application;
use keel_crypto::SignatureOracle;
use keel_types::codec;
use keel_types::entity::{EntityState, Frame, FrameHeader, ProposedFrame, Replica, Transaction};
use keel_types::error::EntityError;
use keel_types::server::{Command, Envelope};
use keel_types::{Address, Hash, Signature};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// The output of one reducer step: the successor replica and the envelopes
/// it wants delivered in a later tick.
#[derive(Debug, Clone)]
pub struct Applied {
    /// The freshly constructed successor replica.
    pub replica: Replica,
    /// Follow-up envelopes, in emission order.
    pub outbox: Vec<Envelope>,
}

impl Applied {
    fn unchanged(replica: &Replica) -> Self {
        Self {
            replica: replica.clone(),
            outbox: Vec::new(),
        }
    }
}

/// Applies one command to one replica.
///
/// Pure: the input replica is never mutated, and an `Err` means the caller
/// keeps the previous replica (the error carries the reason code to log).
/// Silent-reject cases documented on the individual phases return the
/// replica unchanged with an `Ok`.
pub fn apply(
    replica: &Replica,
    cmd: &Command,
    app: &dyn Application,
    oracle: &dyn SignatureOracle,
) -> Result<Applied, EntityError> {
    match cmd {
        // Instantiation happens at the routing layer; for an existing
        // replica an import is a no-op.
        Command::Import { .. } => Ok(Applied::unchanged(replica)),
        Command::AddTx { tx, .. } => Ok(add_tx(replica, tx)),
        Command::Propose { timestamp, .. } => propose(replica, *timestamp, app),
        Command::Sign {
            signer,
            frame_hash,
            sig,
            ..
        } => Ok(sign(replica, *signer, *frame_hash, *sig)),
        Command::Commit {
            hanko,
            frame,
            signers,
            ..
        } => commit(replica, hanko, frame, signers, app, oracle),
    }
}

/// Orders transactions canonically: nonce ascending, then sender address
/// bytes, then kind bytes, with insertion order as the final tie-break
/// (the sort is stable).
pub fn sort_canonical(txs: &mut [Transaction]) {
    txs.sort_by(|a, b| {
        a.nonce
            .cmp(&b.nonce)
            .then_with(|| a.from.as_bytes().cmp(b.from.as_bytes()))
            .then_with(|| a.kind.as_bytes().cmp(b.kind.as_bytes()))
    });
}

/// Buffers a transaction, deduplicating by signature. Nonce validity is
/// deliberately not checked here: a transaction that arrived ahead of its
/// turn stays buffered until frame construction decides its fate.
fn add_tx(replica: &Replica, tx: &Transaction) -> Applied {
    if replica.mempool.iter().any(|t| t.sig == tx.sig) {
        debug!(target: "entity", entity = %replica.address, "duplicate transaction ignored");
        return Applied::unchanged(replica);
    }
    let mut next = replica.clone();
    next.mempool.push(tx.clone());
    Applied {
        replica: next,
        outbox: Vec::new(),
    }
}

/// Executes transactions in order against a state, bumping each applied
/// sender's recorded nonce. Any rejection abandons the whole execution.
fn execute(
    state: &EntityState,
    txs: &[Transaction],
    app: &dyn Application,
) -> Result<EntityState, EntityError> {
    let mut next = state.clone();
    for tx in txs {
        if !app.supports(&tx.kind) {
            return Err(EntityError::UnknownTxKind(tx.kind.clone()));
        }
        let record = next
            .quorum
            .members
            .get(&tx.from)
            .ok_or(EntityError::SignerNotInQuorum(tx.from))?;
        if tx.nonce != record.nonce {
            return Err(EntityError::BadNonce {
                expected: record.nonce,
                got: tx.nonce,
            });
        }
        next.domain = app.apply_tx(&tx.kind, &tx.body, &next.domain)?;
        if let Some(record) = next.quorum.members.get_mut(&tx.from) {
            record.nonce += 1;
        }
    }
    Ok(next)
}

/// The frame-hash preimage header for a frame at `height` proposed on top
/// of `parent_hash`. The proposer slot rotates over the member set by the
/// parent height, so every replica at the same chain tip derives the same
/// header.
fn header_for(replica: &Replica, height: u64, timestamp: u64) -> FrameHeader {
    FrameHeader {
        height,
        timestamp,
        parent_hash: replica.last_hash,
        proposer: replica.quorum().proposer_for(height.saturating_sub(1)),
    }
}

fn propose(
    replica: &Replica,
    timestamp: u64,
    app: &dyn Application,
) -> Result<Applied, EntityError> {
    let mut working = replica.clone();

    if working.awaiting_sigs {
        // A propose while a proposal is in flight is the routing layer's
        // timeout re-proposal: the stale frame's transactions return to the
        // front of the mempool and collection starts over at the new
        // timestamp (the old partial signatures are bound to the old hash).
        let Some(stale) = working.proposal.take() else {
            debug!(target: "entity", entity = %replica.address, "propose while awaiting without a proposal; ignoring");
            return Ok(Applied::unchanged(replica));
        };
        warn!(
            target: "entity",
            entity = %replica.address,
            height = stale.frame.height,
            "re-proposing a timed-out frame"
        );
        let mut restored = stale.frame.txs;
        for tx in working.mempool.drain(..) {
            if !restored.iter().any(|t| t.sig == tx.sig) {
                restored.push(tx);
            }
        }
        working.mempool = restored;
        working.awaiting_sigs = false;
    }

    if working.mempool.is_empty() {
        debug!(target: "entity", entity = %replica.address, "propose with empty mempool is a no-op");
        return Ok(Applied {
            replica: working,
            outbox: Vec::new(),
        });
    }

    let mut ordered = working.mempool.clone();
    sort_canonical(&mut ordered);

    // Any rejected transaction abandons the proposal; the caller keeps the
    // previous replica and the mempool is not drained.
    let post_state = execute(&working.last.state, &ordered, app)?;

    let height = working.last.height + 1;
    let header = header_for(&working, height, timestamp);
    let hash = codec::frame_hash(&header, &ordered);
    let frame = Frame {
        height,
        timestamp,
        txs: ordered,
        state: post_state,
    };

    let mut sigs = BTreeMap::new();
    // Literal source behavior: the proposer's slot is pre-seeded only in
    // the single-share case, where no other signer will ever sign.
    if working.quorum().threshold == 1 && working.quorum().members.contains_key(&working.signer) {
        sigs.insert(working.signer, Signature::PLACEHOLDER);
    }

    let outbox = working
        .quorum()
        .members
        .keys()
        .map(|member| Envelope {
            from: *member,
            to: working.signer,
            cmd: Command::Sign {
                address: working.address.clone(),
                signer: *member,
                frame_hash: hash,
                sig: Signature::PLACEHOLDER,
            },
        })
        .collect();

    debug!(
        target: "entity",
        entity = %replica.address,
        height,
        txs = frame.txs.len(),
        hash = %hash,
        "proposal created"
    );

    working.proposal = Some(ProposedFrame { frame, hash, sigs });
    working.awaiting_sigs = true;
    working.mempool = Vec::new();

    Ok(Applied {
        replica: working,
        outbox,
    })
}

/// Share sum of the signatures actually collected (placeholder seeds carry
/// no weight until the runtime-filled signature replaces them).
fn collected_power(replica: &Replica, sigs: &BTreeMap<Address, Signature>) -> u64 {
    replica
        .quorum()
        .power_of(sigs.iter().filter(|(_, s)| !s.is_placeholder()).map(|(a, _)| a))
}

fn sign(replica: &Replica, signer: Address, frame_hash: Hash, sig: Signature) -> Applied {
    if !replica.awaiting_sigs {
        debug!(target: "entity", entity = %replica.address, "sign while not awaiting; ignoring");
        return Applied::unchanged(replica);
    }
    let Some(proposal) = &replica.proposal else {
        debug!(target: "entity", entity = %replica.address, "sign without a proposal; ignoring");
        return Applied::unchanged(replica);
    };
    if frame_hash != proposal.hash {
        debug!(
            target: "entity",
            entity = %replica.address,
            got = %frame_hash,
            want = %proposal.hash,
            "sign for a different frame hash; ignoring"
        );
        return Applied::unchanged(replica);
    }
    if !replica.quorum().members.contains_key(&signer) {
        debug!(target: "entity", entity = %replica.address, signer = %signer, "sign from non-member; ignoring");
        return Applied::unchanged(replica);
    }
    if proposal
        .sigs
        .get(&signer)
        .is_some_and(|existing| !existing.is_placeholder())
    {
        debug!(target: "entity", entity = %replica.address, signer = %signer, "duplicate sign; ignoring");
        return Applied::unchanged(replica);
    }

    let mut next = replica.clone();
    let threshold = next.quorum().threshold;
    let Some(proposal) = next.proposal.as_mut() else {
        return Applied::unchanged(replica);
    };

    let power_before = collected_power(replica, &proposal.sigs);
    proposal.sigs.insert(signer, sig);
    let power_after = collected_power(replica, &proposal.sigs);

    debug!(
        target: "entity",
        entity = %replica.address,
        signer = %signer,
        power_after,
        threshold,
        "signature collected"
    );

    if !(power_before < threshold && threshold <= power_after) {
        return Applied {
            replica: next,
            outbox: Vec::new(),
        };
    }

    // Threshold crossed: certify to every member. Only actually collected
    // signatures are exported; the hanko placeholder is the runtime's to
    // fill from this replica's collection.
    let signers: Vec<Address> = proposal
        .sigs
        .iter()
        .filter(|(_, s)| !s.is_placeholder())
        .map(|(a, _)| *a)
        .collect();
    let frame = proposal.frame.clone();
    let outbox = next
        .quorum()
        .members
        .keys()
        .map(|member| Envelope {
            from: next.signer,
            to: *member,
            cmd: Command::Commit {
                address: next.address.clone(),
                hanko: Signature::PLACEHOLDER,
                frame: frame.clone(),
                signers: signers.clone(),
            },
        })
        .collect();

    debug!(
        target: "entity",
        entity = %replica.address,
        height = frame.height,
        signers = signers.len(),
        "threshold crossed, emitting commits"
    );

    Applied {
        replica: next,
        outbox,
    }
}

fn commit(
    replica: &Replica,
    hanko: &Signature,
    frame: &Frame,
    signers: &[Address],
    app: &dyn Application,
    oracle: &dyn SignatureOracle,
) -> Result<Applied, EntityError> {
    let expected = replica.last.height + 1;
    if frame.height != expected {
        return Err(EntityError::HeightMismatch {
            expected,
            got: frame.height,
        });
    }

    // Deterministic re-execution against our own chain tip. The recomputed
    // post-state must be bit-identical to the committed one.
    let recomputed = execute(&replica.last.state, &frame.txs, app)?;
    if recomputed != frame.state {
        return Err(EntityError::StateHashMismatch {
            recomputed: codec::state_root(&recomputed),
            committed: codec::state_root(&frame.state),
        });
    }
    let header = header_for(replica, frame.height, frame.timestamp);
    let frame_hash = codec::frame_hash(&header, &frame.txs);

    let distinct: Vec<Address> = signers
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let have = replica.quorum().power_of(distinct.iter());
    let need = replica.quorum().threshold;
    if have < need {
        return Err(EntityError::InsufficientSigningPower { have, need });
    }

    if !oracle.verify_batch(hanko, &frame_hash, &distinct) {
        return Err(EntityError::InvalidAggregateSignature);
    }

    let mut next = replica.clone();
    next.mempool
        .retain(|t| !frame.txs.iter().any(|c| c.sig == t.sig));
    next.last = frame.clone();
    next.last_hash = frame_hash;
    next.proposal = None;
    next.awaiting_sigs = false;

    debug!(
        target: "entity",
        entity = %replica.address,
        height = frame.height,
        hash = %frame_hash,
        "frame committed"
    );

    Ok(Applied {
        replica: next,
        outbox: Vec::new(),
    })
}
