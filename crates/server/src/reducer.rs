// Path: crates/server/src/reducer.rs
//! The server reducer: routing, proposer injection, tick sealing.

use keel_crypto::SignatureOracle;
use keel_entity::Application;
use keel_types::codec;
use keel_types::config::Config;
use keel_types::entity::{Replica, ReplicaSeed};
use keel_types::error::ErrorCode;
use keel_types::primitives::ADDRESS_BYTES;
use keel_types::server::{Command, Envelope, ReplicaKey, ServerFrame, ServerState};
use keel_types::{Address, Hash};
use tracing::{debug, info, warn};

/// The output of one tick: the successor state, the sealed frame, and the
/// envelopes to deliver in the next tick's batch.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// The successor server state.
    pub next: ServerState,
    /// The sealed frame for this tick.
    pub frame: ServerFrame,
    /// Follow-up envelopes (signature requests, commits, injected
    /// proposals), in emission order.
    pub outbox: Vec<Envelope>,
}

/// Applies one input batch at one timestamp.
///
/// Commands are processed in batch order; after the batch, one proposal is
/// injected per entity whose rotation proposer has work to do (a non-empty
/// mempool, or an in-flight proposal past its height-scaled timeout).
/// Replicas untouched this tick contribute their cached state to the root.
pub fn apply_server(
    prev: &ServerState,
    batch: &[Envelope],
    timestamp: u64,
    app: &dyn Application,
    oracle: &dyn SignatureOracle,
    config: &Config,
) -> TickOutcome {
    let mut next = prev.clone();
    let mut outbox = Vec::new();

    for env in batch {
        match &env.cmd {
            Command::Import { seed } => import(&mut next, seed),
            _ => dispatch(&mut next, env, app, oracle, &mut outbox),
        }
    }

    inject_proposals(&next, timestamp, config, &mut outbox);

    let height = prev.height + 1;
    let mut frame = ServerFrame {
        height,
        timestamp,
        inputs: batch.to_vec(),
        root: codec::server_root(next.replicas.values()),
        parent: prev.last_hash,
        hash: Hash::ZERO,
    };
    frame.hash = frame.compute_hash();

    next.height = height;
    next.last_hash = frame.hash;

    debug!(
        target: "server",
        height,
        inputs = frame.inputs.len(),
        outbox = outbox.len(),
        root = %frame.root,
        "tick sealed"
    );

    TickOutcome {
        next,
        frame,
        outbox,
    }
}

/// Instantiates one replica per quorum member, keyed
/// `jurisdiction:entity:member`. Re-importing an existing entity overwrites
/// its replicas, which makes genesis idempotent.
fn import(state: &mut ServerState, seed: &ReplicaSeed) {
    if !seed.state.quorum.is_valid() {
        warn!(
            target: "server",
            entity = %seed.address,
            "import with invalid quorum skipped"
        );
        return;
    }
    let members: Vec<Address> = seed.state.quorum.members.keys().copied().collect();
    for member in &members {
        let key = ReplicaKey::new(&seed.address, *member);
        state.replicas.insert(key, Replica::genesis(seed, *member));
    }
    info!(
        target: "server",
        entity = %seed.address,
        replicas = members.len(),
        "entity imported"
    );
}

/// Resolves the replica an envelope addresses.
///
/// `ADD_TX`, `SIGN` and `COMMIT` route to the recipient signer; `PROPOSE`
/// routes to the sender, who is the proposer. If the precise key is absent,
/// any replica of the entity is chosen and resolved through its recorded
/// signer — imprecise `to` fields degrade gracefully as long as the entity
/// exists.
fn route(state: &ServerState, env: &Envelope) -> Option<ReplicaKey> {
    let address = env.cmd.entity_address();
    let signer = match &env.cmd {
        Command::Propose { .. } => env.from,
        _ => env.to,
    };
    let key = ReplicaKey::new(address, signer);
    if state.replicas.contains_key(&key) {
        return Some(key);
    }

    let low = ReplicaKey::new(address, Address([0u8; ADDRESS_BYTES]));
    let high = ReplicaKey::new(address, Address([0xff; ADDRESS_BYTES]));
    let fallback = state.replicas.range(low..=high).next().map(|(k, _)| k);
    if let Some(k) = fallback {
        debug!(
            target: "server",
            entity = %address,
            wanted = %signer,
            resolved = %k.signer,
            "routing fallback through recorded proposer"
        );
    }
    fallback.cloned()
}

fn dispatch(
    state: &mut ServerState,
    env: &Envelope,
    app: &dyn Application,
    oracle: &dyn SignatureOracle,
    outbox: &mut Vec<Envelope>,
) {
    let Some(key) = route(state, env) else {
        warn!(
            target: "server",
            entity = %env.cmd.entity_address(),
            tag = env.cmd.tag(),
            "no replica for envelope; dropped"
        );
        return;
    };
    let Some(replica) = state.replicas.get(&key) else {
        return;
    };

    // Height pre-check: reject stale or future commits before paying for
    // transaction re-execution.
    if let Command::Commit { frame, .. } = &env.cmd {
        let expected = replica.last.height + 1;
        if frame.height != expected {
            warn!(
                target: "server",
                replica = %key,
                code = "ENTITY_HEIGHT_MISMATCH",
                expected,
                got = frame.height,
                "commit dropped by height pre-check"
            );
            return;
        }
    }

    match keel_entity::apply(replica, &env.cmd, app, oracle) {
        Ok(applied) => {
            state.replicas.insert(key, applied.replica);
            outbox.extend(applied.outbox);
        }
        Err(e) => {
            warn!(
                target: "server",
                replica = %key,
                tag = env.cmd.tag(),
                code = e.code(),
                error = %e,
                "command rejected"
            );
        }
    }
}

/// Post-tick proposal injection. A replica proposes when it is the rotation
/// proposer for its next height and either has buffered work and no
/// proposal in flight, or its in-flight proposal has outlived the
/// height-scaled timeout.
fn inject_proposals(
    state: &ServerState,
    timestamp: u64,
    config: &Config,
    outbox: &mut Vec<Envelope>,
) {
    for (key, replica) in &state.replicas {
        let proposer = replica.quorum().proposer_for(replica.last.height);
        if proposer != replica.signer {
            continue;
        }
        let ready = !replica.awaiting_sigs && !replica.mempool.is_empty();
        let timed_out = replica.proposal.as_ref().is_some_and(|p| {
            timestamp.saturating_sub(p.frame.timestamp)
                > config.proposal_timeout_ms(replica.last.height + 1)
        });
        if !(ready || timed_out) {
            continue;
        }
        debug!(
            target: "server",
            replica = %key,
            timed_out,
            "injecting proposal"
        );
        outbox.push(Envelope {
            from: proposer,
            to: proposer,
            cmd: Command::Propose {
                address: replica.address.clone(),
                timestamp,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_entity::ChatApp;
    use keel_crypto::{BlsOracle, Keypair};
    use keel_types::entity::{EntityAddress, EntityState, Quorum, SignerRecord, Transaction};
    use keel_types::Signature;

    struct Net {
        oracle: BlsOracle,
        keys: Vec<Address>,
        config: Config,
    }

    fn net(n: u8) -> Net {
        let mut oracle = BlsOracle::new();
        let mut keys = Vec::new();
        for i in 0..n {
            let kp = Keypair::from_seed(&[i + 1; 32]).unwrap();
            keys.push(oracle.register_keypair(&kp));
        }
        Net {
            oracle,
            keys,
            config: Config::default(),
        }
    }

    fn seed_for(net: &Net, threshold: u64) -> ReplicaSeed {
        ReplicaSeed {
            address: EntityAddress {
                jurisdiction: "main".into(),
                entity: "chat".into(),
            },
            state: EntityState {
                quorum: Quorum {
                    threshold,
                    members: net
                        .keys
                        .iter()
                        .map(|a| (*a, SignerRecord { nonce: 0, shares: 1 }))
                        .collect(),
                },
                domain: ChatApp::genesis_domain(),
            },
        }
    }

    fn import_env(seed: &ReplicaSeed) -> Envelope {
        Envelope {
            from: Address::ZERO,
            to: Address::ZERO,
            cmd: Command::Import { seed: seed.clone() },
        }
    }

    fn add_tx_env(seed: &ReplicaSeed, to: Address, from: Address, nonce: u64, sig: u8) -> Envelope {
        Envelope {
            from,
            to,
            cmd: Command::AddTx {
                address: seed.address.clone(),
                tx: Transaction {
                    kind: "chat".into(),
                    nonce,
                    from,
                    body: br#"{"message":"hi"}"#.to_vec(),
                    sig: Signature([sig; 96]),
                },
            },
        }
    }

    fn tick(
        net: &Net,
        prev: &ServerState,
        batch: &[Envelope],
        timestamp: u64,
    ) -> TickOutcome {
        apply_server(prev, batch, timestamp, &ChatApp, &net.oracle, &net.config)
    }

    #[test]
    fn import_creates_one_replica_per_member() {
        let net = net(3);
        let seed = seed_for(&net, 2);
        let out = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);

        assert_eq!(out.next.replicas.len(), 3);
        for (key, replica) in &out.next.replicas {
            assert_eq!(key.signer, replica.signer);
            assert_eq!(replica.last.height, 0);
        }
        assert_eq!(out.next.height, 1);
        assert_eq!(out.frame.height, 1);
        assert_eq!(out.frame.parent, Hash::ZERO);
        assert_eq!(out.frame.hash, out.frame.compute_hash());
    }

    #[test]
    fn invalid_quorum_import_is_skipped() {
        let net = net(2);
        let mut seed = seed_for(&net, 2);
        seed.state.quorum.threshold = 5; // above total shares
        let out = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);
        assert!(out.next.replicas.is_empty());
    }

    #[test]
    fn add_tx_routes_to_recipient_and_injects_proposal() {
        let net = net(3);
        let seed = seed_for(&net, 2);
        let proposer = seed.state.quorum.proposer_for(0);

        let s0 = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);
        let out = tick(
            &net,
            &s0.next,
            &[add_tx_env(&seed, proposer, net.keys[0], 0, 1)],
            200,
        );

        let key = ReplicaKey::new(&seed.address, proposer);
        assert_eq!(out.next.replicas[&key].mempool.len(), 1);
        // Only the proposer replica buffered it.
        let buffered: usize = out
            .next
            .replicas
            .values()
            .map(|r| r.mempool.len())
            .sum();
        assert_eq!(buffered, 1);

        // The post-tick injection wants the proposer to propose next tick.
        assert_eq!(out.outbox.len(), 1);
        let Envelope { from, to, cmd } = &out.outbox[0];
        assert_eq!((from, to), (&proposer, &proposer));
        assert!(matches!(cmd, Command::Propose { timestamp: 200, .. }));
    }

    #[test]
    fn routing_falls_back_through_the_entity() {
        let net = net(3);
        let seed = seed_for(&net, 2);
        let s0 = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);

        // `to` names a signer with no replica; the first replica of the
        // entity takes the transaction instead.
        let stranger = Address([0xcc; ADDRESS_BYTES]);
        let out = tick(
            &net,
            &s0.next,
            &[add_tx_env(&seed, stranger, net.keys[0], 0, 1)],
            200,
        );
        let buffered: usize = out.next.replicas.values().map(|r| r.mempool.len()).sum();
        assert_eq!(buffered, 1);

        // Unknown entity: dropped entirely.
        let mut other = seed.clone();
        other.address.entity = "absent".into();
        let out2 = tick(
            &net,
            &s0.next,
            &[add_tx_env(&other, stranger, net.keys[0], 0, 2)],
            300,
        );
        let buffered2: usize = out2.next.replicas.values().map(|r| r.mempool.len()).sum();
        assert_eq!(buffered2, 0);
    }

    #[test]
    fn commit_height_pre_check_drops_stale_commits() {
        let net = net(3);
        let seed = seed_for(&net, 2);
        let s0 = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);

        let key = ReplicaKey::new(&seed.address, net.keys[0]);
        let genesis_frame = s0.next.replicas[&key].last.clone();
        let stale = Envelope {
            from: net.keys[0],
            to: net.keys[0],
            cmd: Command::Commit {
                address: seed.address.clone(),
                hanko: Signature::PLACEHOLDER,
                frame: genesis_frame, // height 0, expected 1
                signers: vec![net.keys[0]],
            },
        };
        let out = tick(&net, &s0.next, &[stale], 200);
        // Nothing changed beyond the sealed height.
        assert_eq!(out.next.replicas, s0.next.replicas);
    }

    #[test]
    fn ticks_are_deterministic() {
        let net = net(3);
        let seed = seed_for(&net, 2);
        let proposer = seed.state.quorum.proposer_for(0);
        let batch = vec![
            import_env(&seed),
            add_tx_env(&seed, proposer, net.keys[0], 0, 1),
        ];

        let a = tick(&net, &ServerState::genesis(), &batch, 100);
        let b = tick(&net, &ServerState::genesis(), &batch, 100);
        assert_eq!(a.next, b.next);
        assert_eq!(a.frame, b.frame);
        assert_eq!(a.outbox, b.outbox);
    }

    #[test]
    fn sealing_links_parent_hashes_across_ticks() {
        let net = net(2);
        let seed = seed_for(&net, 2);
        let t1 = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);
        let t2 = tick(&net, &t1.next, &[], 200);
        let t3 = tick(&net, &t2.next, &[], 300);

        assert_eq!(t2.frame.parent, t1.frame.hash);
        assert_eq!(t3.frame.parent, t2.frame.hash);
        assert_eq!(t3.next.height, 3);
        // No inputs touched any replica: the cached root is stable.
        assert_eq!(t2.frame.root, t3.frame.root);
    }

    #[test]
    fn timeout_triggers_reproposal_injection() {
        let net = net(3);
        let seed = seed_for(&net, 2);
        let proposer = seed.state.quorum.proposer_for(0);
        let s0 = tick(&net, &ServerState::genesis(), &[import_env(&seed)], 100);
        let s1 = tick(
            &net,
            &s0.next,
            &[add_tx_env(&seed, proposer, net.keys[0], 0, 1)],
            200,
        );
        // Deliver the injected proposal; the proposer is now awaiting
        // signatures that never arrive.
        let s2 = tick(&net, &s1.next, &s1.outbox, 300);
        let key = ReplicaKey::new(&seed.address, proposer);
        assert!(s2.next.replicas[&key].awaiting_sigs);

        // Well before the timeout: no injection.
        let quiet = tick(&net, &s2.next, &[], 400);
        assert!(quiet.outbox.is_empty());

        // Past the base timeout the proposer is asked to re-propose.
        let late = tick(&net, &s2.next, &[], 300 + 5_001);
        assert_eq!(late.outbox.len(), 1);
        assert!(matches!(late.outbox[0].cmd, Command::Propose { .. }));
    }
}
