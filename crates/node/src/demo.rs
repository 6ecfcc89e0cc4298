// Path: crates/node/src/demo.rs
//! Demo genesis and transaction helpers.
//!
//! Keys here are derived from fixed seeds so every run (and every test) of
//! the demo network is reproducible. Production deployments would inject
//! their own key material instead; nothing below this module knows the
//! difference.

use anyhow::Result;
use keel_crypto::{BlsOracle, Keypair, SignatureOracle};
use keel_types::codec;
use keel_types::config::Config;
use keel_types::entity::{EntityAddress, EntityState, Quorum, ReplicaSeed, SignerRecord, Transaction};
use keel_types::payload;
use keel_types::server::{Command, Envelope};
use keel_types::{Address, Signature};
use serde_json::json;

/// A reproducible demo network: the oracle holding every member's keys,
/// the genesis seed, and the member addresses in canonical order.
pub struct DemoNet {
    /// Oracle with all demo keypairs registered.
    pub oracle: BlsOracle,
    /// Genesis material for the demo chat entity.
    pub seed: ReplicaSeed,
    /// Member addresses in canonical (sorted) order.
    pub members: Vec<Address>,
}

impl DemoNet {
    /// The rotation proposer for the entity height following `committed`.
    pub fn proposer_after(&self, committed: u64) -> Address {
        self.seed.state.quorum.proposer_for(committed)
    }

    /// The genesis import envelope.
    pub fn import_envelope(&self) -> Envelope {
        Envelope {
            from: Address::ZERO,
            to: Address::ZERO,
            cmd: Command::Import {
                seed: self.seed.clone(),
            },
        }
    }

    /// One `ADD_TX` envelope per member, so every replica buffers the
    /// transaction regardless of which of them proposes next.
    pub fn broadcast_tx(&self, tx: &Transaction) -> Vec<Envelope> {
        self.members
            .iter()
            .map(|member| Envelope {
                from: tx.from,
                to: *member,
                cmd: Command::AddTx {
                    address: self.seed.address.clone(),
                    tx: tx.clone(),
                },
            })
            .collect()
    }
}

/// Builds the demo chat network from the configured signer count and
/// threshold: one entity, every member holding one share.
pub fn demo_genesis(config: &Config) -> Result<DemoNet> {
    let mut oracle = BlsOracle::new();
    let mut members = Vec::new();
    for i in 0..config.total_signers {
        let mut seed = [0u8; 32];
        seed[0] = (i + 1) as u8;
        let kp = Keypair::from_seed(&seed)?;
        members.push(oracle.register_keypair(&kp));
    }
    members.sort();

    let seed = ReplicaSeed {
        address: EntityAddress {
            jurisdiction: "demo".into(),
            entity: "chat".into(),
        },
        state: EntityState {
            quorum: Quorum {
                threshold: config.quorum_threshold,
                members: members
                    .iter()
                    .map(|a| (*a, SignerRecord { nonce: 0, shares: 1 }))
                    .collect(),
            },
            domain: keel_entity::ChatApp::genesis_domain(),
        },
    };
    Ok(DemoNet {
        oracle,
        seed,
        members,
    })
}

/// Builds a signed chat transaction. The signature covers the canonical
/// transaction encoding with the signature field zeroed; the core treats it
/// purely as a dedup key, but wire transactions still carry a real one.
pub fn chat_tx(
    oracle: &dyn SignatureOracle,
    from: Address,
    nonce: u64,
    message: &str,
) -> Result<Transaction> {
    let body = payload::canonicalize(&json!({ "message": message }))?;
    let mut tx = Transaction {
        kind: "chat".into(),
        nonce,
        from,
        body,
        sig: Signature::PLACEHOLDER,
    };
    tx.sig = oracle.sign(&codec::to_bytes_canonical(&tx), &from)?;
    Ok(tx)
}
