// Path: crates/types/src/entity.rs
//! Entity-level data structures.
//!
//! An entity is a replicated state machine identified by
//! `(jurisdiction, entity)`. Each quorum member holds its own [`Replica`] of
//! the entity; replicas advance exclusively through committed [`Frame`]s.

use crate::codec;
use crate::primitives::{Address, Hash, Signature};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::collections::BTreeMap;
use std::fmt;

/// Voting weight and replay counter for one quorum member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerRecord {
    /// The next transaction nonce expected from this signer.
    pub nonce: u64,
    /// The signer's voting weight.
    pub shares: u64,
}

impl Encodable for SignerRecord {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.nonce);
        s.append(&self.shares);
    }
}

impl Decodable for SignerRecord {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            nonce: rlp.val_at(0)?,
            shares: rlp.val_at(1)?,
        })
    }
}

/// The member set with per-member weights and a total threshold.
///
/// Membership is never mutated by the core; it is fixed at IMPORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    /// The share sum required for a frame to commit. At least 1.
    pub threshold: u64,
    /// Members keyed by address; the key order is the canonical order.
    pub members: BTreeMap<Address, SignerRecord>,
}

impl Quorum {
    /// Structural invariants: non-empty membership, `threshold >= 1`,
    /// `threshold <= sum(shares)`.
    pub fn is_valid(&self) -> bool {
        self.threshold >= 1 && !self.members.is_empty() && self.threshold <= self.total_shares()
    }

    /// Sum of all member shares.
    pub fn total_shares(&self) -> u64 {
        self.members.values().map(|m| m.shares).sum()
    }

    /// Deduplicated voting power of the given signers. Non-members
    /// contribute nothing.
    pub fn power_of<'a>(&self, signers: impl IntoIterator<Item = &'a Address>) -> u64 {
        let mut seen = std::collections::BTreeSet::new();
        signers
            .into_iter()
            .filter(|a| seen.insert(**a))
            .filter_map(|a| self.members.get(a))
            .map(|m| m.shares)
            .sum()
    }

    /// The deterministic proposer for a height: round-robin over the members
    /// in canonical address order. Empty membership yields the zero address,
    /// a deliberately unusable sentinel.
    pub fn proposer_for(&self, height: u64) -> Address {
        if self.members.is_empty() {
            return Address::ZERO;
        }
        let idx = (height % self.members.len() as u64) as usize;
        *self.members.keys().nth(idx).unwrap_or(&Address::ZERO)
    }
}

impl Encodable for Quorum {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.threshold);
        codec::append_map(s, &self.members);
    }
}

impl Decodable for Quorum {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            threshold: rlp.val_at(0)?,
            members: codec::decode_map(&rlp.at(1)?)?,
        })
    }
}

/// A single application-level transaction.
///
/// The `body` is an opaque canonical-JSON payload; the core never interprets
/// it. The `sig` is an opaque dedup key at the mempool boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Application-defined kind tag dispatched by the payload callback.
    pub kind: String,
    /// The sender's replay counter; must equal the sender's recorded nonce
    /// at frame-construction time.
    pub nonce: u64,
    /// The sending quorum member.
    pub from: Address,
    /// Canonical-JSON payload bytes.
    pub body: Vec<u8>,
    /// Sender signature over the canonical transaction encoding.
    pub sig: Signature,
}

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.kind);
        s.append(&self.nonce);
        s.append(&self.from);
        s.append(&self.body);
        s.append(&self.sig);
    }
}

impl Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            kind: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            from: rlp.val_at(2)?,
            body: rlp.val_at(3)?,
            sig: rlp.val_at(4)?,
        })
    }
}

/// The replicated state of an entity: its quorum plus the opaque
/// application domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    /// The fixed member set and threshold.
    pub quorum: Quorum,
    /// Canonical-JSON application state; owned by the payload callback.
    pub domain: Vec<u8>,
}

impl Encodable for EntityState {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.quorum);
        s.append(&self.domain);
    }
}

impl Decodable for EntityState {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            quorum: rlp.val_at(0)?,
            domain: rlp.val_at(1)?,
        })
    }
}

/// An entity-level block: ordered transactions plus their post-state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the entity's chain; genesis is height 0.
    pub height: u64,
    /// Proposal timestamp in milliseconds.
    pub timestamp: u64,
    /// Transactions in canonical order.
    pub txs: Vec<Transaction>,
    /// The state after applying `txs` to the previous frame's state.
    pub state: EntityState,
}

impl Encodable for Frame {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.height);
        s.append(&self.timestamp);
        s.append_list(&self.txs);
        s.append(&self.state);
    }
}

impl Decodable for Frame {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            height: rlp.val_at(0)?,
            timestamp: rlp.val_at(1)?,
            txs: rlp.list_at(2)?,
            state: rlp.val_at(3)?,
        })
    }
}

/// The hashed portion of a frame. Both fields beyond the frame's own are
/// derived, not stored: `parent_hash` is the proposing replica's cached
/// last-frame hash and `proposer` is the rotation proposer for the height,
/// so proposer and verifier always recompute the same preimage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// The frame's height.
    pub height: u64,
    /// The frame's timestamp.
    pub timestamp: u64,
    /// Hash of the previous frame (genesis hash terminates the chain).
    pub parent_hash: Hash,
    /// The rotation proposer for this height.
    pub proposer: Address,
}

impl Encodable for FrameHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.height);
        s.append(&self.timestamp);
        s.append(&self.parent_hash);
        s.append(&self.proposer);
    }
}

/// A frame in the signature-collection phase, identified by its canonical
/// hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedFrame {
    /// The frame under collection.
    pub frame: Frame,
    /// `frame_hash` of the frame's header and transactions.
    pub hash: Hash,
    /// One entry per signer that approved exactly this hash.
    pub sigs: BTreeMap<Address, Signature>,
}

impl Encodable for ProposedFrame {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.frame);
        s.append(&self.hash);
        codec::append_map(s, &self.sigs);
    }
}

impl Decodable for ProposedFrame {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            frame: rlp.val_at(0)?,
            hash: rlp.val_at(1)?,
            sigs: codec::decode_map(&rlp.at(2)?)?,
        })
    }
}

/// The two-part identifier of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityAddress {
    /// The jurisdiction the entity lives under.
    pub jurisdiction: String,
    /// The entity identifier within the jurisdiction.
    pub entity: String,
}

impl EntityAddress {
    /// The routing key `jurisdiction:entity`.
    pub fn addr_key(&self) -> String {
        format!("{}:{}", self.jurisdiction, self.entity)
    }
}

impl fmt::Display for EntityAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.jurisdiction, self.entity)
    }
}

impl Encodable for EntityAddress {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.jurisdiction);
        s.append(&self.entity);
    }
}

impl Decodable for EntityAddress {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            jurisdiction: rlp.val_at(0)?,
            entity: rlp.val_at(1)?,
        })
    }
}

/// Genesis material for instantiating an entity's replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSeed {
    /// The entity being instantiated.
    pub address: EntityAddress,
    /// The genesis state, including the quorum.
    pub state: EntityState,
}

impl Encodable for ReplicaSeed {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.address);
        s.append(&self.state);
    }
}

impl Decodable for ReplicaSeed {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            address: rlp.val_at(0)?,
            state: rlp.val_at(1)?,
        })
    }
}

/// One signer's view of one entity: the committed chain tip, the mempool,
/// and the in-flight proposal if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    /// The entity this replica belongs to.
    pub address: EntityAddress,
    /// The quorum member owning this copy. SIGN requests for this copy's
    /// proposals are addressed to it.
    pub signer: Address,
    /// True while a proposal from this replica is collecting signatures.
    pub awaiting_sigs: bool,
    /// Buffered transactions, deduplicated by signature.
    pub mempool: Vec<Transaction>,
    /// The last committed frame.
    pub last: Frame,
    /// Cached `frame_hash(last)`; the parent hash of the next proposal.
    pub last_hash: Hash,
    /// The frame currently collecting signatures, if any.
    pub proposal: Option<ProposedFrame>,
}

impl Replica {
    /// A fresh replica at genesis: height 0, empty frame over the seed
    /// state, no mempool, no proposal.
    pub fn genesis(seed: &ReplicaSeed, signer: Address) -> Self {
        let last = Frame {
            height: 0,
            timestamp: 0,
            txs: Vec::new(),
            state: seed.state.clone(),
        };
        let header = FrameHeader {
            height: 0,
            timestamp: 0,
            parent_hash: Hash::ZERO,
            proposer: seed.state.quorum.proposer_for(0),
        };
        let last_hash = codec::frame_hash(&header, &last.txs);
        Self {
            address: seed.address.clone(),
            signer,
            awaiting_sigs: false,
            mempool: Vec::new(),
            last,
            last_hash,
            proposal: None,
        }
    }

    /// The quorum governing this replica (fixed since genesis).
    pub fn quorum(&self) -> &Quorum {
        &self.last.state.quorum
    }
}

impl Encodable for Replica {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(7);
        s.append(&self.address);
        s.append(&self.signer);
        s.append(&(self.awaiting_sigs as u8));
        s.append_list(&self.mempool);
        s.append(&self.last);
        s.append(&self.last_hash);
        // Option encodes as a zero- or one-element list.
        match &self.proposal {
            Some(p) => {
                s.begin_list(1);
                s.append(p);
            }
            None => {
                s.begin_list(0);
            }
        }
    }
}

impl Decodable for Replica {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let flag: u8 = rlp.val_at(2)?;
        let proposal_rlp = rlp.at(6)?;
        let proposal = match proposal_rlp.item_count()? {
            0 => None,
            1 => Some(proposal_rlp.val_at(0)?),
            _ => return Err(DecoderError::Custom("proposal list longer than one")),
        };
        Ok(Self {
            address: rlp.val_at(0)?,
            signer: rlp.val_at(1)?,
            awaiting_sigs: flag != 0,
            mempool: rlp.list_at(3)?,
            last: rlp.val_at(4)?,
            last_hash: rlp.val_at(5)?,
            proposal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; crate::primitives::ADDRESS_BYTES])
    }

    fn quorum(threshold: u64, shares: &[(u8, u64)]) -> Quorum {
        Quorum {
            threshold,
            members: shares
                .iter()
                .map(|(b, s)| (addr(*b), SignerRecord { nonce: 0, shares: *s }))
                .collect(),
        }
    }

    #[test]
    fn quorum_invariants() {
        assert!(quorum(1, &[(1, 1)]).is_valid());
        assert!(quorum(3, &[(1, 1), (2, 1), (3, 1)]).is_valid());
        // threshold above total shares
        assert!(!quorum(4, &[(1, 1), (2, 1), (3, 1)]).is_valid());
        // zero threshold
        assert!(!quorum(0, &[(1, 1)]).is_valid());
        // empty membership
        assert!(!quorum(1, &[]).is_valid());
    }

    #[test]
    fn power_deduplicates_signers() {
        let q = quorum(3, &[(1, 2), (2, 1)]);
        let a = addr(1);
        let b = addr(2);
        assert_eq!(q.power_of([&a, &a, &b]), 3);
        let q2 = quorum(3, &[(1, 1), (2, 1)]);
        assert_eq!(q2.power_of([&a, &a, &b]), 2);
        // non-members are ignored
        assert_eq!(q2.power_of([&addr(9)]), 0);
    }

    #[test]
    fn proposer_rotates_in_address_order() {
        let q = quorum(3, &[(5, 1), (1, 1), (3, 1)]);
        let sorted: Vec<Address> = q.members.keys().copied().collect();
        for h in 0..9u64 {
            assert_eq!(q.proposer_for(h), sorted[(h % 3) as usize]);
        }
    }

    #[test]
    fn empty_membership_yields_zero_sentinel() {
        let q = Quorum {
            threshold: 1,
            members: BTreeMap::new(),
        };
        assert_eq!(q.proposer_for(7), Address::ZERO);
    }

    #[test]
    fn genesis_replica_has_reproducible_hash() {
        let seed = ReplicaSeed {
            address: EntityAddress {
                jurisdiction: "main".into(),
                entity: "chat".into(),
            },
            state: EntityState {
                quorum: quorum(1, &[(1, 1)]),
                domain: b"{}".to_vec(),
            },
        };
        let a = Replica::genesis(&seed, addr(1));
        let b = Replica::genesis(&seed, addr(1));
        assert_eq!(a.last_hash, b.last_hash);
        assert_ne!(a.last_hash, Hash::ZERO);
        assert_eq!(a.last.height, 0);
        assert!(a.proposal.is_none());
    }
}
