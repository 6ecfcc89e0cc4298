// Path: crates/types/src/server.rs
//! Server-level data structures: the routed command set, the replica map,
//! and the sealed per-tick frames.

use crate::codec;
use crate::entity::{EntityAddress, Frame, Replica, ReplicaSeed, Transaction};
use crate::primitives::{Address, Hash, Signature};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::collections::BTreeMap;
use std::fmt;

/// The unique key of a replica within a server:
/// `jurisdiction:entity:signer`. Ordering is lexicographic over the three
/// parts, which is also the canonical leaf order of the global root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaKey {
    /// The entity's jurisdiction.
    pub jurisdiction: String,
    /// The entity identifier.
    pub entity: String,
    /// The owning signer.
    pub signer: Address,
}

impl ReplicaKey {
    /// Builds the key for a signer's copy of an entity.
    pub fn new(address: &EntityAddress, signer: Address) -> Self {
        Self {
            jurisdiction: address.jurisdiction.clone(),
            entity: address.entity.clone(),
            signer,
        }
    }

    /// The `jurisdiction:entity` routing part of the key.
    pub fn addr_key(&self) -> String {
        format!("{}:{}", self.jurisdiction, self.entity)
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.jurisdiction, self.entity, self.signer)
    }
}

impl Encodable for ReplicaKey {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.jurisdiction);
        s.append(&self.entity);
        s.append(&self.signer);
    }
}

impl Decodable for ReplicaKey {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            jurisdiction: rlp.val_at(0)?,
            entity: rlp.val_at(1)?,
            signer: rlp.val_at(2)?,
        })
    }
}

/// The closed command set routed by the server. The tag is the first
/// encoded field of every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Instantiate one replica per quorum member from genesis material.
    Import {
        /// The entity address and genesis state.
        seed: ReplicaSeed,
    },
    /// Buffer a transaction in the recipient replica's mempool.
    AddTx {
        /// The target entity.
        address: EntityAddress,
        /// The transaction to buffer.
        tx: Transaction,
    },
    /// Build a frame from the mempool and start collecting signatures.
    Propose {
        /// The target entity.
        address: EntityAddress,
        /// The proposal timestamp in milliseconds.
        timestamp: u64,
    },
    /// A member's approval of a proposed frame hash.
    Sign {
        /// The target entity.
        address: EntityAddress,
        /// The approving member.
        signer: Address,
        /// The hash being approved.
        frame_hash: Hash,
        /// The member's signature over the hash (placeholder until the
        /// runtime fills it).
        sig: Signature,
    },
    /// A threshold-certified frame for final application.
    Commit {
        /// The target entity.
        address: EntityAddress,
        /// The aggregate signature over the frame hash (placeholder until
        /// the runtime fills it).
        hanko: Signature,
        /// The frame being committed.
        frame: Frame,
        /// The members whose signatures were aggregated.
        signers: Vec<Address>,
    },
}

const TAG_IMPORT: &str = "import";
const TAG_ADD_TX: &str = "add_tx";
const TAG_PROPOSE: &str = "propose";
const TAG_SIGN: &str = "sign";
const TAG_COMMIT: &str = "commit";

impl Command {
    /// The wire tag of this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Import { .. } => TAG_IMPORT,
            Command::AddTx { .. } => TAG_ADD_TX,
            Command::Propose { .. } => TAG_PROPOSE,
            Command::Sign { .. } => TAG_SIGN,
            Command::Commit { .. } => TAG_COMMIT,
        }
    }

    /// The entity this command addresses.
    pub fn entity_address(&self) -> &EntityAddress {
        match self {
            Command::Import { seed } => &seed.address,
            Command::AddTx { address, .. }
            | Command::Propose { address, .. }
            | Command::Sign { address, .. }
            | Command::Commit { address, .. } => address,
        }
    }
}

impl Encodable for Command {
    fn rlp_append(&self, s: &mut RlpStream) {
        match self {
            Command::Import { seed } => {
                s.begin_list(2);
                s.append(&TAG_IMPORT);
                s.append(seed);
            }
            Command::AddTx { address, tx } => {
                s.begin_list(3);
                s.append(&TAG_ADD_TX);
                s.append(address);
                s.append(tx);
            }
            Command::Propose { address, timestamp } => {
                s.begin_list(3);
                s.append(&TAG_PROPOSE);
                s.append(address);
                s.append(timestamp);
            }
            Command::Sign {
                address,
                signer,
                frame_hash,
                sig,
            } => {
                s.begin_list(5);
                s.append(&TAG_SIGN);
                s.append(address);
                s.append(signer);
                s.append(frame_hash);
                s.append(sig);
            }
            Command::Commit {
                address,
                hanko,
                frame,
                signers,
            } => {
                s.begin_list(5);
                s.append(&TAG_COMMIT);
                s.append(address);
                s.append(hanko);
                s.append(frame);
                s.append_list(signers);
            }
        }
    }
}

impl Decodable for Command {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let tag: String = rlp.val_at(0)?;
        match tag.as_str() {
            TAG_IMPORT => Ok(Command::Import {
                seed: rlp.val_at(1)?,
            }),
            TAG_ADD_TX => Ok(Command::AddTx {
                address: rlp.val_at(1)?,
                tx: rlp.val_at(2)?,
            }),
            TAG_PROPOSE => Ok(Command::Propose {
                address: rlp.val_at(1)?,
                timestamp: rlp.val_at(2)?,
            }),
            TAG_SIGN => Ok(Command::Sign {
                address: rlp.val_at(1)?,
                signer: rlp.val_at(2)?,
                frame_hash: rlp.val_at(3)?,
                sig: rlp.val_at(4)?,
            }),
            TAG_COMMIT => Ok(Command::Commit {
                address: rlp.val_at(1)?,
                hanko: rlp.val_at(2)?,
                frame: rlp.val_at(3)?,
                signers: rlp.list_at(4)?,
            }),
            _ => Err(DecoderError::Custom("unknown command tag")),
        }
    }
}

/// A routed message: a command travelling from one signer to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The sending signer.
    pub from: Address,
    /// The recipient signer.
    pub to: Address,
    /// The command carried.
    pub cmd: Command,
}

impl Encodable for Envelope {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.from);
        s.append(&self.to);
        s.append(&self.cmd);
    }
}

impl Decodable for Envelope {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            from: rlp.val_at(0)?,
            to: rlp.val_at(1)?,
            cmd: rlp.val_at(2)?,
        })
    }
}

/// The whole routing layer's state: one replica per signer per entity plus
/// the sealed timeline position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    /// The number of ticks applied since genesis.
    pub height: u64,
    /// All replicas, keyed by `jurisdiction:entity:signer`.
    pub replicas: BTreeMap<ReplicaKey, Replica>,
    /// Hash of the last sealed server frame.
    pub last_hash: Hash,
}

impl ServerState {
    /// The empty pre-tick state.
    pub fn genesis() -> Self {
        Self {
            height: 0,
            replicas: BTreeMap::new(),
            last_hash: Hash::ZERO,
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::genesis()
    }
}

impl Encodable for ServerState {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.height);
        codec::append_map(s, &self.replicas);
        s.append(&self.last_hash);
    }
}

impl Decodable for ServerState {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            height: rlp.val_at(0)?,
            replicas: codec::decode_map(&rlp.at(1)?)?,
            last_hash: rlp.val_at(2)?,
        })
    }
}

/// A tick-level record: the routed inputs, the post-tick global root, and
/// the parent link into the sealed timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    /// The tick height this frame seals.
    pub height: u64,
    /// The tick timestamp in milliseconds.
    pub timestamp: u64,
    /// The input batch, verbatim and in order.
    pub inputs: Vec<Envelope>,
    /// The global root over all replica states after this tick.
    pub root: Hash,
    /// Hash of the previous server frame.
    pub parent: Hash,
    /// Self-referential hash, computed with this field set to the zero
    /// placeholder.
    pub hash: Hash,
}

impl ServerFrame {
    fn rlp_append_with_hash(&self, s: &mut RlpStream, hash: &Hash) {
        s.begin_list(6);
        s.append(&self.height);
        s.append(&self.timestamp);
        s.append_list(&self.inputs);
        s.append(&self.root);
        s.append(&self.parent);
        s.append(hash);
    }

    /// Recomputes the self-referential hash: the keccak-256 of the frame
    /// encoded with the hash field zeroed.
    pub fn compute_hash(&self) -> Hash {
        let mut s = RlpStream::new();
        self.rlp_append_with_hash(&mut s, &Hash::ZERO);
        codec::keccak256(&s.out())
    }
}

impl Encodable for ServerFrame {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.rlp_append_with_hash(s, &self.hash);
    }
}

impl Decodable for ServerFrame {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            height: rlp.val_at(0)?,
            timestamp: rlp.val_at(1)?,
            inputs: rlp.list_at(2)?,
            root: rlp.val_at(3)?,
            parent: rlp.val_at(4)?,
            hash: rlp.val_at(5)?,
        })
    }
}
