// Path: crates/types/src/codec.rs
//! The canonical, deterministic binary codec and the derived hashes.
//!
//! Every persisted and hashed value goes through the RLP-based encoding
//! defined here: unsigned integers big-endian with left zeros stripped (zero
//! is the empty string), strings as UTF-8 bytes, addresses and hashes as raw
//! bytes, structs as field lists, and mappings as key-sorted `[key, value]`
//! pair lists. Centralizing the wrappers in the base crate ensures every
//! component serializes consensus-critical state identically; two values
//! that differ in any field produce distinct bytes.

use crate::entity::{EntityState, FrameHeader, Quorum, Replica, Transaction};
use crate::error::CodecError;
use crate::primitives::{Address, Hash, ADDRESS_BYTES};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

/// Encodes a value into its canonical byte representation.
///
/// Use this for every value that is written to storage or included in a
/// hash. Encoding is infallible; canonical ordering is the responsibility
/// of the type's `Encodable` impl (maps iterate sorted).
pub fn to_bytes_canonical<T: Encodable>(v: &T) -> Vec<u8> {
    rlp::encode(v).to_vec()
}

/// Decodes a value from its canonical byte representation, failing fast on
/// malformed input.
pub fn from_bytes_canonical<T: Decodable>(b: &[u8]) -> Result<T, CodecError> {
    rlp::decode(b).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encodes a slice as one canonical list.
pub fn to_bytes_canonical_list<T: Encodable>(items: &[T]) -> Vec<u8> {
    let mut s = RlpStream::new();
    s.append_list(items);
    s.out().to_vec()
}

/// Decodes a canonical list into a vector.
pub fn from_bytes_canonical_list<T: Decodable>(b: &[u8]) -> Result<Vec<T>, CodecError> {
    Rlp::new(b)
        .as_list()
        .map_err(|e| CodecError::Decode(e.to_string()))
}

/// keccak-256 of arbitrary bytes.
pub fn keccak256(bytes: &[u8]) -> Hash {
    let digest = Keccak256::digest(bytes);
    Hash(digest.into())
}

/// Derives a signer address from public key material: the rightmost 20
/// bytes of the keccak-256 of the raw key bytes.
pub fn address_from_pubkey(pk: &[u8]) -> Address {
    let digest = keccak256(pk);
    let mut out = [0u8; ADDRESS_BYTES];
    out.copy_from_slice(&digest.0[digest.0.len() - ADDRESS_BYTES..]);
    Address(out)
}

/// The canonical hash of a frame: keccak-256 over the encoded
/// `[header, txs]` pair. The post-state is deliberately not part of the
/// preimage; commits are validated by re-execution instead.
pub fn frame_hash(header: &FrameHeader, txs: &[Transaction]) -> Hash {
    let mut s = RlpStream::new_list(2);
    s.append(header);
    s.append_list(txs);
    keccak256(&s.out())
}

/// The canonical hash of a quorum definition.
pub fn quorum_hash(q: &Quorum) -> Hash {
    keccak256(&to_bytes_canonical(q))
}

/// The canonical hash of an entity state.
pub fn state_root(state: &EntityState) -> Hash {
    keccak256(&to_bytes_canonical(state))
}

/// The single deterministic root over all replicas: keccak-256 of the
/// concatenated per-replica state roots, in the caller's iteration order
/// (the replica map's key order).
pub fn server_root<'a>(replicas: impl IntoIterator<Item = &'a Replica>) -> Hash {
    let mut preimage = Vec::new();
    for replica in replicas {
        preimage.extend_from_slice(state_root(&replica.last.state).as_bytes());
    }
    keccak256(&preimage)
}

pub(crate) fn append_map<K, V>(s: &mut RlpStream, map: &BTreeMap<K, V>)
where
    K: Encodable,
    V: Encodable,
{
    s.begin_list(map.len());
    for (k, v) in map {
        s.begin_list(2);
        s.append(k);
        s.append(v);
    }
}

pub(crate) fn decode_map<K, V>(rlp: &Rlp) -> Result<BTreeMap<K, V>, DecoderError>
where
    K: Decodable + Ord,
    V: Decodable,
{
    let mut out = BTreeMap::new();
    for pair in rlp.iter() {
        if pair.item_count()? != 2 {
            return Err(DecoderError::Custom("map entry is not a pair"));
        }
        out.insert(pair.val_at(0)?, pair.val_at(1)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityAddress, Frame, ProposedFrame, ReplicaSeed, SignerRecord};
    use crate::primitives::{Signature, HASH_BYTES};
    use crate::server::{Command, Envelope, ReplicaKey, ServerFrame, ServerState};

    fn addr(b: u8) -> Address {
        Address([b; ADDRESS_BYTES])
    }

    fn sample_quorum() -> Quorum {
        Quorum {
            threshold: 2,
            members: [
                (addr(1), SignerRecord { nonce: 0, shares: 1 }),
                (addr(2), SignerRecord { nonce: 3, shares: 2 }),
            ]
            .into(),
        }
    }

    fn sample_state() -> EntityState {
        EntityState {
            quorum: sample_quorum(),
            domain: br#"{"log":[]}"#.to_vec(),
        }
    }

    fn sample_tx(n: u64) -> Transaction {
        Transaction {
            kind: "chat".into(),
            nonce: n,
            from: addr(1),
            body: br#"{"message":"hi"}"#.to_vec(),
            sig: Signature([7; 96]),
        }
    }

    fn sample_frame() -> Frame {
        Frame {
            height: 1,
            timestamp: 1234,
            txs: vec![sample_tx(0), sample_tx(1)],
            state: sample_state(),
        }
    }

    #[test]
    fn zero_strips_to_empty_string() {
        // Unsigned zero canonically encodes as the empty byte string.
        assert_eq!(to_bytes_canonical(&0u64), vec![0x80]);
        assert_eq!(to_bytes_canonical(&1u64), vec![0x01]);
        assert_eq!(to_bytes_canonical(&256u64), vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn round_trip_core_types() {
        let q = sample_quorum();
        assert_eq!(
            from_bytes_canonical::<Quorum>(&to_bytes_canonical(&q)).unwrap(),
            q
        );

        let tx = sample_tx(5);
        assert_eq!(
            from_bytes_canonical::<Transaction>(&to_bytes_canonical(&tx)).unwrap(),
            tx
        );

        let state = sample_state();
        assert_eq!(
            from_bytes_canonical::<EntityState>(&to_bytes_canonical(&state)).unwrap(),
            state
        );

        let frame = sample_frame();
        assert_eq!(
            from_bytes_canonical::<Frame>(&to_bytes_canonical(&frame)).unwrap(),
            frame
        );
    }

    #[test]
    fn round_trip_envelope_and_server_frame() {
        let env = Envelope {
            from: addr(1),
            to: addr(2),
            cmd: Command::Commit {
                address: EntityAddress {
                    jurisdiction: "main".into(),
                    entity: "chat".into(),
                },
                hanko: Signature([9; 96]),
                frame: sample_frame(),
                signers: vec![addr(1), addr(2)],
            },
        };
        assert_eq!(
            from_bytes_canonical::<Envelope>(&to_bytes_canonical(&env)).unwrap(),
            env
        );

        let mut frame = ServerFrame {
            height: 3,
            timestamp: 9000,
            inputs: vec![env],
            root: Hash([1; HASH_BYTES]),
            parent: Hash([2; HASH_BYTES]),
            hash: Hash::ZERO,
        };
        frame.hash = frame.compute_hash();
        assert_eq!(
            from_bytes_canonical::<ServerFrame>(&to_bytes_canonical(&frame)).unwrap(),
            frame
        );
    }

    #[test]
    fn round_trip_replica_and_server_state() {
        let seed = ReplicaSeed {
            address: EntityAddress {
                jurisdiction: "main".into(),
                entity: "chat".into(),
            },
            state: sample_state(),
        };
        let mut replica = Replica::genesis(&seed, addr(1));
        replica.mempool.push(sample_tx(0));
        replica.awaiting_sigs = true;
        replica.proposal = Some(ProposedFrame {
            frame: sample_frame(),
            hash: Hash([4; HASH_BYTES]),
            sigs: [(addr(1), Signature([5; 96]))].into(),
        });
        assert_eq!(
            from_bytes_canonical::<Replica>(&to_bytes_canonical(&replica)).unwrap(),
            replica
        );

        let mut server = ServerState::genesis();
        server.height = 7;
        server.last_hash = Hash([6; HASH_BYTES]);
        server
            .replicas
            .insert(ReplicaKey::new(&seed.address, addr(1)), replica);
        assert_eq!(
            from_bytes_canonical::<ServerState>(&to_bytes_canonical(&server)).unwrap(),
            server
        );
    }

    #[test]
    fn distinct_values_produce_distinct_bytes() {
        let a = sample_tx(0);
        let mut b = a.clone();
        b.nonce = 1;
        assert_ne!(to_bytes_canonical(&a), to_bytes_canonical(&b));

        let q1 = sample_quorum();
        let mut q2 = q1.clone();
        q2.threshold = 3;
        assert_ne!(quorum_hash(&q1), quorum_hash(&q2));
    }

    #[test]
    fn frame_hash_covers_header_and_txs_not_state() {
        let header = FrameHeader {
            height: 1,
            timestamp: 1234,
            parent_hash: Hash([8; HASH_BYTES]),
            proposer: addr(1),
        };
        let txs = vec![sample_tx(0)];
        let h1 = frame_hash(&header, &txs);

        let mut other_header = header.clone();
        other_header.timestamp = 1235;
        assert_ne!(frame_hash(&other_header, &txs), h1);

        assert_ne!(frame_hash(&header, &[]), h1);
        // Same header and txs always reproduce the same hash.
        assert_eq!(frame_hash(&header, &txs), h1);
    }

    #[test]
    fn server_root_is_order_sensitive_concatenation() {
        let seed = ReplicaSeed {
            address: EntityAddress {
                jurisdiction: "main".into(),
                entity: "chat".into(),
            },
            state: sample_state(),
        };
        let r1 = Replica::genesis(&seed, addr(1));
        let mut r2 = Replica::genesis(&seed, addr(2));
        r2.last.state.domain = br#"{"log":["x"]}"#.to_vec();

        let forward = server_root([&r1, &r2]);
        let reverse = server_root([&r2, &r1]);
        assert_ne!(forward, reverse);
        assert_eq!(server_root([&r1, &r2]), forward);
    }

    #[test]
    fn address_derivation_takes_rightmost_twenty_bytes() {
        let pk = [0x42u8; 48];
        let derived = address_from_pubkey(&pk);
        let full = keccak256(&pk);
        assert_eq!(derived.as_bytes(), &full.as_bytes()[12..]);
    }
}
