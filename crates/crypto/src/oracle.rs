// Path: crates/crypto/src/oracle.rs
//! The signature oracle contract and its BLS12-381 implementation.

use crate::keys::{Keypair, PUBKEY_BYTES};
use blst::min_pk::{AggregateSignature, PublicKey, SecretKey, Signature as BlsSignature};
use blst::BLST_ERROR;
use keel_types::codec;
use keel_types::error::CryptoError;
use keel_types::{Address, Hash, Signature};
use std::collections::BTreeMap;
use tracing::warn;

/// Domain separation tag of the proof-of-possession ciphersuite, required
/// for aggregate verification over a single message.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Sign / verify / aggregate / batch-verify over a fixed pairing-friendly
/// curve.
///
/// Implementations must be deterministic: identical inputs produce identical
/// outputs on any host, which the replay pipeline relies on. All failures
/// surface as [`CryptoError`]; verification predicates return `false`
/// rather than erroring.
pub trait SignatureOracle {
    /// Signs a message with the registered secret key of `signer`.
    fn sign(&self, msg: &[u8], signer: &Address) -> Result<Signature, CryptoError>;

    /// Verifies an individual signature by `signer` over `msg`.
    fn verify(&self, msg: &[u8], sig: &Signature, signer: &Address) -> bool;

    /// Aggregates signatures over the same message into one 96-byte
    /// signature.
    fn aggregate(&self, sigs: &[Signature]) -> Result<Signature, CryptoError>;

    /// Verifies an aggregate signature where every listed signer signed the
    /// same message hash.
    fn verify_batch(&self, agg: &Signature, msg_hash: &Hash, signers: &[Address]) -> bool;
}

enum Registration {
    /// Full keypair: can sign and verify.
    Local(SecretKey, PublicKey),
    /// Public key only: verify-side registration.
    Remote(PublicKey),
}

impl Registration {
    fn public(&self) -> &PublicKey {
        match self {
            Registration::Local(_, pk) => pk,
            Registration::Remote(pk) => pk,
        }
    }
}

/// BLS12-381 min-pk oracle holding the address-to-key directory.
///
/// The directory is seeded by the runtime from genesis key material; the
/// replicated data model itself never carries public keys.
#[derive(Default)]
pub struct BlsOracle {
    directory: BTreeMap<Address, Registration>,
}

impl BlsOracle {
    /// An empty oracle. Useless until keys are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a full keypair, enabling signing for its address.
    pub fn register_keypair(&mut self, keypair: &Keypair) -> Address {
        let address = keypair.address();
        self.directory.insert(
            address,
            Registration::Local(keypair.secret().clone(), keypair.public().clone()),
        );
        address
    }

    /// Registers a verify-only public key. The address is derived from the
    /// key bytes.
    pub fn register_public_key(&mut self, pk: &[u8; PUBKEY_BYTES]) -> Result<Address, CryptoError> {
        let parsed =
            PublicKey::from_bytes(pk).map_err(|e| CryptoError::InvalidKey(format!("{e:?}")))?;
        let address = codec::address_from_pubkey(pk);
        self.directory.insert(address, Registration::Remote(parsed));
        Ok(address)
    }

    fn public_keys(&self, signers: &[Address]) -> Option<Vec<&PublicKey>> {
        signers
            .iter()
            .map(|a| self.directory.get(a).map(Registration::public))
            .collect()
    }
}

impl SignatureOracle for BlsOracle {
    fn sign(&self, msg: &[u8], signer: &Address) -> Result<Signature, CryptoError> {
        match self.directory.get(signer) {
            Some(Registration::Local(sk, _)) => {
                let sig = sk.sign(msg, DST, &[]);
                Ok(Signature(sig.to_bytes()))
            }
            Some(Registration::Remote(_)) | None => Err(CryptoError::UnknownSigner(*signer)),
        }
    }

    fn verify(&self, msg: &[u8], sig: &Signature, signer: &Address) -> bool {
        let Some(entry) = self.directory.get(signer) else {
            return false;
        };
        let Ok(parsed) = BlsSignature::from_bytes(sig.as_bytes()) else {
            return false;
        };
        parsed.verify(true, msg, DST, &[], entry.public(), true) == BLST_ERROR::BLST_SUCCESS
    }

    fn aggregate(&self, sigs: &[Signature]) -> Result<Signature, CryptoError> {
        if sigs.is_empty() {
            return Err(CryptoError::AggregationFailed("no signatures".into()));
        }
        let parsed: Vec<BlsSignature> = sigs
            .iter()
            .map(|s| {
                BlsSignature::from_bytes(s.as_bytes())
                    .map_err(|_| CryptoError::InvalidSignature)
            })
            .collect::<Result<_, _>>()?;
        let refs: Vec<&BlsSignature> = parsed.iter().collect();
        let agg = AggregateSignature::aggregate(&refs, true)
            .map_err(|e| CryptoError::AggregationFailed(format!("{e:?}")))?;
        Ok(Signature(agg.to_signature().to_bytes()))
    }

    fn verify_batch(&self, agg: &Signature, msg_hash: &Hash, signers: &[Address]) -> bool {
        if agg.is_placeholder() {
            // An unfilled placeholder can reach a commit only through a
            // runtime bug; it must never validate.
            warn!(target: "crypto", "placeholder signature presented for batch verification");
            return false;
        }
        let Some(keys) = self.public_keys(signers) else {
            return false;
        };
        if keys.is_empty() {
            return false;
        }
        let Ok(parsed) = BlsSignature::from_bytes(agg.as_bytes()) else {
            return false;
        };
        parsed.fast_aggregate_verify(true, msg_hash.as_bytes(), DST, &keys)
            == BLST_ERROR::BLST_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle_with(n: u8) -> (BlsOracle, Vec<Address>) {
        let mut oracle = BlsOracle::new();
        let mut addrs = Vec::new();
        for i in 0..n {
            let kp = Keypair::from_seed(&[i + 1; 32]).unwrap();
            addrs.push(oracle.register_keypair(&kp));
        }
        (oracle, addrs)
    }

    #[test]
    fn sign_verify_round_trip() {
        let (oracle, addrs) = oracle_with(1);
        let sig = oracle.sign(b"frame", &addrs[0]).unwrap();
        assert!(oracle.verify(b"frame", &sig, &addrs[0]));
        assert!(!oracle.verify(b"other", &sig, &addrs[0]));
    }

    #[test]
    fn signing_needs_a_registered_secret() {
        let (mut oracle, _) = oracle_with(0);
        let kp = Keypair::from_seed(&[9; 32]).unwrap();
        let addr = oracle.register_public_key(&kp.public_key_bytes()).unwrap();
        assert_eq!(addr, kp.address());
        assert!(matches!(
            oracle.sign(b"m", &addr),
            Err(CryptoError::UnknownSigner(_))
        ));
        // But verification works through the public registration.
        let mut signer = BlsOracle::new();
        signer.register_keypair(&kp);
        let sig = signer.sign(b"m", &addr).unwrap();
        assert!(oracle.verify(b"m", &sig, &addr));
    }

    #[test]
    fn aggregate_verifies_against_all_signers() {
        let (oracle, addrs) = oracle_with(3);
        let msg = Hash(keel_types::codec::keccak256(b"frame").0);
        let sigs: Vec<Signature> = addrs
            .iter()
            .map(|a| oracle.sign(msg.as_bytes(), a).unwrap())
            .collect();
        let agg = oracle.aggregate(&sigs).unwrap();
        assert!(oracle.verify_batch(&agg, &msg, &addrs));

        // Missing one constituent signature fails.
        let partial = oracle.aggregate(&sigs[..2]).unwrap();
        assert!(!oracle.verify_batch(&partial, &msg, &addrs));

        // Unknown signer in the list fails closed.
        let mut with_stranger = addrs.clone();
        with_stranger.push(Address([0xee; 20]));
        assert!(!oracle.verify_batch(&agg, &msg, &with_stranger));
    }

    #[test]
    fn placeholder_never_verifies() {
        let (oracle, addrs) = oracle_with(1);
        let msg = Hash([1; 32]);
        assert!(!oracle.verify_batch(&Signature::PLACEHOLDER, &msg, &addrs));
    }

    #[test]
    fn single_signature_aggregates_to_itself() {
        let (oracle, addrs) = oracle_with(1);
        let msg = Hash([2; 32]);
        let sig = oracle.sign(msg.as_bytes(), &addrs[0]).unwrap();
        let agg = oracle.aggregate(std::slice::from_ref(&sig)).unwrap();
        assert_eq!(agg, sig);
        assert!(oracle.verify_batch(&agg, &msg, &addrs));
    }
}
