// Path: crates/crypto/src/keys.rs
//! BLS12-381 keypairs.

use blst::min_pk::{PublicKey, SecretKey};
use keel_types::codec;
use keel_types::error::CryptoError;
use keel_types::Address;
use rand::RngCore;
use zeroize::Zeroizing;

/// Length in bytes of a serialized min-pk public key.
pub const PUBKEY_BYTES: usize = 48;

/// A signer keypair. The secret key zeroizes on drop; the seed material
/// used during generation is wiped as soon as the key is derived.
pub struct Keypair {
    sk: SecretKey,
    pk: PublicKey,
    address: Address,
}

impl Keypair {
    /// Generates a keypair from fresh randomness. Demo and test use only —
    /// the core never generates keys.
    pub fn generate<R: RngCore>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut ikm = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(ikm.as_mut());
        Self::from_ikm(&ikm)
    }

    /// Derives a keypair deterministically from a 32-byte seed, for
    /// reproducible fixtures.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        Self::from_ikm(seed)
    }

    fn from_ikm(ikm: &[u8; 32]) -> Result<Self, CryptoError> {
        let sk = SecretKey::key_gen(ikm, &[])
            .map_err(|e| CryptoError::InvalidKey(format!("{e:?}")))?;
        let pk = sk.sk_to_pk();
        let address = codec::address_from_pubkey(&pk.to_bytes());
        Ok(Self { sk, pk, address })
    }

    /// The signer address: rightmost 20 bytes of keccak-256 of the public
    /// key bytes.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The serialized 48-byte public key.
    pub fn public_key_bytes(&self) -> [u8; PUBKEY_BYTES] {
        self.pk.to_bytes()
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.sk
    }

    pub(crate) fn public(&self) -> &PublicKey {
        &self.pk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn seeded_generation_is_deterministic() {
        let a = Keypair::from_seed(&[7u8; 32]).unwrap();
        let b = Keypair::from_seed(&[7u8; 32]).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.public_key_bytes(), b.public_key_bytes());

        let c = Keypair::from_seed(&[8u8; 32]).unwrap();
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn random_generation_yields_distinct_addresses() {
        let mut rng = StdRng::seed_from_u64(42);
        let a = Keypair::generate(&mut rng).unwrap();
        let b = Keypair::generate(&mut rng).unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn address_matches_pubkey_derivation() {
        let kp = Keypair::from_seed(&[1u8; 32]).unwrap();
        assert_eq!(
            kp.address(),
            codec::address_from_pubkey(&kp.public_key_bytes())
        );
    }
}
