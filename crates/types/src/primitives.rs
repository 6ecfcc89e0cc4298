// Path: crates/types/src/primitives.rs
//! Fixed-size primitive types shared across the engine.
//!
//! All three newtypes render as `0x`-prefixed lowercase hex and encode as
//! their raw bytes in the canonical codec, never as hex text.

use crate::error::CodecError;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of an [`Address`].
pub const ADDRESS_BYTES: usize = 20;
/// Length in bytes of a [`Hash`].
pub const HASH_BYTES: usize = 32;
/// Length in bytes of a [`Signature`].
pub const SIGNATURE_BYTES: usize = 96;

/// A 20-byte signer identifier, the rightmost 20 bytes of the keccak-256
/// hash of a public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

/// A 32-byte keccak-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; HASH_BYTES]);

/// A 96-byte aggregate-capable signature. Individual and aggregated
/// signatures share this layout.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_BYTES]);

impl Address {
    /// The all-zero address, a deliberately unusable sentinel returned by
    /// proposer selection over an empty membership.
    pub const ZERO: Address = Address([0u8; ADDRESS_BYTES]);

    /// Raw byte view, the canonical ordering key for quorum members.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Hash {
    /// The all-zero hash, used as the self-hash placeholder and as the
    /// parent of a genesis frame.
    pub const ZERO: Hash = Hash([0u8; HASH_BYTES]);

    /// Raw byte view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Signature {
    /// The all-zero placeholder the reducers emit in outbox envelopes.
    ///
    /// The runtime replaces it during outbox fulfillment; it must never
    /// survive into a committed frame. An unfilled placeholder aggregates to
    /// the all-zero value, which fails verification on any non-trivial
    /// threshold.
    pub const PLACEHOLDER: Signature = Signature([0u8; SIGNATURE_BYTES]);

    /// Whether this signature is still the unfilled placeholder.
    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }

    /// Raw byte view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::PLACEHOLDER
    }
}

fn parse_fixed_hex<const N: usize>(s: &str) -> Result<[u8; N], CodecError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let raw = hex::decode(stripped).map_err(|e| CodecError::Hex(e.to_string()))?;
    raw.try_into().map_err(|_| CodecError::Length {
        expected: N,
        got: (stripped.len()) / 2,
    })
}

macro_rules! impl_hex_display {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($ty), hex::encode(self.0))
            }
        }

        impl FromStr for $ty {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($ty(parse_fixed_hex(s)?))
            }
        }

        impl AsRef<[u8]> for $ty {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Encodable for $ty {
            fn rlp_append(&self, s: &mut RlpStream) {
                s.encoder().encode_value(&self.0);
            }
        }

        impl Decodable for $ty {
            fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
                rlp.decoder().decode_value(|bytes| {
                    bytes
                        .try_into()
                        .map($ty)
                        .map_err(|_| DecoderError::RlpInvalidLength)
                })
            }
        }
    };
}

impl_hex_display!(Address);
impl_hex_display!(Hash);
impl_hex_display!(Signature);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_rendering_round_trips() {
        let addr = Address([0xab; ADDRESS_BYTES]);
        let text = addr.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 2 + 2 * ADDRESS_BYTES);
        assert_eq!(text.parse::<Address>().unwrap(), addr);

        let hash = Hash([0x01; HASH_BYTES]);
        assert_eq!(hash.to_string().parse::<Hash>().unwrap(), hash);
    }

    #[test]
    fn rejects_wrong_length_hex() {
        assert!("0xdeadbeef".parse::<Address>().is_err());
        assert!("not hex".parse::<Hash>().is_err());
    }

    #[test]
    fn placeholder_is_all_zero() {
        assert!(Signature::PLACEHOLDER.is_placeholder());
        let mut real = [0u8; SIGNATURE_BYTES];
        real[0] = 1;
        assert!(!Signature(real).is_placeholder());
    }

    #[test]
    fn rlp_encodes_raw_bytes_not_hex() {
        let addr = Address([0x11; ADDRESS_BYTES]);
        let encoded = rlp::encode(&addr);
        // 0x80 + 20 length prefix, then the raw bytes.
        assert_eq!(encoded.len(), 1 + ADDRESS_BYTES);
        let decoded: Address = rlp::decode(&encoded).unwrap();
        assert_eq!(decoded, addr);
    }
}
