// Path: crates/crypto/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Crypto
//!
//! The signature oracle for the keel replication engine: BLS12-381 in the
//! min-pk configuration (48-byte public keys, 96-byte G2 signatures), so
//! individual and aggregated signatures share one byte layout.
//!
//! The core treats the oracle as a capability: reducers receive
//! [`SignatureOracle`] by reference and never touch key material. The
//! address-to-public-key directory lives inside the oracle — the replicated
//! data model itself carries no keys.

/// Keypair generation and secret key handling.
pub mod keys;
/// The oracle contract and its BLS implementation.
pub mod oracle;

pub use keys::Keypair;
pub use oracle::{BlsOracle, SignatureOracle};
