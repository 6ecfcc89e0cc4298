// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Types
//!
//! This crate is the foundational library for the keel replication engine,
//! containing all core data structures, the canonical codec, and the shared
//! error types.
//!
//! ## Architectural Role
//!
//! As the base crate, `keel-types` has minimal dependencies and is itself a
//! dependency for every other crate in the workspace. This structure prevents
//! circular dependencies and provides a stable, canonical definition for
//! shared types like `Frame`, `Transaction`, `Quorum`, and the various error
//! enums. Everything here has value semantics; the reducers built on top of
//! these types take values and return freshly constructed values.

/// The canonical, deterministic binary codec and the derived hashes.
pub mod codec;
/// Configuration knobs and their defaults.
pub mod config;
/// Entity-level data structures: quorums, transactions, frames, replicas.
pub mod entity;
/// A unified set of all error types used across the workspace.
pub mod error;
/// Canonicalization of opaque JSON payloads.
pub mod payload;
/// Fixed-size primitives: addresses, hashes, signatures.
pub mod primitives;
/// Server-level data structures: envelopes, commands, server state and frames.
pub mod server;

pub use primitives::{Address, Hash, Signature, ADDRESS_BYTES, HASH_BYTES, SIGNATURE_BYTES};
