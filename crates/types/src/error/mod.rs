// Path: crates/types/src/error/mod.rs
//! Core error types for the keel replication engine.
//!
//! Errors are values: the reducers return them to the caller, which logs
//! and, where documented, skips. Nothing in the core retries or panics.

use crate::primitives::{Address, Hash};
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors surfaced by the canonical codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A canonical decode failed.
    #[error("canonical decode failed: {0}")]
    Decode(String),
    /// A hex string could not be parsed.
    #[error("invalid hex: {0}")]
    Hex(String),
    /// A fixed-size field had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    Length {
        /// The expected length in bytes.
        expected: usize,
        /// The actual length in bytes.
        got: usize,
    },
    /// An opaque payload could not be canonicalized.
    #[error("payload canonicalization failed: {0}")]
    Payload(String),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "CODEC_DECODE_FAILED",
            Self::Hex(_) => "CODEC_INVALID_HEX",
            Self::Length { .. } => "CODEC_INVALID_LENGTH",
            Self::Payload(_) => "CODEC_PAYLOAD_REJECTED",
        }
    }
}

/// Errors produced by the entity reducer.
///
/// Apply-time errors (`UnknownTxKind`, `SignerNotInQuorum`, `BadNonce`,
/// `FrameBuildFailed`) abandon the proposal under construction and leave
/// the replica unchanged. Commit-time errors drop the command with a log.
#[derive(Error, Debug)]
pub enum EntityError {
    /// The transaction kind has no registered handler.
    #[error("unknown transaction kind: {0}")]
    UnknownTxKind(String),
    /// The transaction sender is not a quorum member.
    #[error("signer {0} is not in the quorum")]
    SignerNotInQuorum(Address),
    /// The transaction nonce does not match the signer's recorded nonce.
    #[error("bad nonce: expected {expected}, got {got}")]
    BadNonce {
        /// The signer's recorded nonce at application time.
        expected: u64,
        /// The nonce carried by the transaction.
        got: u64,
    },
    /// A frame could not be constructed, typically because the application
    /// callback rejected a payload.
    #[error("frame build failed: {0}")]
    FrameBuildFailed(String),
    /// A commit arrived for a height other than the next one.
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch {
        /// The replica's next expected height.
        expected: u64,
        /// The height carried by the committed frame.
        got: u64,
    },
    /// Re-executing the committed transactions did not reproduce the frame.
    #[error("state hash mismatch: recomputed {recomputed}, committed {committed}")]
    StateHashMismatch {
        /// The hash recomputed from the replica's own state.
        recomputed: Hash,
        /// The hash of the frame as presented by the commit.
        committed: Hash,
    },
    /// The deduplicated signer set does not reach the quorum threshold.
    #[error("insufficient signing power: have {have}, need {need}")]
    InsufficientSigningPower {
        /// The deduplicated share sum of the presented signers.
        have: u64,
        /// The quorum threshold.
        need: u64,
    },
    /// The aggregate signature failed batch verification.
    #[error("invalid aggregate signature")]
    InvalidAggregateSignature,
}

impl ErrorCode for EntityError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownTxKind(_) => "ENTITY_UNKNOWN_TX_KIND",
            Self::SignerNotInQuorum(_) => "ENTITY_SIGNER_NOT_IN_QUORUM",
            Self::BadNonce { .. } => "ENTITY_BAD_NONCE",
            Self::FrameBuildFailed(_) => "ENTITY_FRAME_BUILD_FAILED",
            Self::HeightMismatch { .. } => "ENTITY_HEIGHT_MISMATCH",
            Self::StateHashMismatch { .. } => "ENTITY_STATE_HASH_MISMATCH",
            Self::InsufficientSigningPower { .. } => "ENTITY_INSUFFICIENT_SIGNING_POWER",
            Self::InvalidAggregateSignature => "ENTITY_INVALID_AGGREGATE_SIGNATURE",
        }
    }
}

/// Errors from cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// A signature failed verification or could not be deserialized.
    #[error("invalid signature")]
    InvalidSignature,
    /// The provided key material is malformed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// The address has no registered key material.
    #[error("unknown signer: {0}")]
    UnknownSigner(Address),
    /// Aggregation over the provided signatures failed.
    #[error("signature aggregation failed: {0}")]
    AggregationFailed(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "CRYPTO_INVALID_SIGNATURE",
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::UnknownSigner(_) => "CRYPTO_UNKNOWN_SIGNER",
            Self::AggregationFailed(_) => "CRYPTO_AGGREGATION_FAILED",
        }
    }
}

/// Errors from the WAL and snapshot stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The storage backend reported an error.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value failed to decode.
    #[error("storage decode error: {0}")]
    Codec(#[from] CodecError),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Codec(_) => "STORAGE_DECODE_ERROR",
        }
    }
}

/// Errors from crash-recovery replay and the WAL consistency validator.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// A replayed tick did not reproduce the logged frame. Fatal.
    #[error("replay divergence at height {height}: {field} recomputed {recomputed}, logged {logged}")]
    Divergence {
        /// The height of the diverging frame.
        height: u64,
        /// Which value diverged (`"hash"` or `"root"`).
        field: &'static str,
        /// The value recomputed during replay.
        recomputed: Hash,
        /// The value recorded in the WAL.
        logged: Hash,
    },
    /// The WAL violates a structural invariant. The host decides.
    #[error("WAL inconsistent: {0}")]
    WalInconsistent(String),
    /// The underlying store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for ReplayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Divergence { .. } => "REPLAY_DIVERGENCE",
            Self::WalInconsistent(_) => "REPLAY_WAL_INCONSISTENT",
            Self::Storage(_) => "REPLAY_STORAGE_ERROR",
        }
    }
}
