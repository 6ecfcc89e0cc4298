// Path: crates/storage/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Storage
//!
//! Persistence for the replication engine: an append-only write-ahead log
//! of input batches and sealed server frames, height-keyed snapshots of the
//! full server state, and the crash-recovery replay that rebuilds the state
//! from both.
//!
//! One `redb` database holds two tables. WAL keys are zero-padded 20-digit
//! decimal sequence numbers (contiguous from zero, assigned at append
//! time); snapshot keys are `state:` plus the zero-padded height, with a
//! `current` pointer naming the latest. Values are canonical-codec bytes;
//! WAL entries wrap them in a small bincode envelope carrying the kind,
//! sequence and wall timestamp.

/// Crash-recovery replay and WAL consistency validation.
pub mod replay;
/// The redb-backed WAL and snapshot store.
pub mod store;

pub use replay::{replay, validate_wal, ReplaySettings, WalSummary};
pub use store::{Store, WalEntry, WalKind};
