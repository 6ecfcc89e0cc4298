// Path: crates/server/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Server
//!
//! The pure server reducer: one call per tick,
//! [`apply_server`]`(prev, batch, timestamp) -> { next, frame, outbox }`.
//!
//! The server multiplexes many entities. It routes each envelope of the
//! batch to a replica, dispatches the entity reducer, injects timeout-driven
//! proposals, and seals the tick into a [`ServerFrame`] carrying the global
//! root over every replica's committed state. Crash faults only at this
//! layer: a malformed or misrouted envelope is logged and skipped, never
//! fatal.
//!
//! Determinism is the contract: identical `(prev, batch, timestamp)` produce
//! identical outputs on any host, which is what makes WAL replay possible.

/// The tick reducer.
pub mod reducer;

pub use reducer::{apply_server, TickOutcome};

#[doc(no_inline)]
pub use keel_types::server::ServerFrame;
