// Path: crates/node/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Node
//!
//! The runtime shell: the only effectful component of the engine. It owns
//! the mutable [`ServerState`](keel_types::server::ServerState) handle, the
//! signing keys (through the oracle), the WAL and snapshot store, and the
//! clock. Everything else in the workspace is a pure function it drives.
//!
//! Per tick: read the next monotonic timestamp, append the input batch to
//! the WAL, run the server reducer, append the sealed frame, fulfill the
//! outbox (fill signature placeholders, aggregate hankos), swap the state,
//! and loop the outbox back into the next tick's batch.

/// Demo genesis and transaction helpers.
pub mod demo;
/// The tick-driving runtime.
pub mod runtime;

pub use demo::{chat_tx, demo_genesis, DemoNet};
pub use runtime::{Runtime, TickResult};
