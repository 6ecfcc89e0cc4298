// Path: crates/entity/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Entity
//!
//! The pure entity consensus reducer. One call site:
//! [`apply`]`(replica, command) -> { replica', outbox }` — no I/O, no clock
//! reads, no in-place mutation. Timestamps arrive as command arguments and
//! the caller owns delivery of the returned envelopes.
//!
//! The four-phase cycle over a weighted quorum:
//!
//! 1. `ADD_TX` buffers transactions (dedup by signature, nonces unchecked
//!    so out-of-order arrivals can wait).
//! 2. `PROPOSE` orders the mempool, executes it against the last committed
//!    state, and starts collecting signatures on the new frame's hash.
//! 3. `SIGN` accumulates member approvals; crossing the share threshold
//!    emits `COMMIT` envelopes to every member.
//! 4. `COMMIT` re-executes the frame, checks signing power and the
//!    aggregate signature, and advances the replica's chain tip.
//!
//! Application payload semantics stay behind the [`Application`] callback;
//! the reducer never interprets transaction bodies.

/// The application payload callback and the demo chat application.
pub mod app;
/// The reducer itself.
pub mod reducer;

pub use app::{Application, ChatApp};
pub use reducer::{apply, sort_canonical, Applied};
