// Path: crates/types/src/config.rs
//! Configuration knobs and their defaults.
//!
//! The reducers are tick-agnostic; everything here is either demo-genesis
//! material or liveness/persistence tuning consumed by the server reducer
//! and the runtime shell.

use serde::Deserialize;

/// Target tick cadence in milliseconds. Informational.
pub const TICK_INTERVAL_MS: u64 = 100;
/// Demo genesis quorum threshold.
pub const QUORUM_THRESHOLD_DEFAULT: u64 = 3;
/// Demo genesis signer count.
pub const TOTAL_SIGNERS_DEFAULT: usize = 5;
/// Base proposal timeout in milliseconds.
pub const PROPOSAL_BASE_TIMEOUT_MS: u64 = 5_000;
/// Growth factor applied to the proposal timeout per rotation epoch.
pub const TIMEOUT_MULTIPLIER: f64 = 1.5;
/// Heights per timeout rotation epoch.
pub const TIMEOUT_ROTATION_EPOCH: u64 = 1_000;
/// Upper bound on the proposal timeout in milliseconds.
pub const TIMEOUT_CAP_MS: u64 = 60_000;
/// Snapshot cadence of the runtime, in sealed frames.
pub const SNAPSHOT_EVERY_N_FRAMES: u64 = 100;
/// Snapshot retention and replay-checkpoint interval.
pub const COMPACT_INTERVAL: u64 = 100;

/// Tunable engine parameters, loadable from TOML. Every field has a
/// default, so an empty file (or no file) is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Target tick cadence in milliseconds.
    pub tick_interval_ms: u64,
    /// Demo genesis quorum threshold.
    pub quorum_threshold: u64,
    /// Demo genesis signer count.
    pub total_signers: usize,
    /// Base proposal timeout in milliseconds.
    pub proposal_base_timeout_ms: u64,
    /// Growth factor applied per rotation epoch.
    pub timeout_multiplier: f64,
    /// Heights per timeout rotation epoch.
    pub timeout_rotation_epoch: u64,
    /// Upper bound on the proposal timeout in milliseconds.
    pub timeout_cap_ms: u64,
    /// Snapshot cadence of the runtime, in sealed frames.
    pub snapshot_every_n_frames: u64,
    /// Snapshot retention and replay-checkpoint interval.
    pub compact_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            quorum_threshold: QUORUM_THRESHOLD_DEFAULT,
            total_signers: TOTAL_SIGNERS_DEFAULT,
            proposal_base_timeout_ms: PROPOSAL_BASE_TIMEOUT_MS,
            timeout_multiplier: TIMEOUT_MULTIPLIER,
            timeout_rotation_epoch: TIMEOUT_ROTATION_EPOCH,
            timeout_cap_ms: TIMEOUT_CAP_MS,
            snapshot_every_n_frames: SNAPSHOT_EVERY_N_FRAMES,
            compact_interval: COMPACT_INTERVAL,
        }
    }
}

impl Config {
    /// The proposal timeout for a height:
    /// `min(base * multiplier^(height / rotation_epoch), cap)`. Re-proposal
    /// is a new command in a later tick, never a preemption.
    pub fn proposal_timeout_ms(&self, height: u64) -> u64 {
        let epochs = (height / self.timeout_rotation_epoch.max(1)) as i32;
        let scaled = self.proposal_base_timeout_ms as f64 * self.timeout_multiplier.powi(epochs);
        if scaled >= self.timeout_cap_ms as f64 {
            self.timeout_cap_ms
        } else {
            scaled as u64
        }
    }
}
