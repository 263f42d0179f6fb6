//! Stable exit codes for the rollout CLI.

/// Every group was processed, whatever the per-group outcome.
pub const OK: i32 = 0;
/// The operator cancelled the run.
pub const INTERRUPTED: i32 = 1;
/// Invalid invocation or configuration.
pub const INVALID: i32 = 2;
