//! Stable exit codes for the `swarm` binary.

/// The batch ran to completion (individual files may still be unfixed).
pub const OK: i32 = 0;
/// Missing target directory, invalid config or another startup failure.
pub const INVALID: i32 = 1;
