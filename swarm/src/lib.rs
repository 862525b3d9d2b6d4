//! Sandboxed analyze/fix/judge repair loop for source files.
//!
//! Each target file is driven through repeated `Auditing -> Fixing -> Judging`
//! cycles until its tests pass or an iteration limit forces termination. The
//! crate enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (output parsing, quality
//!   comparison, candidate extraction, termination policy). No I/O.
//! - **[`io`]**: Side-effecting adapters (path sandbox, file store, child
//!   processes, config, experiment log). External tools sit behind traits so
//!   tests can script them.
//!
//! Orchestration modules ([`machine`], [`batch`]) coordinate core logic with
//! I/O to implement the `swarm` binary.

pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod machine;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
