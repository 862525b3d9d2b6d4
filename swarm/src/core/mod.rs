//! Deterministic, pure logic shared by the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod candidate;
pub mod lint_report;
pub mod policy;
pub mod quality;
pub mod test_report;
pub mod types;
