//! Side-effecting adapters: filesystem, child processes, config and logs.

pub mod analyzer;
pub mod atomic;
pub mod config;
pub mod discovery;
pub mod experiment_log;
pub mod file_store;
pub mod process;
pub mod sandbox;
pub mod tester;
pub mod transformer;
