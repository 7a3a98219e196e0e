//! Command-line interface for circuit-forge.
//!
//! Provides commands for running the generation pipeline, maintaining the
//! duplicate cache, and sampling single compositions.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
