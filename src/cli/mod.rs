//! CLI module for genqueue - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running a demo queue
//! against the simulated backend and inspecting configuration.

pub mod commands;

pub use commands::{Cli, Commands};
