//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: queue prompts against the simulated backend and stream events
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// genqueue - An in-process job queue for generation requests
#[derive(Parser, Debug)]
#[command(name = "genqueue")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit prompts to a queue backed by the simulated executor and stream its events
    Run {
        /// Prompts to submit, one task each
        #[arg(required = true)]
        prompts: Vec<String>,

        /// Probability (0.0-1.0) that a simulated execution fails
        #[arg(short, long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Progress steps per simulated execution
        #[arg(long, default_value_t = 4)]
        steps: u8,

        /// Delay between progress steps in milliseconds
        #[arg(long, default_value_t = 250)]
        step_delay_ms: u64,

        /// Print events as JSON lines instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}
