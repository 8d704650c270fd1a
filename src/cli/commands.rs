//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drive a session against an acceptance command
//! - list: list persisted sessions
//! - show: print one session's history
//! - report: write a Markdown report for a session

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hone - an iterate-test-correct loop for AI coding sessions
#[derive(Parser, Debug)]
#[command(name = "hone")]
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
    pub command: Commands,
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
    /// Run a session until the acceptance command passes
    Run {
        /// What the session should achieve
        goal: String,

        /// Shell command that defines success (exit 0 = done)
        #[arg(short, long)]
        accept: String,

        /// Workspace directory the session operates in
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Iteration budget for this session
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,

        /// Write a Markdown report when the session ends
        #[arg(long)]
        report: bool,

        /// Create the workspace directory if it does not exist
        #[arg(long)]
        init_workspace: bool,
    },

    /// List persisted sessions
    List {
        /// Filter by status (running, succeeded, failed, aborted)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one session's iteration history
    Show {
        /// Session ID to show
        id: String,
    },

    /// Write a Markdown report for a session
    Report {
        /// Session ID to report on
        id: String,
    },
}
