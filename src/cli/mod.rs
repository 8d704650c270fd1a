//! CLI module for hone - command-line interface and subcommands.
//!
//! Provides the entry point with subcommands for running sessions and
//! inspecting persisted history.

pub mod commands;

pub use commands::Cli;
