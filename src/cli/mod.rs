//! Command-line interface
//!
//! This module contains the CLI commands and argument parsing
//! for the ledger operator tool.

pub mod commands;

pub use commands::{Command, LegacyStatusArg, Opt};
