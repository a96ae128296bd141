//! CLI module for the driftguard tool.
//!
//! This module provides the command-line interface for detecting and
//! remediating infrastructure drift.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, ReportsCommands};
pub use output::{MessageKind, OutputFormatter};
