//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CONFIG_ENV_VAR;

/// driftguard - Infrastructure drift detection and remediation.
#[derive(Parser, Debug)]
#[command(name = "driftguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new driftguard configuration.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Detect drift and report it (exit 0 = clean, 1 = drift, 2 = error).
    Detect {
        /// Also write the JSON report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Detect drift and remediate it.
    Remediate {
        /// Plan the remediation without applying it.
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Also write the JSON report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run cycles on the configured schedule until interrupted.
    Watch {
        /// Seconds between cycles (overrides the configuration).
        #[arg(long)]
        interval: Option<u64>,

        /// Remediate in every cycle (overrides the configuration).
        #[arg(long)]
        remediate: bool,
    },

    /// Inspect archived cycle reports.
    Reports {
        /// Reports subcommand.
        #[command(subcommand)]
        command: ReportsCommands,
    },

    /// Remove the workspace cycle lock.
    Unlock {
        /// Only remove the lock if it has this ID.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock even if it has not expired.
        #[arg(long)]
        force: bool,
    },
}

/// Report archive subcommands.
#[derive(Subcommand, Debug)]
pub enum ReportsCommands {
    /// List archived reports, newest first.
    List {
        /// Maximum number of reports to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show an archived report (defaults to the newest).
    Show {
        /// Report file name.
        name: Option<String>,
    },

    /// Summarize drift over recent archived reports.
    Stats {
        /// Number of days to look back.
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// Write archived reports to a single JSON file.
    Export {
        /// Destination file.
        file: PathBuf,

        /// Only export reports from the last N days.
        #[arg(short, long)]
        days: Option<u32>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log line.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_remediate_flags() {
        let cli = Cli::try_parse_from([
            "driftguard",
            "--config",
            "infra/driftguard.yaml",
            "--output",
            "json",
            "remediate",
            "--dry-run",
            "--yes",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("infra/driftguard.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Remediate { dry_run: true, yes: true, report: None }
        ));
    }

    #[test]
    fn test_parse_reports_show() {
        let cli =
            Cli::try_parse_from(["driftguard", "reports", "show", "drift-report-1.json"]).unwrap();
        match cli.command {
            Commands::Reports { command: ReportsCommands::Show { name } } => {
                assert_eq!(name.as_deref(), Some("drift-report-1.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_reports_stats_and_export() {
        let cli = Cli::try_parse_from(["driftguard", "reports", "stats"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reports { command: ReportsCommands::Stats { days: 7 } }
        ));

        let args = ["driftguard", "reports", "export", "out.json", "--days", "30"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Reports { command: ReportsCommands::Export { file, days } } => {
                assert_eq!(file, PathBuf::from("out.json"));
                assert_eq!(days, Some(30));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
