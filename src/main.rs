//! driftguard CLI entrypoint.
//!
//! This is the main entrypoint for the driftguard command-line tool.
//! Logs go to stderr; reports go to stdout or to files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use driftguard::cancel::CancelToken;
use driftguard::cli::{Cli, Commands, LogFormat, MessageKind, OutputFormatter, ReportsCommands};
use driftguard::config::{find_config_file, ConfigParser, ConfigValidator, EngineConfig};
use driftguard::engine::{Engine, EnginePaths};
use driftguard::error::{DriftError, Result};
use driftguard::report::{
    load_archived, CycleMode, CycleReport, ReportExport, ReportStats, EXIT_CLEAN, EXIT_DRIFT,
    EXIT_ERROR,
};
use driftguard::state::{LocalWorkspace, WorkspaceStore, WORKSPACE_DIR};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Detect { report } => {
            cmd_detect(config_path, report.as_deref(), &formatter).await
        }
        Commands::Remediate { dry_run, yes, report } => {
            cmd_remediate(config_path, dry_run, yes, report.as_deref(), &formatter).await
        }
        Commands::Watch { interval, remediate } => {
            cmd_watch(config_path, interval, remediate, &formatter).await
        }
        Commands::Reports { command } => cmd_reports(config_path, command, &formatter).await,
        Commands::Unlock { lock_id, force } => {
            cmd_unlock(config_path, lock_id.as_deref(), force, &formatter).await
        }
    }
}

/// Initialize a new configuration.
fn cmd_init(path: &Path, force: bool) -> Result<u8> {
    info!("Initializing driftguard in: {}", path.display());

    let config_path = path.join("driftguard.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(EXIT_ERROR);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/driftguard.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let workspace_entry = format!("{WORKSPACE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", workspace_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# driftguard")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{workspace_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nInitialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit driftguard.yaml to point at your declared state");
    eprintln!("  2. Run 'driftguard validate' to check the configuration");
    eprintln!("  3. Run 'driftguard detect' to look for drift");
    eprintln!("  4. Run 'driftguard remediate --dry-run' to preview corrective actions");

    Ok(EXIT_CLEAN)
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, config_file) = load_config(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let result = ConfigValidator::new().check(&config);
    print_stdout(&formatter.format_validation(&result, show_warnings))?;

    if result.is_valid() {
        eprintln!("\nConfiguration summary:");
        eprintln!("  Project: {}", config.qualified_name());
        eprintln!("  State: {:?} at {}", config.state.source, config.state.path);
        eprintln!("  Inspector: {:?}", config.inspector.backend);
        eprintln!("  Provisioner: {:?}", config.remediation.provisioner.backend);
        Ok(EXIT_CLEAN)
    } else {
        Ok(EXIT_ERROR)
    }
}

/// Detect drift.
async fn cmd_detect(
    config_path: Option<&Path>,
    report_path: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let engine = load_engine(config_path)?;
    let report = engine.run_cycle(CycleMode::Detect, &CancelToken::new()).await?;
    emit_report(&report, report_path, formatter)?;
    Ok(report.exit_code())
}

/// Remediate drift.
async fn cmd_remediate(
    config_path: Option<&Path>,
    dry_run: bool,
    auto_approve: bool,
    report_path: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let engine = load_engine(config_path)?;
    let cancel = CancelToken::new();

    if dry_run {
        let report = engine.run_cycle(CycleMode::DryRun, &cancel).await?;
        emit_report(&report, report_path, formatter)?;
        return Ok(report.exit_code());
    }

    if !auto_approve {
        let preview = engine.run_cycle(CycleMode::DryRun, &cancel).await?;
        emit_report(&preview, None, formatter)?;

        let has_actions = preview
            .plan
            .as_ref()
            .is_some_and(|plan| plan.actions.iter().any(|a| a.kind.is_mutating()));
        if preview.is_failed() || !has_actions {
            eprintln!("Nothing to remediate.");
            return Ok(preview.exit_code());
        }

        if !confirm("Do you want to apply this remediation plan? [y/N]: ")? {
            eprintln!("Remediation cancelled.");
            return Ok(EXIT_DRIFT);
        }
    }

    let runner = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current action");
            runner.cancel();
        }
    });

    let report = engine.run_cycle(CycleMode::Remediate, &cancel).await?;
    emit_report(&report, report_path, formatter)?;
    Ok(report.exit_code())
}

/// Run cycles on a schedule until interrupted.
async fn cmd_watch(
    config_path: Option<&Path>,
    interval: Option<u64>,
    remediate: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let engine = load_engine(config_path)?;
    let schedule = engine.config().schedule;
    let interval = Duration::from_secs(interval.unwrap_or(schedule.interval_secs).max(1));
    let mode = if remediate || schedule.remediate {
        CycleMode::Remediate
    } else {
        CycleMode::Detect
    };

    let cancel = CancelToken::new();
    let runner = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current cycle");
            runner.cancel();
        }
    });

    engine
        .run_loop(mode, interval, &cancel, |report| {
            if let Err(e) = print_stdout(&formatter.format_report(report)) {
                warn!("Failed to print report: {}", e);
            }
        })
        .await;

    Ok(EXIT_CLEAN)
}

/// Inspect archived reports.
async fn cmd_reports(
    config_path: Option<&Path>,
    command: ReportsCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let workspace = load_workspace(config_path)?;

    match command {
        ReportsCommands::List { limit } => {
            let mut reports = workspace.list_reports().await?;
            reports.truncate(limit);
            print_stdout(&formatter.format_reports(&reports))?;
        }
        ReportsCommands::Show { name } => {
            let name = match name {
                Some(name) => name,
                None => match workspace.list_reports().await?.into_iter().next() {
                    Some(latest) => latest.name,
                    None => {
                        eprintln!("No archived reports.");
                        return Ok(EXIT_CLEAN);
                    }
                },
            };

            let content = workspace.load_report(&name).await?;
            let report: CycleReport = serde_json::from_str(&content).map_err(|e| {
                DriftError::internal(format!("Report {name} is not a valid cycle report: {e}"))
            })?;
            print_stdout(&formatter.format_report(&report))?;
        }
        ReportsCommands::Stats { days } => {
            let since = days_ago(days);
            let reports = load_archived(&workspace).await?;
            let stats = ReportStats::from_reports(&reports, since);
            print_stdout(&formatter.format_stats(&stats))?;
        }
        ReportsCommands::Export { file, days } => {
            let reports = load_archived(&workspace).await?;
            let export = ReportExport::new(reports, days.map(days_ago));
            let content = serde_json::to_string_pretty(&export)
                .map_err(|e| DriftError::internal(format!("Failed to serialize export: {e}")))?;
            std::fs::write(&file, content)?;
            eprintln!(
                "{}",
                formatter.message(
                    MessageKind::Success,
                    &format!("Exported {} reports to {}", export.total_reports, file.display())
                )
            );
        }
    }

    Ok(EXIT_CLEAN)
}

/// Start of a window covering the last `days` days.
fn days_ago(days: u32) -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() - chrono::Duration::days(i64::from(days))
}

/// Remove the workspace lock.
async fn cmd_unlock(
    config_path: Option<&Path>,
    lock_id: Option<&str>,
    force: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let workspace = load_workspace(config_path)?;

    let Some(lock) = workspace.get_lock_info().await? else {
        eprintln!("{}", formatter.message(MessageKind::Success, "Workspace is not locked."));
        return Ok(EXIT_CLEAN);
    };

    if let Some(id) = lock_id {
        if id != lock.lock_id {
            let mismatch = format!("Lock ID mismatch: {}", lock.lock_id);
            eprintln!("{}", formatter.message(MessageKind::Error, &mismatch));
            return Ok(EXIT_ERROR);
        }
    }

    if !lock.is_expired() && !force && lock_id.is_none() {
        eprintln!("{}", formatter.format_lock(&lock));
        eprintln!(
            "{}",
            formatter.message(MessageKind::Warning, "Lock is still live; use --lock-id or --force")
        );
        return Ok(EXIT_ERROR);
    }

    workspace.force_unlock().await?;
    eprintln!("{}", formatter.message(MessageKind::Success, "Workspace unlocked."));
    Ok(EXIT_CLEAN)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads the configuration with `.env` and environment overrides applied.
fn load_config(config_path: Option<&Path>) -> Result<(EngineConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    Ok((config, config_file))
}

/// Loads and validates the configuration, then builds the engine.
fn load_engine(config_path: Option<&Path>) -> Result<Engine> {
    let (config, config_file) = load_config(config_path)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{}", warning);
    }

    Engine::from_config(config, &config_dir(&config_file))
}

/// Opens the workspace named by the configuration.
fn load_workspace(config_path: Option<&Path>) -> Result<LocalWorkspace> {
    let (config, config_file) = load_config(config_path)?;
    let paths = EnginePaths::resolve(&config, &config_dir(&config_file));
    Ok(LocalWorkspace::new(paths.workspace))
}

/// Prints the report and optionally writes it as JSON to a file.
fn emit_report(
    report: &CycleReport,
    report_path: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<()> {
    print_stdout(&formatter.format_report(report))?;

    if let Some(path) = report_path {
        let json = report
            .to_json()
            .map_err(|e| DriftError::internal(format!("Failed to serialize report: {e}")))?;
        std::fs::write(path, json)?;
        info!("Report written to: {}", path.display());
    }

    Ok(())
}

/// Writes text to stdout.
fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    stdout.flush()?;
    Ok(())
}

/// Asks a yes/no question on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
