//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use storage_guard::core::config::Config;
use storage_guard::core::errors::GuardError;
use storage_guard::daemon::maintenance::{MaintenanceLoop, WatchArgs as LoopArgs};
use storage_guard::daemon::signals::SignalHandler;
use storage_guard::guard::severity::{PressureLevel, StorageInfo};
use storage_guard::guard::tiers::{ReclaimPlan, ReclaimReport};
use storage_guard::guard::{SecureWrite, StorageGuard};
use storage_guard::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use storage_guard::store::sqlite::{SqliteSecureStore, SqliteStore};

/// Storage guard: keeps a key-value store from filling up.
#[derive(Debug, Parser)]
#[command(
    name = "stg",
    author,
    version,
    about = "Storage guard - capacity checks and tiered reclamation for key-value stores",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the store database path.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Probe, measure and reclaim as needed; exit 2 if writes should wait.
    Check,
    /// Run a reclamation tier and print the step report.
    Reclaim(ReclaimArgs),
    /// Show current usage and the largest entries.
    Report(ReportArgs),
    /// Record a logging-only health sample.
    Monitor,
    /// Read and write the secure store through the size guard.
    Secure(SecureArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Run capacity checks on an interval until interrupted.
    Watch(WatchArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ReclaimArgs {
    /// Run the emergency tier instead of the routine one.
    #[arg(long)]
    emergency: bool,
}

#[derive(Debug, Clone, Args)]
struct ReportArgs {
    /// Number of large entries to list.
    #[arg(long, default_value_t = 10, value_name = "N")]
    top: usize,
}

#[derive(Debug, Clone, Args)]
struct SecureArgs {
    #[command(subcommand)]
    command: SecureCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum SecureCommand {
    /// Store a value, compacting or splitting it to fit the item ceiling.
    Put(SecurePutArgs),
    /// Print a value, reassembling a split entry if needed.
    Get(SecureGetArgs),
}

#[derive(Debug, Clone, Args)]
struct SecurePutArgs {
    key: String,
    /// Value to store; read from stdin when omitted.
    value: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct SecureGetArgs {
    key: String,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file location.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct WatchArgs {
    /// Seconds between capacity checks.
    #[arg(long, default_value_t = 60, value_name = "SECONDS")]
    interval_secs: u64,
    /// Stop after this many passes.
    #[arg(long, value_name = "N")]
    max_passes: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure, or the store refused the write.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<GuardError> for CliError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::InvalidConfig { .. }
            | GuardError::MissingConfig { .. }
            | GuardError::ConfigParse { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Check => run_check(cli),
        Command::Reclaim(args) => run_reclaim(cli, args),
        Command::Report(args) => run_report(cli, args),
        Command::Monitor => run_monitor(cli),
        Command::Secure(args) => run_secure(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Watch(args) => run_watch(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── session ────────────────────

type SqliteGuard = StorageGuard<SqliteStore, SqliteSecureStore>;

struct LoggerThread {
    handle: ActivityLoggerHandle,
    join: JoinHandle<()>,
}

impl LoggerThread {
    fn finish(self) -> Result<(), CliError> {
        self.handle.shutdown();
        self.join
            .join()
            .map_err(|_| CliError::Internal("logger thread panicked".to_string()))
    }
}

/// A guard over the configured SQLite store plus its logger thread.
struct Session {
    guard: SqliteGuard,
    logger: Option<LoggerThread>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(db) = &cli.db {
            config.paths.store_db.clone_from(db);
        }

        let primary = SqliteStore::open(&config.paths.store_db)?;
        let secure = SqliteSecureStore::open(&config.paths.store_db)?;

        let logger = if config.logging.enabled {
            match spawn_logger(DualLoggerConfig::from_config(&config)) {
                Ok((handle, join)) => Some(LoggerThread { handle, join }),
                Err(e) => {
                    eprintln!("[STG-CLI] activity logging disabled: {e}");
                    None
                }
            }
        } else {
            None
        };

        let mut guard = StorageGuard::new(config, primary)?.with_secure_store(secure);
        if let Some(logger) = &logger {
            guard = guard.with_logger(logger.handle.clone());
        }
        Ok(Self { guard, logger })
    }

    fn finish(self) -> Result<(), CliError> {
        drop(self.guard);
        self.logger.map_or(Ok(()), LoggerThread::finish)
    }
}

// ──────────────────── commands ────────────────────

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let check = session.guard.check_capacity();
    session.finish()?;

    match output_mode(cli) {
        OutputMode::Human => {
            let verdict = if check.ok {
                "ok".green().bold()
            } else {
                "refused".red().bold()
            };
            println!(
                "Capacity check: {verdict} [{}] ({})",
                colored_level(check.level),
                check.trigger.describe()
            );
            if let Some(info) = &check.info {
                print_usage(info);
            }
            if let Some(report) = &check.report {
                print_reclaim_report(report);
            }
            if let Some(err) = &check.error {
                eprintln!("  check error: {err}");
            }
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&check)?;
            payload["command"] = json!("check");
            write_json_line(&payload)?;
        }
    }

    if check.ok {
        Ok(())
    } else {
        Err(CliError::Runtime(
            "store is out of space; postpone the write".to_string(),
        ))
    }
}

fn run_reclaim(cli: &Cli, args: &ReclaimArgs) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let plan = if args.emergency {
        ReclaimPlan::emergency(session.guard.config())
    } else {
        ReclaimPlan::routine(session.guard.config())
    };
    let report = session.guard.run_plan(&plan);
    session.finish()?;

    match output_mode(cli) {
        OutputMode::Human => print_reclaim_report(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "reclaim",
                "succeeded": report.succeeded(),
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    if report.succeeded() {
        Ok(())
    } else {
        Err(CliError::Runtime(format!(
            "every {} step failed",
            report.tier
        )))
    }
}

fn run_report(cli: &Cli, args: &ReportArgs) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let classified = session.guard.report().map(|info| {
        let level = session.guard.classify(&info);
        (info, level)
    });
    session.finish()?;
    let (mut info, level) = classified?;
    info.large_items.truncate(args.top);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Storage [{}]", colored_level(level));
            print_usage(&info);
            print_large_items(&info);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "report",
                "level": level,
                "usage_pct": info.usage_pct(),
                "info": serde_json::to_value(&info)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_monitor(cli: &Cli) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let sample = session.guard.monitor();
    let level = sample.as_ref().map(|i| session.guard.classify(i));
    let warning_ratio = session.guard.config().capacity.monitor_warning_ratio;
    session.finish()?;

    let (Some(info), Some(level)) = (sample, level) else {
        return Err(CliError::Runtime(
            "monitor sample failed; see the activity log".to_string(),
        ));
    };

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Monitor sample [{}]", colored_level(level));
            print_usage(&info);
            if info.usage_ratio() > warning_ratio {
                println!("  {}", "usage is high, consider `stg reclaim`".yellow());
            }
            print_large_items(&info);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "monitor",
                "level": level,
                "usage_pct": info.usage_pct(),
                "high_usage": info.usage_ratio() > warning_ratio,
                "info": serde_json::to_value(&info)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_secure(cli: &Cli, args: &SecureArgs) -> Result<(), CliError> {
    match &args.command {
        SecureCommand::Put(put) => {
            let value = match &put.value {
                Some(v) => v.clone(),
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let session = Session::open(cli)?;
            let written = session.guard.store_with_size_guard(&put.key, &value);
            session.finish()?;
            let written = written?;

            match output_mode(cli) {
                OutputMode::Human => match written {
                    SecureWrite::Direct => println!("Stored {} ({} bytes).", put.key, value.len()),
                    SecureWrite::Compacted {
                        original_len,
                        stored_len,
                    } => println!(
                        "Stored {} compacted ({original_len} -> {stored_len} bytes).",
                        put.key
                    ),
                    SecureWrite::Split { chunks } => println!(
                        "Stored {} as {chunks} chunks ({} bytes).",
                        put.key,
                        value.len()
                    ),
                },
                OutputMode::Json => {
                    let payload = json!({
                        "command": "secure put",
                        "key": put.key,
                        "bytes": value.len(),
                        "write": serde_json::to_value(written)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        SecureCommand::Get(get) => {
            let session = Session::open(cli)?;
            let value = session.guard.read_secure(&get.key);
            session.finish()?;
            let Some(value) = value? else {
                return Err(CliError::User(format!("no secure entry named {}", get.key)));
            };

            match output_mode(cli) {
                OutputMode::Human => println!("{value}"),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "secure get",
                        "key": get.key,
                        "value": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn run_watch(cli: &Cli, args: &WatchArgs) -> Result<(), CliError> {
    if args.interval_secs == 0 {
        return Err(CliError::User("--interval-secs must be at least 1".to_string()));
    }
    let Session { guard, logger } = Session::open(cli)?;
    let loop_args = LoopArgs {
        interval: Duration::from_secs(args.interval_secs),
        max_passes: args.max_passes,
        config_path: cli.config.clone(),
    };

    let mut watch = MaintenanceLoop::new(guard, loop_args, SignalHandler::new());
    if let Some(logger) = &logger {
        watch = watch.with_logger(logger.handle.clone());
    }
    let summary = watch.run();
    drop(watch);
    if let Some(logger) = logger {
        logger.finish()?;
    }
    let summary = summary?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Watch stopped ({}): {} passes, {} routine, {} emergency, {} refused, {} reloads",
                summary.stop_reason,
                summary.passes,
                summary.routine_runs,
                summary.emergency_runs,
                summary.refused,
                summary.reloads
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "watch",
                "stop_reason": summary.stop_reason,
                "passes": summary.passes,
                "routine_runs": summary.routine_runs,
                "emergency_runs": summary.emergency_runs,
                "refused": summary.refused,
                "reloads": summary.reloads,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── human output ────────────────────

fn colored_level(level: PressureLevel) -> colored::ColoredString {
    match level {
        PressureLevel::Healthy => level.label().green(),
        PressureLevel::Warning => level.label().yellow(),
        PressureLevel::Critical => level.label().red().bold(),
    }
}

fn print_usage(info: &StorageInfo) {
    println!(
        "  Used: {} of {} ({} available)",
        format_bytes(info.used_size),
        format_bytes(info.total_size),
        format_bytes(info.available_size)
    );
    print_pressure_bar("usage", info.usage_pct());
    println!(
        "  Entries: {} ({} unreadable)",
        info.entry_count,
        info.unreadable_keys.len()
    );
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn print_pressure_bar(label: &str, pct: f64) {
    let bar_width = 30;
    let filled = ((pct / 100.0) * bar_width as f64).round().max(0.0) as usize;
    let bar: String = "#".repeat(filled.min(bar_width));
    println!(
        "  {:<9} {:>5.1}% |{:<width$}|",
        label,
        pct,
        bar,
        width = bar_width
    );
}

fn print_large_items(info: &StorageInfo) {
    if info.large_items.is_empty() {
        println!("  No large entries.");
        return;
    }
    println!("  Largest entries:");
    for item in &info.large_items {
        println!(
            "    {:<48} {:>10}",
            truncate_key(&item.key, 48),
            format_bytes(item.size)
        );
    }
}

fn print_reclaim_report(report: &ReclaimReport) {
    println!(
        "{} reclamation: {} removed, {} compacted, {} freed in {} ms",
        report.tier.as_str().bold(),
        report.removed(),
        report.compacted(),
        format_bytes(report.bytes_freed()),
        report.duration_ms
    );
    for outcome in &report.outcomes {
        let status = if outcome.failed() {
            "FAIL".red()
        } else {
            "ok".green()
        };
        let mut line = format!(
            "  {status:<4} {:<26} removed={} compacted={} split={} protected={}",
            outcome.step.name(),
            outcome.removed,
            outcome.compacted,
            outcome.split,
            outcome.protected
        );
        if let Some(err) = &outcome.error {
            line.push_str(&format!(" error={err}"));
        }
        println!("{line}");
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn truncate_key(key: &str, max_len: usize) -> String {
    if key.chars().count() <= max_len {
        return key.to_string();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(max_len.saturating_sub(3))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

// ──────────────────── JSON output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("STG_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "stg",
            "--config",
            "/tmp/stg.toml",
            "--db",
            "/tmp/store.sqlite3",
            "--json",
            "--no-color",
            "report",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["stg", "report", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["stg", "check"],
            vec!["stg", "reclaim"],
            vec!["stg", "reclaim", "--emergency"],
            vec!["stg", "report", "--top", "3"],
            vec!["stg", "monitor"],
            vec!["stg", "secure", "put", "user_data", "{}"],
            vec!["stg", "secure", "put", "user_data"],
            vec!["stg", "secure", "get", "user_data"],
            vec!["stg", "config"],
            vec!["stg", "config", "path"],
            vec!["stg", "config", "show"],
            vec!["stg", "config", "validate"],
            vec!["stg", "watch", "--interval-secs", "5", "--max-passes", "2"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn secure_get_requires_key() {
        assert!(Cli::try_parse_from(["stg", "secure", "get"]).is_err());
        assert!(Cli::try_parse_from(["stg", "secure"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["stg", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);

        let config_err: CliError = GuardError::InvalidConfig {
            details: "bad".to_string(),
        }
        .into();
        assert_eq!(config_err.exit_code(), 1);
        let runtime_err: CliError = GuardError::Runtime {
            details: "boom".to_string(),
        }
        .into();
        assert_eq!(runtime_err.exit_code(), 2);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(6 * 1024 * 1024), "6.0 MB");
    }

    #[test]
    fn truncate_key_keeps_tail() {
        assert_eq!(truncate_key("short", 10), "short");
        assert_eq!(truncate_key("persist:very_long_slice_name", 10), "...ce_name");
    }
}
