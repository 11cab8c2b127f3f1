//! # Patchvault CLI - Roll back game patches
//!
//! Command-line front end for the patchvault backup engine.
//!
//! ## Features
//! - Back up every `.npk` pack under the game's `imagepack2` directory
//! - Restore a backup after verifying each stored file
//! - Inspect and verify backups
//! - Change retention and auto-backup settings
//! - Run the auto-backup timer in the foreground
//!
//! ## Usage
//! ```bash
//! # Back up before installing a patch
//! patchvault --root "C:/Games/DNF" create -m "Before HUD patch"
//!
//! # List backups
//! patchvault --root "C:/Games/DNF" list
//!
//! # Roll back (ID prefixes are accepted)
//! patchvault --root "C:/Games/DNF" restore backup_20240101_1200
//!
//! # Auto backup every 2 hours, keep 5
//! patchvault settings --auto true --interval 2h --max 5
//! patchvault --root "C:/Games/DNF" daemon
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use patchvault::utils::format_bytes;
use patchvault::{
    Backup, BackupKind, BackupManager, BackupScheduler, BackupSettings, FileStatus, VaultError,
    SETTINGS_POLL_INTERVAL,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Patchvault CLI - Verified backups for game patch directories
#[derive(Parser)]
#[command(name = "patchvault")]
#[command(version)]
#[command(about = "Back up game resource packs before patching and roll back safely")]
#[command(long_about = None)]
struct Cli {
    /// Game root directory (defaults to current)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Directory holding the catalog and backup store (defaults to current)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backup
    #[command(alias = "bk")]
    Create {
        /// Description message
        #[arg(short, long)]
        message: Option<String>,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Restore a backup over the live files
    #[command(alias = "rs")]
    Restore {
        /// Backup ID or unique prefix
        backup: String,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// List backups
    #[command(alias = "ls")]
    List {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,

        /// Limit results to the newest N
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show backup info
    Info {
        /// Backup ID or unique prefix
        backup: String,
    },

    /// Verify stored files against their recorded hashes
    Verify {
        /// Backup to verify (defaults to the newest)
        backup: Option<String>,

        /// Verify all backups
        #[arg(long)]
        all: bool,
    },

    /// Show or change backup settings
    Settings {
        /// Enable or disable automatic backups
        #[arg(long)]
        auto: Option<bool>,

        /// Auto-backup interval, e.g. "30m", "2h", "1day"
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        /// Number of backups to keep
        #[arg(long)]
        max: Option<usize>,

        /// Record the compression preference
        #[arg(long)]
        compression: Option<bool>,

        /// Backup store location, relative to the data directory
        #[arg(long)]
        path: Option<String>,
    },

    /// Run automatic backups until interrupted
    Daemon,
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, matches!(cli.command, Commands::Daemon));

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        match e.downcast_ref::<VaultError>() {
            Some(vault_error) => eprintln!("{}: {}", "Error".red().bold(), vault_error.user_message()),
            None => eprintln!("{}: {:#}", "Error".red().bold(), e),
        }
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise warnings only, or more with `--verbose` and for the daemon
fn init_logging(verbose: bool, daemon: bool) {
    let default_level = match (verbose, daemon) {
        (true, _) => "patchvault=debug",
        (false, true) => "patchvault=info",
        (false, false) => "patchvault=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root_path = cli.root.unwrap_or_else(|| PathBuf::from("."));
    let data_dir = cli.data_dir.unwrap_or_else(|| PathBuf::from("."));
    let manager = BackupManager::open(root_path, data_dir)?;

    match cli.command {
        Commands::Create { message, progress } => cmd_create(&manager, message, progress),
        Commands::Restore { backup, progress } => cmd_restore(&manager, &backup, progress),
        Commands::List { detailed, limit } => cmd_list(&manager, detailed, limit),
        Commands::Info { backup } => cmd_info(&manager, &backup),
        Commands::Verify { backup, all } => cmd_verify(&manager, backup, all),
        Commands::Settings {
            auto,
            interval,
            max,
            compression,
            path,
        } => cmd_settings(&manager, auto, interval, max, compression, path),
        Commands::Daemon => cmd_daemon(manager),
    }
}

/// Create a manual backup
///
/// Every tracked file is copied into a new directory in the store and
/// fingerprinted. Older backups beyond the retention limit are deleted.
fn cmd_create(manager: &BackupManager, message: Option<String>, show_progress: bool) -> anyhow::Result<()> {
    println!("{}", "Creating backup...".blue().bold());

    let start = Instant::now();
    let progress = show_progress.then(|| spinner("Copying game files..."));

    let result = manager.create(message.as_deref().unwrap_or(""), BackupKind::Manual);

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let backup = result?;

    println!("{} Created backup {}", "✓".green().bold(), backup.id.yellow().bold());
    println!("  Message: {}", backup.description.cyan());
    println!("  Files: {}", backup.file_count().to_string().cyan());
    println!("  Size: {}", format_bytes(backup.total_size()).cyan());
    println!("  Time: {}", format_duration(round_to_millis(start.elapsed())).to_string().cyan());

    let kept = manager.list_backups().len();
    println!(
        "  Kept: {} of {}",
        kept.to_string().cyan(),
        manager.settings().max_backups
    );

    Ok(())
}

/// Restore a backup
///
/// All stored files are verified first. If any file is corrupted nothing is
/// written and the command fails naming that file.
fn cmd_restore(manager: &BackupManager, id: &str, show_progress: bool) -> anyhow::Result<()> {
    let backup = manager.get_backup(id)?;

    println!("{} {}", "Restoring backup".blue().bold(), backup.id.yellow());

    let progress = show_progress.then(|| spinner("Verifying and restoring files..."));
    let result = manager.restore(&backup);
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let result = result?;

    println!("{} Restored backup {}", "✓".green().bold(), result.backup_id.yellow().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    println!("  Bytes written: {}", format_bytes(result.bytes_written).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );

    Ok(())
}

/// List backups, oldest first
fn cmd_list(manager: &BackupManager, detailed: bool, limit: Option<usize>) -> anyhow::Result<()> {
    let backups = manager.list_backups();

    if backups.is_empty() {
        println!("{}", "No backups found.".yellow());
        return Ok(());
    }

    println!("{}", "Backups:".blue().bold());
    println!();

    let display_count = limit.unwrap_or(backups.len()).min(backups.len());
    let skipped = backups.len() - display_count;

    for backup in backups.iter().skip(skipped) {
        let marker = match backup.kind {
            BackupKind::Auto => "A".dimmed(),
            BackupKind::Manual => "M".green().bold(),
        };

        print!("{} {} ", marker, backup.id.yellow().bold());
        print!(
            "{} ",
            backup
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
        println!("{}", backup.description.cyan());

        if detailed {
            println!(
                "    Files: {} | Size: {} | Game version: {}",
                backup.file_count().to_string().dimmed(),
                format_bytes(backup.total_size()).dimmed(),
                backup.game_version.dimmed()
            );
            println!();
        }
    }

    if skipped > 0 {
        println!(
            "\n{}",
            format!("Showing newest {} of {} backups", display_count, backups.len()).dimmed()
        );
    }

    Ok(())
}

/// Show details and a quick verification of one backup
fn cmd_info(manager: &BackupManager, id: &str) -> anyhow::Result<()> {
    let backup = manager.get_backup(id)?;

    println!("{} {}", "Backup".blue().bold(), backup.id.yellow().bold());
    println!();

    println!("{}", "Basic Information:".bold());
    println!("  Created: {}", backup.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Type: {}", backup.kind);
    println!("  Message: {}", backup.description.cyan());
    println!("  Game version: {}", backup.game_version);
    println!("  Location: {}", manager.backup_dir(&backup).display().to_string().dimmed());

    println!("\n{}", "Statistics:".bold());
    println!("  Files: {}", backup.file_count().to_string().cyan());
    println!("  Total size: {}", format_bytes(backup.total_size()).cyan());

    println!("\n{}", "Verification:".bold());
    let report = manager.verify_backup(&backup)?;
    if report.is_valid() {
        println!("  Integrity: {}", "✓ Valid".green());
    } else {
        println!(
            "  Integrity: {} ({} files)",
            "✗ Invalid".red(),
            report.failures().count()
        );
    }

    Ok(())
}

/// Verify one or all backups
///
/// Fails when any checked backup has a corrupted or missing file.
fn cmd_verify(manager: &BackupManager, id: Option<String>, verify_all: bool) -> anyhow::Result<()> {
    let targets: Vec<Backup> = if verify_all {
        manager.list_backups()
    } else {
        match id {
            Some(id) => vec![manager.get_backup(&id)?],
            None => newest(&manager.list_backups()).into_iter().collect(),
        }
    };

    if targets.is_empty() {
        println!("{}", "No backups to verify.".yellow());
        return Ok(());
    }

    let mut invalid = 0usize;
    for backup in &targets {
        println!("{} {}", "Verifying backup".blue().bold(), backup.id.yellow());
        let report = manager.verify_backup(backup)?;

        if report.is_valid() {
            println!("  {} {}", "✓".green().bold(), report.summary());
            continue;
        }

        invalid += 1;
        println!("  {} {}", "✗".red().bold(), report.summary());
        for check in report.failures() {
            match &check.status {
                FileStatus::Corrupted { .. } => println!("    {} {}", "corrupted".red(), check.path),
                FileStatus::Unreadable { reason } => {
                    println!("    {} {} ({})", "unreadable".red(), check.path, reason.dimmed())
                }
                FileStatus::Valid => {}
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} backups failed verification", invalid, targets.len());
    }
    Ok(())
}

/// Show settings, or apply the given changes
fn cmd_settings(
    manager: &BackupManager,
    auto: Option<bool>,
    interval: Option<Duration>,
    max: Option<usize>,
    compression: Option<bool>,
    path: Option<String>,
) -> anyhow::Result<()> {
    let mut settings = manager.settings();
    let changing = auto.is_some() || interval.is_some() || max.is_some() || compression.is_some() || path.is_some();

    if changing {
        if let Some(auto) = auto {
            settings.auto_backup = auto;
        }
        if let Some(interval) = interval {
            settings.backup_interval = interval.as_secs();
        }
        if let Some(max) = max {
            settings.max_backups = max;
        }
        if let Some(compression) = compression {
            settings.compression_enabled = compression;
        }
        if let Some(path) = path {
            settings.backup_path = path;
        }

        manager
            .update_settings(settings.clone())
            .context("failed to update settings")?;
        println!("{} Settings saved", "✓".green().bold());
    }

    print_settings(&settings);
    Ok(())
}

/// Run the auto-backup timer in the foreground until Ctrl+C
fn cmd_daemon(manager: BackupManager) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let settings = manager.settings();
    runtime.block_on(async move {
        if settings.auto_backup {
            println!(
                "{} Auto backup every {}",
                "▶".green().bold(),
                format_duration(settings.interval()).to_string().cyan()
            );
        } else {
            println!(
                "{} Auto backup is disabled; waiting for it to be enabled",
                "⚠".yellow().bold()
            );
        }
        println!(
            "  Settings changed by other patchvault commands apply within {}",
            format_duration(SETTINGS_POLL_INTERVAL)
        );

        let scheduler = BackupScheduler::start(manager);
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;

        println!("{}", "Stopping...".blue().bold());
        scheduler.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}

// Helper functions

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn newest(backups: &[Backup]) -> Option<Backup> {
    backups.iter().max_by_key(|b| b.timestamp).cloned()
}

fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

fn print_settings(settings: &BackupSettings) {
    let preset = BackupSettings::INTERVAL_PRESETS
        .iter()
        .find(|(_, secs)| *secs == settings.backup_interval)
        .map(|(label, _)| *label);

    println!("{}", "Settings:".bold());
    println!(
        "  Auto backup: {}",
        if settings.auto_backup { "on".green() } else { "off".red() }
    );
    match preset {
        Some(label) => println!("  Interval: {}", label.cyan()),
        None => println!(
            "  Interval: {}",
            format_duration(settings.interval()).to_string().cyan()
        ),
    }
    println!("  Keep: {} backups", settings.max_backups.to_string().cyan());
    println!("  Store: {}", settings.backup_path.cyan());
    println!(
        "  Compression: {}",
        if settings.compression_enabled { "on" } else { "off" }
    );
}
