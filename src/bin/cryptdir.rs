//! # CryptDir CLI - Encrypted directory mirroring
//!
//! Command-line interface for the cryptdir library.
//!
//! ## Features
//! - Mirror a directory into an encrypted store and restore it
//! - Verify the integrity of a store
//! - Remove orphaned blobs and leftover temporary files
//! - Re-key the manifest with a new master password
//!
//! ## Usage
//! ```bash
//! # Mirror ./documents into ./documents/.cryptdir
//! cryptdir encrypt --source ./documents --password secret
//!
//! # Mirror into a synced folder, only markdown files
//! CRYPTDIR_PASSWORD=secret cryptdir encrypt -s ./notes -t ~/Dropbox/vault --filter '*.md'
//!
//! # Restore somewhere else
//! cryptdir decrypt -s ./restored -t ~/Dropbox/vault
//!
//! # Check the store
//! cryptdir verify -s ./notes -t ~/Dropbox/vault
//! ```
//!
//! ## Exit codes
//! `0` success, `1` failure, `2` usage error, `3` source directory not found,
//! `4` incorrect password, `5` finished with failed entries.

use anyhow::Context;
use chrono::Local;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use colored::*;
use cryptdir::{
    format_bytes, CryptDir, CryptDirBuilder, CryptDirError, ExitStatusKind, RestoreReport,
    SyncEvent, SyncObserver, SyncReport,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// CryptDir CLI - keep an encrypted mirror of a directory
#[derive(Parser)]
#[command(name = "cryptdir")]
#[command(version)]
#[command(about = "Mirror a directory into an encrypted store and restore it")]
#[command(long_about = None)]
struct Cli {
    /// Source directory (defaults to current)
    #[arg(short, long, global = true)]
    source: Option<PathBuf>,

    /// Store directory (defaults to <source>/.cryptdir)
    #[arg(short = 't', long, global = true)]
    store: Option<PathBuf>,

    /// Master password
    #[arg(short, long, global = true, env = "CRYPTDIR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show a spinner while working
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the source directory into the store
    #[command(alias = "enc")]
    Encrypt {
        /// Only mirror files matching this glob
        #[arg(short, long)]
        filter: Option<String>,

        /// Skip entries matching this glob (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Restore the source directory from the store
    #[command(alias = "dec")]
    Decrypt,

    /// Check every blob against the manifest
    Verify,

    /// Remove orphaned blobs and leftover temporary files
    Prune {
        /// Only show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store status
    Status,

    /// Re-encrypt the manifest under a new master password
    Passwd {
        /// New master password
        #[arg(long, env = "CRYPTDIR_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "cryptdir=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    let status = match run(cli) {
        Ok(status) => status,
        Err(e) => {
            let status = e
                .downcast_ref::<CryptDirError>()
                .map(CryptDirError::exit_status)
                .unwrap_or(ExitStatusKind::Failure);
            let message = e
                .downcast_ref::<CryptDirError>()
                .map(CryptDirError::user_message)
                .unwrap_or_else(|| format!("{:#}", e));
            eprintln!("{}: {}", "Error".red().bold(), message);
            status
        }
    };
    std::process::exit(status.code());
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<ExitStatusKind> {
    let source = cli.source.unwrap_or_else(|| PathBuf::from("."));
    let password = match cli.password {
        Some(password) => password,
        None => Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "a password is required (--password or CRYPTDIR_PASSWORD)",
            )
            .exit(),
    };
    let progress = cli.progress.then(spinner);
    let observer = Arc::new(ConsoleObserver::new(progress.clone()));

    let mut builder = CryptDirBuilder::new().observer(observer);
    if let Some(store) = cli.store {
        builder = builder.store_dir(store);
    }

    let status = match cli.command {
        Commands::Encrypt { filter, exclude } => {
            for pattern in exclude {
                builder = builder.exclude(pattern);
            }
            let cryptdir = builder.include_pattern(filter).build(source)?;
            cmd_encrypt(&cryptdir, &password, progress.as_ref())
        }
        Commands::Decrypt => cmd_decrypt(&builder.build(source)?, &password, progress.as_ref()),
        Commands::Verify => cmd_verify(&builder.build(source)?, &password, progress.as_ref()),
        Commands::Prune { dry_run } => cmd_prune(&builder.build(source)?, &password, dry_run),
        Commands::Status => cmd_status(&builder.build(source)?, &password),
        Commands::Passwd { new_password } => {
            cmd_passwd(&builder.build(source)?, &password, &new_password)
        }
    };

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    status
}

/// Mirror the source directory into the store
///
/// Only content not yet in the store is encrypted. Blobs no path references
/// anymore are deleted and the manifest is rewritten if anything changed.
fn cmd_encrypt(
    cryptdir: &CryptDir,
    password: &str,
    progress: Option<&ProgressBar>,
) -> anyhow::Result<ExitStatusKind> {
    if let Some(pb) = progress {
        pb.set_message("Encrypting...");
    }

    let report = cryptdir
        .encrypt(password)
        .with_context(|| format!("encrypting {}", cryptdir.source_dir().display()))?;
    print_sync_summary(cryptdir, &report);

    Ok(if report.has_failures() {
        ExitStatusKind::PartialFailure
    } else {
        ExitStatusKind::Success
    })
}

/// Restore the source directory from the store
///
/// Files whose content already matches are left alone.
fn cmd_decrypt(
    cryptdir: &CryptDir,
    password: &str,
    progress: Option<&ProgressBar>,
) -> anyhow::Result<ExitStatusKind> {
    if let Some(pb) = progress {
        pb.set_message("Decrypting...");
    }

    let report = cryptdir
        .decrypt(password)
        .with_context(|| format!("decrypting into {}", cryptdir.source_dir().display()))?;
    print_restore_summary(&report);

    Ok(if report.has_failures() {
        ExitStatusKind::PartialFailure
    } else {
        ExitStatusKind::Success
    })
}

/// Verify every blob referenced by the manifest
fn cmd_verify(
    cryptdir: &CryptDir,
    password: &str,
    progress: Option<&ProgressBar>,
) -> anyhow::Result<ExitStatusKind> {
    if let Some(pb) = progress {
        pb.set_message("Verifying...");
    }

    let report = cryptdir.verify(password)?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!("{}", "Store Verification".bold());
    println!("  Objects checked: {}", report.total_objects_checked.to_string().cyan());
    println!("  Objects valid: {}", report.objects_valid.to_string().green());

    for check in report.object_checks.iter().filter(|c| !c.is_valid()) {
        println!(
            "  {} {} ({})",
            "✗".red(),
            check.paths.join(", ").red(),
            check.error.as_deref().unwrap_or("invalid")
        );
    }
    for path in &report.dangling_references {
        println!("  {} {} (no file object)", "✗".red(), path.red());
    }
    for id in &report.orphaned_objects {
        println!("  {} {} (orphaned)", "?".yellow(), id.yellow());
    }

    if report.is_valid() {
        println!("\n{} {}", "✓".green().bold(), report.summary());
        Ok(ExitStatusKind::Success)
    } else {
        println!("\n{} {}", "✗".red().bold(), report.summary());
        Ok(ExitStatusKind::PartialFailure)
    }
}

/// Remove orphaned blobs
fn cmd_prune(cryptdir: &CryptDir, password: &str, dry_run: bool) -> anyhow::Result<ExitStatusKind> {
    let start = Instant::now();
    let stats = cryptdir.prune(password, dry_run)?;

    if dry_run {
        println!("{}", "Prune (dry run)".bold());
        println!("  Orphaned objects: {}", stats.orphaned_objects.len().to_string().yellow());
        println!("  Temporary files: {}", stats.temp_files.len().to_string().yellow());
        println!("  Space to reclaim: {}", format_bytes(stats.bytes_reclaimed).green());
        for id in &stats.orphaned_objects {
            println!("    - {}", id);
        }
        for temp in &stats.temp_files {
            println!("    - {}", temp.display());
        }
    } else {
        println!("{} Prune complete", "✓".green().bold());
        println!("  Files deleted: {}", stats.files_deleted.to_string().green());
        println!("  Space reclaimed: {}", format_bytes(stats.bytes_reclaimed).green());
    }
    println!("\n{}", format!("Total time: {}", format_duration(round(start.elapsed()))).dimmed());
    Ok(ExitStatusKind::Success)
}

/// Show store status
fn cmd_status(cryptdir: &CryptDir, password: &str) -> anyhow::Result<ExitStatusKind> {
    let status = cryptdir.status(password)?;

    println!("{}", "CryptDir Status".bold());
    println!("  Source: {}", cryptdir.source_dir().display().to_string().cyan());
    println!("  Store: {}", cryptdir.store_dir().display().to_string().cyan());
    match status.last_written {
        Some(at) => println!(
            "  Last written: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string().cyan()
        ),
        None => println!("  Last written: {}", "never".dimmed()),
    }
    println!("\n{}", "Manifest".bold());
    println!("  Directories: {}", status.directories.to_string().cyan());
    println!("  Files: {}", status.files.to_string().cyan());
    println!("  Unique objects: {}", status.unique_objects.to_string().cyan());
    println!("  Shared references: {}", status.shared_references.to_string().cyan());
    if status.dangling_references > 0 {
        println!("  Dangling references: {}", status.dangling_references.to_string().red());
    }
    println!("\n{}", "Store".bold());
    println!("  Blobs: {}", status.blobs_on_disk.to_string().cyan());
    println!("  Size: {}", format_bytes(status.bytes_on_disk).cyan());
    if status.orphaned_blobs > 0 {
        println!(
            "  Orphaned blobs: {} (run {})",
            status.orphaned_blobs.to_string().yellow(),
            "cryptdir prune".yellow()
        );
    }
    Ok(ExitStatusKind::Success)
}

/// Re-encrypt the manifest under a new password
fn cmd_passwd(cryptdir: &CryptDir, old: &str, new: &str) -> anyhow::Result<ExitStatusKind> {
    if cryptdir.change_passphrase(old, new)? {
        println!("{} Master password changed", "✓".green().bold());
    } else {
        println!("{} Nothing to re-encrypt: the store has no manifest", "!".yellow().bold());
    }
    Ok(ExitStatusKind::Success)
}

fn print_sync_summary(cryptdir: &CryptDir, report: &SyncReport) {
    if report.store_dropped {
        println!("{} Source is empty, store removed", "✓".green().bold());
    } else if report.has_changes() {
        println!("{} Store updated", "✓".green().bold());
    } else {
        println!("{} Store already up to date", "✓".green().bold());
    }
    println!("  Store: {}", cryptdir.store_dir().display().to_string().cyan());
    println!(
        "  Added: {}  Updated: {}  Removed: {}  Unchanged: {}",
        report.added.to_string().green(),
        report.updated.to_string().yellow(),
        report.removed.to_string().red(),
        report.unchanged
    );
    println!(
        "  Objects written: {} ({})",
        report.objects_written.to_string().cyan(),
        format_bytes(report.bytes_encrypted)
    );
    if report.has_failures() {
        println!("  Failed: {}", report.failures.len().to_string().red().bold());
    }
    println!(
        "  Time: {}",
        format_duration(round(Duration::from_millis(report.duration_ms))).to_string().cyan()
    );
}

fn print_restore_summary(report: &RestoreReport) {
    println!("{} Restore complete", "✓".green().bold());
    println!("  Directories created: {}", report.dirs_created.to_string().cyan());
    println!(
        "  Files decrypted: {} ({})",
        report.files_decrypted.to_string().green(),
        format_bytes(report.bytes_written)
    );
    println!("  Files up to date: {}", report.files_skipped);
    if report.dangling_references > 0 {
        println!("  Dangling references: {}", report.dangling_references.to_string().yellow());
    }
    if report.has_failures() {
        println!("  Failed: {}", report.failures.len().to_string().red().bold());
    }
    println!(
        "  Time: {}",
        format_duration(round(Duration::from_millis(report.duration_ms))).to_string().cyan()
    );
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Drop sub-millisecond noise from displayed durations
fn round(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Prints sync events with a local timestamp
struct ConsoleObserver {
    progress: Option<ProgressBar>,
}

impl ConsoleObserver {
    fn new(progress: Option<ProgressBar>) -> Self {
        Self { progress }
    }

    fn render(event: &SyncEvent) -> String {
        let label = match event {
            SyncEvent::Added(_) => event.label().green(),
            SyncEvent::Updated(_) => event.label().yellow(),
            SyncEvent::Removed(_) => event.label().red(),
            SyncEvent::Created(_) | SyncEvent::Decrypted(_) => event.label().cyan(),
            SyncEvent::StoreDropped => event.label().red().bold(),
            SyncEvent::Failed { .. } => event.label().red().bold(),
        };
        let detail = match event {
            SyncEvent::Failed { path, reason } => format!("{}: {}", path, reason),
            SyncEvent::StoreDropped => "encrypted store".to_string(),
            _ => event.path().unwrap_or_default().to_string(),
        };
        format!(
            "{} {} {}",
            Local::now().format("%H:%M:%S").to_string().dimmed(),
            label,
            detail
        )
    }
}

impl SyncObserver for ConsoleObserver {
    fn on_event(&self, event: &SyncEvent) {
        let line = Self::render(event);
        match (&self.progress, event.is_failure()) {
            (Some(pb), _) => pb.println(line),
            (None, true) => eprintln!("{}", line),
            (None, false) => println!("{}", line),
        }
    }
}
