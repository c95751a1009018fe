use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use rpi_deploy_sync::sync::{PruneStatPolicy, SshConnection, SyncEngine, SyncReport};
use rpi_deploy_sync::config::ensure_config_not_mirrored;
use rpi_deploy_sync::{DeployConfig, ExclusionSet};

/// Mirror a local project tree onto a remote host over SFTP.
#[derive(Parser, Debug)]
#[command(name = "rpi-sync", version, about)]
struct Cli {
    /// Config file (default: platform config dir / rpi-deploy-sync / deploy.toml)
    #[arg(long, global = true, env = "RPI_SYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prune stale remote entries, then upload new and changed files
    Push(PushArgs),
    /// Print the resolved configuration with secrets masked
    ShowConfig,
}

#[derive(Args, Debug)]
struct PushArgs {
    /// Override the local root from the config file
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// Override the remote root from the config file
    #[arg(long)]
    remote_root: Option<String>,

    /// Extra exclusion pattern (repeatable, non-empty)
    #[arg(long = "exclude", value_name = "PATTERN", value_parser = NonEmptyStringValueParser::new())]
    excludes: Vec<String>,

    /// Use only --exclude patterns, ignoring the config list
    #[arg(long)]
    no_default_excludes: bool,

    /// Abort when a remote entry cannot be stat'ed while pruning
    #[arg(long)]
    strict: bool,

    /// Show what would change without touching the remote tree
    #[arg(long)]
    dry_run: bool,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => DeployConfig::default_path()?,
    };
    let config = DeployConfig::load(&config_path)?;

    match cli.command {
        Command::ShowConfig => {
            println!("# {}", config_path.display());
            print!("{}", config.redacted().to_toml()?);
            Ok(())
        }
        Command::Push(args) => push(&config, &config_path, args),
    }
}

fn push(config: &DeployConfig, config_path: &Path, args: PushArgs) -> Result<()> {
    let mut options = config.sync_options().with_dry_run(args.dry_run);
    if let Some(local_root) = args.local_root {
        options.local_root = local_root;
    }
    if let Some(remote_root) = args.remote_root {
        options.remote_root = remote_root;
    }
    if args.no_default_excludes {
        options.exclusions = args.excludes.into_iter().collect::<ExclusionSet>();
    } else {
        options.exclusions.extend(args.excludes);
    }
    if args.strict {
        options.prune_stat_policy = PruneStatPolicy::Strict;
    }
    ensure_config_not_mirrored(config_path, &options)?;

    let engine = SyncEngine::new(options);
    let connection = SshConnection::connect(&config.host)
        .with_context(|| format!("connecting to {}", config.host.hostname))?;
    if !args.json {
        println!(
            "Syncing {} to {}:{}",
            engine.options().local_root.display(),
            connection.target(),
            engine.options().remote_root
        );
    }

    let report = engine
        .sync_over_ssh(&connection)
        .context("synchronization aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &SyncReport) {
    let heading = if report.dry_run {
        "Dry run complete".yellow().bold()
    } else {
        "Sync complete".green().bold()
    };
    println!("{heading} in {} ms", report.duration_ms);
    if report.is_noop() {
        println!("  Already up to date ({} files unchanged)", report.unchanged_files);
    } else {
        print_counts(report);
    }
    if report.excluded_entries > 0 {
        println!("  {} entries excluded", report.excluded_entries);
    }
    for path in &report.stat_failures {
        println!("  {} could not stat {path}, left in place", "warning:".yellow());
    }
    for path in &report.skipped_entries {
        println!("  {} skipped {path}, name is not valid UTF-8", "warning:".yellow());
    }
}

fn print_counts(report: &SyncReport) {
    println!(
        "  {} new, {} updated, {} unchanged ({} bytes)",
        report.new_files, report.updated_files, report.unchanged_files, report.bytes_transferred
    );
    println!(
        "  {} directories created, {} files and {} directories removed",
        report.dirs_created, report.files_removed, report.dirs_removed
    );
}
