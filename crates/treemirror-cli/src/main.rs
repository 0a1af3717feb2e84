//! TreeMirror - periodic one-way directory mirroring
//!
//! Keeps a replica directory an exact copy of a source directory, running a
//! reconciliation pass every `INTERVAL` seconds and logging every change.

mod oplog;
mod scheduler;

use anyhow::{bail, Context, Result};
use clap::Parser;
use console::style;
use oplog::OperationLog;
use scheduler::Scheduler;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use treemirror_config::{Config, ConfigError, ConfigLoader, ConfigResult};
use treemirror_sync::ReconcileOptions;
use treemirror_types::CompareMode;

/// TreeMirror - periodic one-way directory mirroring
#[derive(Parser)]
#[command(
    name = "treemirror",
    version = env!("CARGO_PKG_VERSION"),
    about = "Periodically mirror a source directory into a replica",
    long_about = "TreeMirror makes REPLICA an exact copy of SOURCE every INTERVAL seconds.\n\
                  Files are copied, replaced and removed as needed; every change is\n\
                  written to LOG_FILE and echoed to the console.\n\
                  Any positional argument may instead come from the configuration."
)]
struct Cli {
    /// Source directory [config: sync.source]
    source: Option<PathBuf>,

    /// Replica directory [config: sync.replica]
    replica: Option<PathBuf>,

    /// Seconds between passes [config: sync.interval_secs]
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Operation log file [config: logging.log_file]
    log_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Report what would change without touching the replica
    #[arg(long)]
    dry_run: bool,

    /// How files present on both sides are compared
    #[arg(long, value_enum)]
    compare: Option<CompareModeArg>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - errors only
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum CompareModeArg {
    Metadata,
    Shallow,
    Checksum,
}

impl From<CompareModeArg> for CompareMode {
    fn from(mode: CompareModeArg) -> Self {
        match mode {
            CompareModeArg::Metadata => CompareMode::Metadata,
            CompareModeArg::Shallow => CompareMode::Shallow,
            CompareModeArg::Checksum => CompareMode::Checksum,
        }
    }
}

impl Cli {
    /// Layer the command line over the loaded configuration
    fn apply(&self, config: &mut Config) {
        if let Some(source) = &self.source {
            config.sync.source = Some(source.clone());
        }
        if let Some(replica) = &self.replica {
            config.sync.replica = Some(replica.clone());
        }
        if let Some(interval) = self.interval {
            config.sync.interval_secs = interval;
        }
        if let Some(log_file) = &self.log_file {
            config.logging.log_file = Some(log_file.clone());
        }
        if let Some(mode) = self.compare {
            config.sync.compare_mode = mode.into();
        }
        if self.dry_run {
            config.sync.dry_run = true;
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        } else if self.verbose {
            config.logging.level = "info".to_string();
        } else if self.quiet {
            config.logging.level = "error".to_string();
        }
    }
}

/// Paths a run cannot start without, from the command line or configuration
struct Targets {
    source: PathBuf,
    replica: PathBuf,
    log_file: PathBuf,
}

impl Targets {
    fn from_config(config: &Config) -> ConfigResult<Self> {
        let required = |value: &Option<PathBuf>, key: &str| {
            value
                .clone()
                .ok_or_else(|| ConfigError::missing_required(key))
        };
        Ok(Self {
            source: required(&config.sync.source, "sync.source (SOURCE)")?,
            replica: required(&config.sync.replica, "sync.replica (REPLICA)")?,
            log_file: required(&config.logging.log_file, "logging.log_file (LOG_FILE)")?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load_default(),
    }
    .context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;
    let targets = Targets::from_config(&config)?;

    init_logging(&config.logging.level)?;
    info!("TreeMirror v{} starting", env!("CARGO_PKG_VERSION"));

    let mut log = OperationLog::open(
        &targets.log_file,
        &config.logging.timestamp_format,
        config.logging.console_echo,
    )?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let options = ReconcileOptions {
        compare_mode: config.sync.compare_mode,
        dry_run: config.sync.dry_run,
    };
    info!(
        "Mirroring {} -> {} every {:?} (compare: {}{})",
        targets.source.display(),
        targets.replica.display(),
        config.sync.interval(),
        options.compare_mode,
        if options.dry_run { ", dry run" } else { "" }
    );

    let scheduler = Scheduler::new(
        targets.source,
        targets.replica,
        config.sync.interval(),
        options,
        cancel,
    );

    if cli.once {
        let stats = scheduler.run_pass(&mut log).await?;
        if !cli.quiet {
            print_summary(&stats);
        }
        if stats.failures > 0 {
            bail!("{} subtree(s) could not be reconciled", stats.failures);
        }
    } else {
        scheduler.run(&mut log).await?;
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after the current directory");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for interrupts: {}", e),
        }
    });
}

fn print_summary(stats: &treemirror_types::PassStats) {
    println!();
    println!(
        "{} {}",
        style("✓").green().bold(),
        style("Pass complete").bold()
    );
    println!(
        "  Copied: {} files, {} directories ({} bytes)",
        style(stats.files_copied).cyan(),
        style(stats.directories_copied).cyan(),
        style(stats.bytes_copied).cyan()
    );
    println!(
        "  Removed: {} files, {} directories",
        style(stats.files_removed).cyan(),
        style(stats.directories_removed).cyan()
    );
    if stats.failures > 0 {
        println!("  Failures: {}", style(stats.failures).red().bold());
    }
    println!(
        "  Duration: {:.2?} ({:.0} bytes/s)",
        stats.duration,
        stats.transfer_rate()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_positional_arguments() {
        let cli = parse(&["treemirror", "src", "dst", "30", "sync.log"]);
        assert_eq!(cli.source, Some(PathBuf::from("src")));
        assert_eq!(cli.replica, Some(PathBuf::from("dst")));
        assert_eq!(cli.interval, Some(30));
        assert_eq!(cli.log_file, Some(PathBuf::from("sync.log")));
        assert!(!cli.once);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(Cli::try_parse_from(["treemirror", "src", "dst", "0", "sync.log"]).is_err());
        assert!(Cli::try_parse_from(["treemirror", "src", "dst", "-5", "sync.log"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = parse(&[
            "treemirror",
            "--compare",
            "checksum",
            "--dry-run",
            "-d",
            "src",
            "dst",
            "5",
            "sync.log",
        ]);
        let mut config = Config::default();
        config.sync.interval_secs = 600;

        cli.apply(&mut config);

        assert_eq!(config.sync.interval_secs, 5);
        assert_eq!(config.sync.compare_mode, CompareMode::Checksum);
        assert!(config.sync.dry_run);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.log_file, Some(PathBuf::from("sync.log")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_values_survive_without_flags() {
        let cli = parse(&["treemirror", "src", "dst", "5", "sync.log"]);
        let mut config = Config::default();
        config.sync.compare_mode = CompareMode::Metadata;
        config.logging.level = "warn".to_string();

        cli.apply(&mut config);

        assert_eq!(config.sync.compare_mode, CompareMode::Metadata);
        assert!(!config.sync.dry_run);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_config_supplies_missing_positionals() {
        let cli = parse(&["treemirror", "--once"]);
        let mut config = Config::default();
        config.sync.source = Some(PathBuf::from("/srv/source"));
        config.sync.replica = Some(PathBuf::from("/srv/replica"));
        config.sync.interval_secs = 90;
        config.logging.log_file = Some(PathBuf::from("/var/log/treemirror.log"));

        cli.apply(&mut config);
        let targets = Targets::from_config(&config).unwrap();

        assert_eq!(config.sync.interval_secs, 90);
        assert_eq!(targets.source, PathBuf::from("/srv/source"));
        assert_eq!(targets.replica, PathBuf::from("/srv/replica"));
        assert_eq!(targets.log_file, PathBuf::from("/var/log/treemirror.log"));
    }

    #[test]
    fn test_positionals_override_config() {
        let cli = parse(&["treemirror", "src", "dst"]);
        let mut config = Config::default();
        config.sync.source = Some(PathBuf::from("/srv/source"));
        config.sync.interval_secs = 90;
        config.logging.log_file = Some(PathBuf::from("/var/log/treemirror.log"));

        cli.apply(&mut config);
        let targets = Targets::from_config(&config).unwrap();

        assert_eq!(targets.source, PathBuf::from("src"));
        assert_eq!(targets.replica, PathBuf::from("dst"));
        assert_eq!(config.sync.interval_secs, 90);
    }

    #[test]
    fn test_missing_targets_are_reported() {
        let cli = parse(&["treemirror", "src"]);
        let mut config = Config::default();

        cli.apply(&mut config);
        let error = Targets::from_config(&config).err().unwrap();

        assert!(matches!(error, ConfigError::MissingRequired { .. }));
        assert!(error.to_string().contains("sync.replica"));
    }
}
