use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clonesync::{
    Config, ConfigSource, GitCli, LocalDiscovery, RepoFlagsHook, RunOverrides, SyncEngine,
    SyncSummary,
};

#[derive(Parser)]
#[command(name = "clonesync")]
#[command(about = "Sync local git clones with their origin and upstream remotes")]
#[command(version)]
struct Cli {
    /// Path to a git clone or a directory of clones (default: config root, then ./)
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Do not make any changes on disk, just log what would be done
    #[arg(short = 'd', long)]
    dry_run: bool,

    /// Debug-level output on what actions are being taken
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all logging below WARNING level
    #[arg(short, long)]
    quiet: bool,

    /// Also process dirty clones (they are fetched but never checked out)
    #[arg(short = 'D', long)]
    sync_dirty: bool,

    /// Disable GitHub API integration
    #[arg(short = 'G', long = "no-github")]
    disable_github: bool,

    /// Only fetch origin, not any other remotes
    #[arg(short = 'o', long = "only-origin")]
    origin_only: bool,

    /// Do not sync the default branch from upstream to origin
    #[arg(short = 'u', long)]
    no_upstream: bool,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of clones processed at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) if summary.has_failures() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<SyncSummary> {
    let (config, source) = load_config(cli.config.as_deref())?;

    init_logging(&cli, &config)?;
    info!("Starting clonesync v{}", env!("CARGO_PKG_VERSION"));
    log_config_source(&source);

    let overrides = RunOverrides {
        root: cli.path.clone(),
        dry_run: cli.dry_run,
        sync_dirty: cli.sync_dirty,
        disable_github: cli.disable_github,
        origin_only: cli.origin_only,
        no_upstream: cli.no_upstream,
        max_parallel: cli.jobs,
    };
    let run_config = config.run_config(&overrides)?;

    let repos = LocalDiscovery::new(&run_config.root)
        .discover()
        .context("Failed to discover repositories")?;

    let git = Arc::new(GitCli::new(run_config.timeout));
    let disable_github = run_config.disable_github;
    let mut engine = SyncEngine::new(run_config, git);

    if !disable_github {
        match RepoFlagsHook::new(&config.github) {
            Ok(hook) => engine = engine.with_github_hook(Arc::new(hook)),
            Err(e) => warn!("GitHub integration disabled: {}", e),
        }
    }

    let summary = engine.sync_repos(repos).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
        println!("{}", json);
    } else {
        print_summary(&summary);
    }

    Ok(summary)
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<(Config, ConfigSource)> {
    match config_path {
        Some(path) => Ok((Config::load(path)?, ConfigSource::File(path.to_path_buf()))),
        None => Config::load_or_default(),
    }
}

fn log_config_source(source: &ConfigSource) {
    match source {
        ConfigSource::File(path) => debug!("Loaded configuration from {:?}", path),
        ConfigSource::Created(path) => info!("Created default configuration at: {:?}", path),
        ConfigSource::Unsaved { path, error } => warn!(
            "Could not write default configuration to {:?}: {:#}",
            path, error
        ),
    }
}

/// Initialize logging based on verbosity flags and the configured level
fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format.as_str() {
        "json" => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        "full" => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }

    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    for decision in &summary.decisions {
        println!("{}", decision);
    }

    println!(
        "{} synced, {} skipped, {} failed ({} repositories in {:.2}s)",
        summary.synced,
        summary.skipped,
        summary.failed,
        summary.total_repositories,
        summary.duration.as_secs_f64()
    );
}
