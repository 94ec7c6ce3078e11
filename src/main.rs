//! Keel - deployment orchestration for container platform clusters
//!
//! This is the main CLI entry point for Keel.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use keel::config::{ClusterConfig, ClusterParser, ClusterSpec, Settings};
use keel::phase::Manager;
use keel::pipeline::{apply_pipeline, reset_pipeline};
use keel::shell::ShellConfigurerFactory;
use keel::telemetry::LogTelemetry;
use keel::KeelError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Keel - container platform deployment
#[derive(Parser)]
#[command(name = "keel")]
#[command(version)]
#[command(about = "Install, upgrade and reset container platform clusters", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or upgrade the cluster to the configured versions
    Apply {
        /// Cluster document
        #[arg(short, long, default_value = "keel.yaml")]
        config: PathBuf,
        /// Re-apply matching versions and allow minor version skips
        #[arg(long)]
        force: bool,
        /// Keep going when a phase fails
        #[arg(long)]
        ignore_errors: bool,
        /// Do not clean up after failed phases
        #[arg(long)]
        no_cleanup: bool,
        /// Share of worker hosts updated at once
        #[arg(long)]
        rolling_fraction: Option<f64>,
        /// Hosts pulling images at the same time
        #[arg(long)]
        image_concurrency: Option<usize>,
    },

    /// Remove everything Keel installed
    Reset {
        /// Cluster document
        #[arg(short, long, default_value = "keel.yaml")]
        config: PathBuf,
        /// Confirm the reset
        #[arg(long)]
        force: bool,
    },

    /// Check a cluster document
    Validate {
        /// Cluster document
        #[arg(short, long, default_value = "keel.yaml")]
        config: PathBuf,
    },

    /// Show the phases an apply would run
    Plan {
        /// Cluster document
        #[arg(short, long, default_value = "keel.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

fn load(path: &Path) -> anyhow::Result<ClusterSpec> {
    ClusterParser::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Document settings, then command line overrides
fn settings(spec: &ClusterSpec) -> Settings {
    spec.settings.clone().unwrap_or_default()
}

fn cluster(spec: ClusterSpec, settings: &Settings) -> anyhow::Result<ClusterConfig> {
    let factory = ShellConfigurerFactory::new(&spec, &settings.state_dir());
    Ok(ClusterConfig::from_spec(spec, &factory)?)
}

async fn execute(mut manager: Manager) -> anyhow::Result<()> {
    let result = manager.run().await;
    println!("{}", manager.report());
    Ok(result?)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Apply {
            config,
            force,
            ignore_errors,
            no_cleanup,
            rolling_fraction,
            image_concurrency,
        } => {
            let spec = load(&config)?;
            let mut settings = settings(&spec);
            settings.force |= force;
            settings.ignore_errors |= ignore_errors;
            settings.skip_cleanup |= no_cleanup;
            if let Some(fraction) = rolling_fraction {
                if !(fraction > 0.0 && fraction <= 1.0) {
                    bail!("--rolling-fraction must be in (0, 1], got {}", fraction);
                }
                settings.rolling.fraction = fraction;
            }
            if let Some(width) = image_concurrency {
                if width == 0 {
                    bail!("--image-concurrency must be at least 1");
                }
                settings.image_concurrency = width;
            }

            let cluster = cluster(spec, &settings)?;
            tracing::info!("applying cluster {}", cluster.name);
            let manager =
                apply_pipeline(cluster, &settings).telemetry(Arc::new(LogTelemetry));
            execute(manager).await?;
            println!("Cluster is up to date");
        }

        Commands::Reset { config, force } => {
            if !force {
                bail!("reset removes every component from every host; pass --force to confirm");
            }
            let spec = load(&config)?;
            let settings = settings(&spec);
            let cluster = cluster(spec, &settings)?;
            tracing::info!("resetting cluster {}", cluster.name);
            let manager =
                reset_pipeline(cluster, &settings).telemetry(Arc::new(LogTelemetry));
            execute(manager).await?;
            println!("Cluster has been reset");
        }

        Commands::Validate { config } => {
            let spec = load(&config)?;
            println!("Cluster {} is valid", spec.name);
            println!("{:<24} {:<16}", "ADDRESS", "ROLE");
            for host in &spec.hosts {
                println!("{:<24} {:<16}", host.address(), host.role.to_string());
            }
            if let Some(ref registry) = spec.registry {
                println!("Registry {}", registry.version);
            }
        }

        Commands::Plan { config } => {
            let spec = load(&config)?;
            let settings = settings(&spec);
            let manager = apply_pipeline(cluster(spec, &settings)?, &settings);
            for (i, title) in manager.titles().iter().enumerate() {
                println!("{:>3}. {}", i + 1, title);
            }
        }

        Commands::Version => {
            println!("keel version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e.downcast_ref::<KeelError>().and_then(KeelError::hint) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}
