//! runner-forge - Main entry point
//!
//! Provisions and tears down ephemeral self-hosted GitHub Actions runners
//! on EC2, one invocation per workflow phase (start, stop).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use runner_forge::config::{self, Config};
use runner_forge::github::GitHubClient;
use runner_forge::lifecycle::{self, StartArgs, StopArgs};
use runner_forge::provider;
use runner_forge::report::ConsoleReporter;

/// Ephemeral GitHub Actions runner provisioner
#[derive(Parser)]
#[command(name = "runner-forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch runner instances and wait for them to register
    Start {
        /// Number of runners to launch (overrides config)
        #[arg(long)]
        count: Option<usize>,

        /// Seconds to wait for each runner to register (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// File the instance mapping is written to
        /// (defaults to $GITHUB_OUTPUT)
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Deregister runners and terminate their instances
    Stop {
        /// File the instance mapping is read from
        /// (defaults to $GITHUB_OUTPUT)
        #[arg(long)]
        mapping_file: Option<PathBuf>,
    },

    /// Generate a default configuration file
    InitConfig {
        /// Output path (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Start {
            count,
            timeout,
            output_file,
        } => start(cli.config.as_deref(), count, timeout, output_file).await,
        Commands::Stop { mapping_file } => {
            if let Err(e) = stop(cli.config.as_deref(), mapping_file).await {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::InitConfig { output } => generate_config(output),
    }
}

/// Resolve the mapping file path: explicit flag first, then the workflow
/// output channel.
fn resolve_mapping_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    std::env::var_os("GITHUB_OUTPUT")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("no mapping file: pass the file flag or set GITHUB_OUTPUT"))
}

async fn start(
    config_path: Option<&std::path::Path>,
    count: Option<usize>,
    timeout: Option<u64>,
    output_file: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path, count, timeout)?;
    let output_path = resolve_mapping_path(output_file)?;

    let registry = GitHubClient::new(&config.github.token, &config.github.repo)?;
    let provider = provider::for_key(&config.provider, config.aws.clone()).await?;
    let reporter = ConsoleReporter;

    let args = StartArgs {
        count: config.runner.count,
        runner_timeout: Duration::from_secs(config.runner.timeout),
        platform: config.runner.platform.clone(),
        architecture: config.runner.architecture.clone(),
        home_dir: config.runner.home_dir.clone(),
        repo: config.github.repo.clone(),
        extra_labels: config.runner.extra_labels.clone(),
        script: config.runner.pre_runner_script.clone(),
        output_path,
        ready_poll: None,
    };
    lifecycle::start(&registry, provider.as_ref(), &reporter, &args)
        .await
        .context("Failed to provision runners")?;
    Ok(())
}

async fn stop(
    config_path: Option<&std::path::Path>,
    mapping_file: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path, None, None)?;
    let mapping_path = resolve_mapping_path(mapping_file)?;

    let registry = GitHubClient::new(&config.github.token, &config.github.repo)?;
    let provider = provider::for_key(&config.provider, config.aws.clone()).await?;
    let reporter = ConsoleReporter;

    let args = StopArgs {
        mapping_path,
        removed_poll: None,
    };
    lifecycle::stop(&registry, provider.as_ref(), &reporter, &args).await?;
    Ok(())
}

fn load_config(
    path: Option<&std::path::Path>,
    count: Option<usize>,
    timeout: Option<u64>,
) -> Result<Config> {
    let mut config = Config::load(path).context("Failed to load configuration")?;
    if let Some(count) = count {
        config.runner.count = count;
    }
    if let Some(timeout) = timeout {
        config.runner.timeout = timeout;
    }
    config.validate()?;
    Ok(config)
}

/// Generate a default configuration file
fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let template = config::default_config_template();

    match output {
        Some(path) => {
            std::fs::write(&path, template)?;
            println!("Configuration written to: {}", path.display());
        }
        None => {
            print!("{template}");
        }
    }

    Ok(())
}
