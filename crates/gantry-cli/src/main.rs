//! Gantry CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod config;
mod handlers;
mod loader;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use handlers::RunOverrides;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry build, test and release orchestrator", long_about = None)]
struct Cli {
    /// Workflow file or directory (overrides the configured workflows dir)
    #[arg(long, global = true)]
    workflows: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = CliConfig::load()?;
    let workflows = cli
        .workflows
        .clone()
        .unwrap_or_else(|| config.workflows_dir.clone());

    match cli.command {
        Commands::Validate { path } => handlers::validate(path.as_deref().unwrap_or(&workflows))?,
        Commands::Resolve { event, expand } => handlers::resolve(&workflows, &event, expand)?,
        Commands::Run {
            event,
            work_dir,
            release_dir,
            max_parallel,
        } => {
            let overrides = RunOverrides {
                work_dir,
                release_dir,
                max_parallel,
            };
            let failed = handlers::run(&config, &workflows, &event, overrides).await?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
