use clap::{Parser, Subcommand};
use oee::cli::run::RunOverrides;
use oee::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "oee")]
#[command(about = "Rolling OEE metrics for production equipment", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and write metrics for every configured site
    Run {
        /// Process only these sites (repeatable)
        #[arg(long = "site")]
        sites: Vec<String>,

        /// Override the configured look-back range
        #[arg(long)]
        lookback_minutes: Option<u64>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Load and validate the config
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oee=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run {
            sites,
            lookback_minutes,
        }) => {
            let overrides = RunOverrides {
                sites,
                lookback_minutes,
            };
            oee::cli::run::run(config_path, overrides).await?;
        }
        // Default behavior is to run
        None => oee::cli::run::run(config_path, RunOverrides::default()).await?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => oee::cli::config::init(stdout)?,
            ConfigAction::Validate => oee::cli::config::validate(config_path)?,
        },
    }

    Ok(())
}
