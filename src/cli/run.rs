use crate::config::parse::load_config;
use crate::config::{Config, ConfigError, SYSTEM_CONFIG_PATH, USER_CONFIG_PATH};
use crate::pipeline::{run_job, RunError, RunReport};
use crate::storage::{DuckDbStore, StoreError, TimeSeriesStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Command-line adjustments applied on top of the job section of the config.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Replaces `job.sites` when non-empty.
    pub sites: Vec<String>,
    pub lookback_minutes: Option<u64>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut Config) {
        if !self.sites.is_empty() {
            config.job.sites = self.sites.clone();
        }
        if let Some(lookback) = self.lookback_minutes {
            config.job.lookback_minutes = lookback;
        }
    }
}

pub async fn run(
    config_path: Option<PathBuf>,
    overrides: RunOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(config_path) = config_path else {
        return Err(format!(
            "config not found\nSearched locations:\n  ~/{}\n  {}\n\n\
             Use --config <path> to specify a config file, or run 'oee config init' to generate one.",
            USER_CONFIG_PATH, SYSTEM_CONFIG_PATH
        )
        .into());
    };

    match run_pipeline(&config_path, &overrides).await {
        Ok(report) => {
            println!("{}", report);
            Ok(())
        }
        Err(CommandError::Run(e)) => {
            if let Some(report) = e.report() {
                eprintln!("{}", report);
                for failure in &report.failures {
                    eprintln!("  failed: {}", failure);
                }
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_pipeline(config_path: &Path, overrides: &RunOverrides) -> Result<RunReport, CommandError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let mut config = load_config(config_path)?;
    overrides.apply(&mut config);

    info!(path = %config.storage.path.display(), "Opening store");
    let store = Arc::new(DuckDbStore::new(&config.storage.path)?);
    store.init_schema().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, finishing units in flight");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = run_job(store, &config, shutdown_rx).await;
    signal_task.abort();

    match &result {
        Ok(report) => info!(run_id = %report.run_id, "Run complete"),
        Err(e) => error!(error = %e, "Run failed"),
    }
    result.map_err(CommandError::from)
}
