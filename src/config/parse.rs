use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    config.storage.path = expand_tilde(&config.storage.path);
    Ok(config)
}

/// Parse and validate a config document. Paths are left unexpanded.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let config: Config = serde_yaml::from_str(&yaml)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error.
/// Comment lines are ignored.
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<&str> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| env_var_pattern().captures_iter(line))
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

pub(crate) fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_job(&config.job, &mut errors);

    if config.state.table.trim().is_empty() {
        errors.push("state.table must not be empty".to_string());
    }

    if !(config.equipment.ideal_rate_per_minute > 0.0) {
        errors.push(format!(
            "equipment.ideal_rate_per_minute must be positive, got {}",
            config.equipment.ideal_rate_per_minute
        ));
    }
    let mut overrides: Vec<(&String, &f64)> = config.equipment.overrides.iter().collect();
    overrides.sort_by(|a, b| a.0.cmp(b.0));
    for (equipment, rate) in overrides {
        if !(*rate > 0.0) {
            errors.push(format!(
                "equipment.overrides.{}: ideal rate must be positive, got {}",
                equipment, rate
            ));
        }
    }

    if config.workers.concurrency == 0 {
        errors.push("workers.concurrency must be at least 1".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if config.retry.initial_backoff > config.retry.max_backoff {
        errors.push("retry.initial_backoff must not exceed retry.max_backoff".to_string());
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        errors.push(format!(
            "retry.jitter must be between 0 and 1, got {}",
            config.retry.jitter
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

/// Ten years of minutes.
pub const MAX_LOOKBACK_MINUTES: u64 = 3660 * 1440;

/// One week of minutes.
pub const MAX_WINDOW_SIZE_MINUTES: u64 = 7 * 1440;

/// Checks shared by the config file and command-line overrides of the job.
pub(crate) fn validate_job(job: &JobConfig, errors: &mut Vec<String>) {
    if job.sites.is_empty() {
        errors.push("job.sites must list at least one site".to_string());
    }
    let mut seen = HashSet::new();
    for site in &job.sites {
        if site.trim().is_empty() {
            errors.push("job.sites must not contain empty names".to_string());
        } else if !seen.insert(site.as_str()) {
            errors.push(format!("job.sites lists '{}' more than once", site));
        }
    }

    if job.data_set_id.trim().is_empty() {
        errors.push("job.data_set_id must not be empty".to_string());
    }
    if job.lookback_minutes == 0 {
        errors.push("job.lookback_minutes must be at least 1".to_string());
    } else if job.lookback_minutes > MAX_LOOKBACK_MINUTES {
        errors.push(format!(
            "job.lookback_minutes must not exceed {}, got {}",
            MAX_LOOKBACK_MINUTES, job.lookback_minutes
        ));
    }
    if job.window_size_minutes == 0 {
        errors.push("job.window_size_minutes must be at least 1".to_string());
    } else if job.window_size_minutes > MAX_WINDOW_SIZE_MINUTES {
        errors.push(format!(
            "job.window_size_minutes must not exceed {}, got {}",
            MAX_WINDOW_SIZE_MINUTES, job.window_size_minutes
        ));
    }
}
