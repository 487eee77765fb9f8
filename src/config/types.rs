use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub job: JobConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub equipment: EquipmentConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// The invocation record: which sites to process and over what range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub sites: Vec<String>,
    #[serde(default = "default_data_set_id")]
    pub data_set_id: String,
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,
    #[serde(default = "default_window_size_minutes")]
    pub window_size_minutes: u64,
}

fn default_data_set_id() -> String {
    "uc:001:oee:ds".to_string()
}

fn default_lookback_minutes() -> u64 {
    1440
}

fn default_window_size_minutes() -> u64 {
    60
}

impl JobConfig {
    pub fn new(sites: Vec<String>) -> Self {
        Self {
            sites,
            data_set_id: default_data_set_id(),
            lookback_minutes: default_lookback_minutes(),
            window_size_minutes: default_window_size_minutes(),
        }
    }
}

/// Where "now" comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_table")]
    pub table: String,
    #[serde(default = "default_safety_lag", with = "duration_format")]
    pub safety_lag: Duration,
}

fn default_state_table() -> String {
    "timeseries_datapoints_states".to_string()
}

fn default_safety_lag() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            table: default_state_table(),
            safety_lag: default_safety_lag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Units per minute at the ideal cycle time.
    #[serde(default = "default_ideal_rate")]
    pub ideal_rate_per_minute: f64,
    #[serde(default)]
    pub overrides: HashMap<String, f64>,
}

fn default_ideal_rate() -> f64 {
    20.0
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            ideal_rate_per_minute: default_ideal_rate(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "duration_format")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "duration_format")]
    pub max_backoff: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~/.local/share/oee/oee.duckdb")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

// Durations are written as "<n>ms", "<n>s", "<n>m" or "<n>h"
mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        Ok(match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            _ => Duration::from_secs(value * 3600),
        })
    }

    pub(super) fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::duration_format::{format_duration, parse_duration};
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration(" 2h ").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("xm").is_err());
    }

    #[test]
    fn test_format_duration_picks_largest_unit() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config: Config = serde_yaml::from_str("job:\n  sites: [Oslo]\n").unwrap();

        assert_eq!(config.job.sites, vec!["Oslo"]);
        assert_eq!(config.job.data_set_id, "uc:001:oee:ds");
        assert_eq!(config.job.lookback_minutes, 1440);
        assert_eq!(config.job.window_size_minutes, 60);
        assert_eq!(config.state.table, "timeseries_datapoints_states");
        assert_eq!(config.state.safety_lag, Duration::from_secs(600));
        assert_eq!(config.equipment.ideal_rate_per_minute, 20.0);
        assert_eq!(config.workers.concurrency, 4);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_durations_serialize_back_to_strings() {
        let yaml = serde_yaml::to_string(&RetryConfig::default()).unwrap();
        assert!(yaml.contains("initial_backoff: 500ms"));
        assert!(yaml.contains("max_backoff: 30s"));
    }
}
