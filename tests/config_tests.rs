use oee::config::{generate::generate_starter_config, load_config, ConfigError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write(temp_dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, yaml).unwrap();
    config_path
}

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write(&temp_dir, &generate_starter_config());

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.job.sites, vec!["Oslo", "Hannover"]);
    assert_eq!(config.job.lookback_minutes, 1440);
    assert_eq!(config.job.window_size_minutes, 60);
    assert_eq!(config.state.safety_lag, Duration::from_secs(600));
    assert_eq!(config.workers.concurrency, 4);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_backoff, Duration::from_millis(500));
    // storage path has its tilde expanded
    assert!(!config.storage.path.to_string_lossy().starts_with('~'));
}

#[test]
fn test_full_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write(
        &temp_dir,
        r#"
job:
  sites: [Oslo]
  data_set_id: "uc:002:oee:ds"
  lookback_minutes: 2880
  window_size_minutes: 15
state:
  table: markers
  safety_lag: 5m
equipment:
  ideal_rate_per_minute: 30
  overrides:
    press7: 12.5
workers:
  concurrency: 2
retry:
  max_attempts: 3
  initial_backoff: 100ms
  max_backoff: 2s
  jitter: 0.25
storage:
  path: /var/lib/oee/oee.duckdb
"#,
    );

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.job.data_set_id, "uc:002:oee:ds");
    assert_eq!(config.job.lookback_minutes, 2880);
    assert_eq!(config.job.window_size_minutes, 15);
    assert_eq!(config.state.table, "markers");
    assert_eq!(config.state.safety_lag, Duration::from_secs(300));
    assert_eq!(config.equipment.ideal_rate_per_minute, 30.0);
    assert_eq!(config.equipment.overrides["press7"], 12.5);
    assert_eq!(config.workers.concurrency, 2);
    assert_eq!(config.retry.max_backoff, Duration::from_secs(2));
    assert_eq!(config.retry.jitter, 0.25);
    assert_eq!(config.storage.path.to_string_lossy(), "/var/lib/oee/oee.duckdb");
}

#[test]
fn test_env_var_expansion() {
    std::env::set_var("OEE_CONFIG_TEST_DATA_SET", "uc:009:oee:ds");
    let temp_dir = TempDir::new().unwrap();
    let config_path = write(
        &temp_dir,
        "job:\n  sites: [Oslo]\n  data_set_id: \"$env{OEE_CONFIG_TEST_DATA_SET}\"\n",
    );

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.job.data_set_id, "uc:009:oee:ds");
    std::env::remove_var("OEE_CONFIG_TEST_DATA_SET");
}

#[test]
fn test_missing_sites_is_parse_error_with_file_context() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write(&temp_dir, "job:\n  lookback_minutes: 60\n");

    let err = load_config(&config_path).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("config.yml"), "{message}");
    assert!(message.contains("sites"), "{message}");
}

#[test]
fn test_invalid_values_are_listed() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write(
        &temp_dir,
        r#"
job:
  sites: [Oslo, ""]
  window_size_minutes: 0
equipment:
  ideal_rate_per_minute: -1
retry:
  max_attempts: 0
  initial_backoff: 1m
  max_backoff: 1s
"#,
    );

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert_eq!(errors.len(), 5, "{errors:?}");
            assert!(errors.iter().any(|e| e.contains("empty names")));
            assert!(errors.iter().any(|e| e.contains("window_size_minutes")));
            assert!(errors.iter().any(|e| e.contains("ideal_rate_per_minute")));
            assert!(errors.iter().any(|e| e.contains("max_attempts")));
            assert!(errors.iter().any(|e| e.contains("initial_backoff")));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("absent.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
    assert!(err.to_string().contains("absent.yml"));
}
