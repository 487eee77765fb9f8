pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# OEE CONFIGURATION
# =============================================================================
# This file configures which sites are processed, how far back each run looks,
# and how the pipeline talks to the time-series store.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/oee/config.yml
#   3. /etc/oee/config.yml
#
# Any value may reference an environment variable: write $env followed by
# the variable name in braces.

# =============================================================================
# JOB
# =============================================================================
# One run computes metrics for every site over the look-back range. The range
# is split into whole-day windows and each (window, site) pair is processed
# independently.

job:
  # Sites to process (required, at least one)
  sites:
    - Oslo
    - Hannover

  # Data set that receives the computed metric series
  data_set_id: "uc:001:oee:ds"

  # How far back from "now" to recompute, in minutes
  lookback_minutes: 1440

  # Length of the trailing rolling window, in minutes
  window_size_minutes: 60

# =============================================================================
# STATE
# =============================================================================
# "Now" is the latest high-water mark in the state table, floored to the
# minute, minus a safety lag so that late-arriving data is complete.

state:
  table: timeseries_datapoints_states
  # Duration: ms, s, m or h
  safety_lag: 10m

# =============================================================================
# EQUIPMENT
# =============================================================================

equipment:
  # Units per minute at the ideal cycle time (20/min is a 3 second cycle)
  ideal_rate_per_minute: 20.0

  # Per-equipment ideal rates, keyed by equipment id
  overrides: {}
  #   press7: 12.0

# =============================================================================
# WORKERS
# =============================================================================

workers:
  # Maximum number of (window, site) units processed at once
  concurrency: 4

# =============================================================================
# RETRY
# =============================================================================
# Transient store failures (unavailable, timeout, rate limit) are retried per
# call with exponential backoff plus random jitter.

retry:
  max_attempts: 5
  initial_backoff: 500ms
  max_backoff: 30s
  # Fraction of each backoff added at random
  jitter: 0.5

# =============================================================================
# STORAGE
# =============================================================================

storage:
  # DuckDB database file
  path: ~/.local/share/oee/oee.duckdb
"#
    .to_string()
}
