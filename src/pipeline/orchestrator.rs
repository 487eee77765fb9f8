use super::retry::{RetryPolicy, RetryingStore};
use super::unit::{process_unit, UnitContext, UnitError, UnitOutcome, WorkUnit};
use crate::config::parse::validate_job;
use crate::config::{Config, JobConfig};
use crate::metrics::IdealRates;
use crate::signal::types::{TimeWindow, WindowBoundsError, MINUTE_MS};
use crate::storage::{StoreError, TimeSeriesStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Minutes in one day partition.
pub const DAY_MINUTES: u64 = 1440;

/// Run-wide settings that do not vary per job.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub state_table: String,
    pub safety_lag: Duration,
    pub concurrency: usize,
    pub ideal_rates: IdealRates,
    pub retry: RetryPolicy,
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            state_table: config.state.table.clone(),
            safety_lag: config.state.safety_lag,
            concurrency: config.workers.concurrency,
            ideal_rates: IdealRates {
                default_rate: config.equipment.ideal_rate_per_minute,
                overrides: config.equipment.overrides.clone(),
            },
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                initial_backoff: config.retry.initial_backoff,
                max_backoff: config.retry.max_backoff,
                jitter: config.retry.jitter,
            },
        }
    }
}

#[derive(Debug)]
pub struct UnitFailure {
    pub unit: WorkUnit,
    pub error: UnitError,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

/// Summary of one orchestrated run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Latest complete minute, epoch milliseconds.
    pub now: i64,
    pub units_planned: usize,
    pub units_succeeded: usize,
    /// Units not started because shutdown was requested.
    pub units_skipped: usize,
    pub equipment_processed: usize,
    pub equipment_incomplete: usize,
    pub series_created: usize,
    pub datapoints_written: usize,
    /// Failed units in plan order.
    pub failures: Vec<UnitFailure>,
}

impl RunReport {
    fn new(now: i64, units_planned: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            now,
            units_planned,
            units_succeeded: 0,
            units_skipped: 0,
            equipment_processed: 0,
            equipment_incomplete: 0,
            series_created: 0,
            datapoints_written: 0,
            failures: Vec::new(),
        }
    }

    fn record_success(&mut self, outcome: UnitOutcome) {
        self.units_succeeded += 1;
        self.equipment_processed += outcome.equipment_processed;
        self.equipment_incomplete += outcome.equipment_incomplete;
        self.series_created += outcome.series_created;
        self.datapoints_written += outcome.datapoints_written;
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} units succeeded, {} failed, {} skipped; {} series created, {} datapoints written",
            self.units_succeeded,
            self.units_planned,
            self.failures.len(),
            self.units_skipped,
            self.series_created,
            self.datapoints_written
        )
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("state table '{0}' has no high-water mark")]
    NoStateMarker(String),

    #[error("failed to read state table: {0}")]
    State(#[source] StoreError),

    #[error("invalid processing range: {0}")]
    Plan(#[from] WindowBoundsError),

    #[error("{} of {} units failed; first: {}", .0.failures.len(), .0.units_planned, first_failure_text(.0))]
    UnitsFailed(Box<RunReport>),
}

fn first_failure_text(report: &RunReport) -> String {
    report
        .failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl RunError {
    /// The first failed unit in plan order, when units failed.
    pub fn first_failure(&self) -> Option<&UnitFailure> {
        match self {
            RunError::UnitsFailed(report) => report.failures.first(),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunError::UnitsFailed(report) => Some(report),
            _ => None,
        }
    }
}

/// Latest fully available minute: the high-water mark floored to the minute,
/// less the safety lag, floored again.
pub fn resolve_now(high_water: i64, safety_lag: Duration) -> i64 {
    let lag = i64::try_from(safety_lag.as_millis()).unwrap_or(i64::MAX);
    floor_minute(floor_minute(high_water).saturating_sub(lag))
}

fn floor_minute(ts: i64) -> i64 {
    ts - ts.rem_euclid(MINUTE_MS)
}

/// Split `[now - lookback, now)` into day windows from the range start and pair
/// each window with every site. The last window may be shorter than a day.
pub fn plan_units(now: i64, job: &JobConfig) -> Result<Vec<WorkUnit>, WindowBoundsError> {
    let lookback = i64::try_from(job.lookback_minutes).unwrap_or(i64::MAX);
    let day = DAY_MINUTES as i64;
    let range_start = now.saturating_sub(lookback.saturating_mul(MINUTE_MS));

    let mut units = Vec::new();
    let mut offset = 0;
    while offset < lookback {
        let start = range_start + offset * MINUTE_MS;
        let end = range_start + (offset + day).min(lookback) * MINUTE_MS;
        let reporting = TimeWindow::minutes(start, end)?;
        for site in &job.sites {
            units.push(WorkUnit {
                site: site.clone(),
                reporting,
                window_size: job.window_size_minutes as usize,
            });
        }
        offset += day;
    }
    Ok(units)
}

enum UnitResult {
    Done(UnitOutcome),
    Failed(UnitError),
    Skipped,
}

/// Runs every (window, site) unit of a job on a bounded worker pool.
pub struct Orchestrator {
    store: Arc<dyn TimeSeriesStore>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn TimeSeriesStore>, settings: RunSettings) -> Self {
        Self { store, settings }
    }

    /// Process all units, waiting for every one to finish before reporting.
    ///
    /// A failed unit does not stop the others. Once `shutdown` turns true,
    /// units that have not started are skipped and running ones complete.
    pub async fn run(
        &self,
        job: &JobConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport, RunError> {
        let mut problems = Vec::new();
        validate_job(job, &mut problems);
        if !problems.is_empty() {
            return Err(RunError::InvalidJob(problems.join("; ")));
        }

        let state_store = RetryingStore::new(self.store.clone(), self.settings.retry.clone());
        let high_water = state_store
            .read_high_water(&self.settings.state_table)
            .await
            .map_err(RunError::State)?
            .ok_or_else(|| RunError::NoStateMarker(self.settings.state_table.clone()))?;

        let now = resolve_now(high_water, self.settings.safety_lag);
        let units = plan_units(now, job)?;
        let mut report = RunReport::new(now, units.len());

        info!(
            run_id = %report.run_id,
            now = %EpochMillis(now),
            sites = job.sites.len(),
            units = units.len(),
            concurrency = self.settings.concurrency,
            "Planned units"
        );

        let ctx = Arc::new(UnitContext {
            data_set_id: job.data_set_id.clone(),
            ideal_rates: self.settings.ideal_rates.clone(),
            retry: self.settings.retry.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        let handles: Vec<_> = units
            .iter()
            .cloned()
            .map(|unit| {
                let store = self.store.clone();
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                let shutdown = shutdown.clone();
                let span = info_span!(
                    "unit",
                    site = %unit.site,
                    window_start = %EpochMillis(unit.reporting.start())
                );
                tokio::spawn(
                    async move {
                        if *shutdown.borrow() {
                            return UnitResult::Skipped;
                        }
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return UnitResult::Skipped;
                        };
                        if *shutdown.borrow() {
                            return UnitResult::Skipped;
                        }
                        match process_unit(store, &unit, &ctx).await {
                            Ok(outcome) => {
                                info!(
                                    equipment = outcome.equipment_processed,
                                    datapoints = outcome.datapoints_written,
                                    "Unit completed"
                                );
                                UnitResult::Done(outcome)
                            }
                            Err(e) => {
                                error!(error = %e, "Unit failed");
                                UnitResult::Failed(e)
                            }
                        }
                    }
                    .instrument(span),
                )
            })
            .collect();

        let results = join_all(handles).await;

        for (unit, result) in units.into_iter().zip(results) {
            match result {
                Ok(UnitResult::Done(outcome)) => report.record_success(outcome),
                Ok(UnitResult::Skipped) => report.units_skipped += 1,
                Ok(UnitResult::Failed(error)) => report.failures.push(UnitFailure { unit, error }),
                Err(e) => {
                    error!(site = %unit.site, error = %e, "Unit task aborted");
                    report.failures.push(UnitFailure {
                        unit,
                        error: UnitError::Aborted(e.to_string()),
                    });
                }
            }
        }

        if report.units_skipped > 0 {
            warn!(skipped = report.units_skipped, "Shutdown requested, units skipped");
        }
        info!(run_id = %report.run_id, summary = %report, "Run finished");

        if report.is_success() {
            Ok(report)
        } else {
            Err(RunError::UnitsFailed(Box::new(report)))
        }
    }
}

/// Invocation entry point: run `config.job` against `store` with the run-wide
/// settings from `config`.
pub async fn run_job(
    store: Arc<dyn TimeSeriesStore>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<RunReport, RunError> {
    Orchestrator::new(store, RunSettings::from(config))
        .run(&config.job, shutdown)
        .await
}

/// Epoch milliseconds rendered as RFC 3339 in log fields.
struct EpochMillis(i64);

impl fmt::Display for EpochMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(ts) => f.write_str(&ts.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}
