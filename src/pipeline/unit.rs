use super::retry::{RetryPolicy, RetryingStore};
use crate::metrics::calculator::{self, EquipmentMetrics, IdealRates, InputLengthError, RollingInputs};
use crate::metrics::upsert::ResultUpserter;
use crate::metrics::window::{rolling_sum, WindowError};
use crate::signal::reader::{ReadError, WindowReader, WindowSamples};
use crate::signal::reconstruct::reconstruct;
use crate::signal::types::{
    series_external_id, MetricBatch, SamplePoint, SeriesDescriptor, SignalType, TimeWindow,
};
use crate::signal::SignalCatalog;
use crate::storage::{StoreError, TimeSeriesStore};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One independent piece of work: a site over one reporting window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub site: String,
    pub reporting: TimeWindow,
    /// Rolling window length in steps.
    pub window_size: usize,
}

impl WorkUnit {
    /// The reporting window extended back by the rolling window, to seed the first sums.
    pub fn read_window(&self) -> TimeWindow {
        self.reporting.extend_back(self.window_size)
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site '{}' window {}", self.site, self.reporting)
    }
}

/// Settings shared by every unit of a run.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub data_set_id: String,
    pub ideal_rates: IdealRates,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitOutcome {
    pub equipment_processed: usize,
    pub equipment_incomplete: usize,
    pub series_created: usize,
    pub datapoints_written: usize,
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("inconsistent store data: {0}")]
    Read(ReadError),

    #[error("equipment '{equipment}' {signal}: {source}")]
    Window {
        equipment: String,
        signal: SignalType,
        #[source]
        source: WindowError,
    },

    #[error("equipment '{equipment}': {source}")]
    Inputs {
        equipment: String,
        #[source]
        source: InputLengthError,
    },

    #[error("unit task aborted: {0}")]
    Aborted(String),
}

impl From<ReadError> for UnitError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Store(e) => UnitError::Store(e),
            other => UnitError::Read(other),
        }
    }
}

/// Raw series of one equipment item, by signal type.
type EquipmentSignals<'a> = HashMap<SignalType, &'a SeriesDescriptor>;

/// Run the full pipeline for one unit: discover, read, reconstruct, aggregate,
/// compute and upsert.
pub async fn process_unit(
    store: Arc<dyn TimeSeriesStore>,
    unit: &WorkUnit,
    ctx: &UnitContext,
) -> Result<UnitOutcome, UnitError> {
    let store: Arc<dyn TimeSeriesStore> = Arc::new(RetryingStore::new(store, ctx.retry.clone()));

    let descriptors = SignalCatalog::new(store.clone())
        .discover_raw(&unit.site)
        .await?;
    if descriptors.is_empty() {
        info!(site = %unit.site, "No raw signals found for site");
        return Ok(UnitOutcome::default());
    }

    let read_window = unit.read_window();
    let samples = WindowReader::new(store.clone())
        .read(&descriptors, read_window)
        .await?;

    let mut by_equipment: BTreeMap<&str, EquipmentSignals<'_>> = BTreeMap::new();
    for descriptor in &descriptors {
        let signals = by_equipment.entry(descriptor.equipment_id()).or_default();
        if let Some(kept) = signals.get(&descriptor.signal_type) {
            warn!(
                site = %unit.site,
                equipment = descriptor.equipment_id(),
                signal_type = %descriptor.signal_type,
                kept = %kept.external_id,
                ignored = %descriptor.external_id,
                "Equipment has more than one series of this type, keeping the first"
            );
            continue;
        }
        signals.insert(descriptor.signal_type, descriptor);
    }

    let mut outcome = UnitOutcome::default();
    let mut batches: BTreeMap<SignalType, MetricBatch> = SignalType::METRICS
        .iter()
        .map(|typ| (*typ, MetricBatch::new(*typ, unit.site.as_str())))
        .collect();
    let timestamps: Vec<i64> = unit.reporting.timestamps().collect();

    for (equipment, signals) in &by_equipment {
        let inputs = rolling_inputs(equipment, signals, &samples, unit)?;

        let missing: Vec<&str> = SignalType::RAW
            .iter()
            .filter(|typ| !signals.contains_key(*typ))
            .map(SignalType::as_str)
            .collect();
        if !missing.is_empty() {
            warn!(
                site = %unit.site,
                equipment,
                missing = ?missing,
                "Missing raw signals, dependent metrics skipped"
            );
            outcome.equipment_incomplete += 1;
        }

        let ideal_rate = ctx.ideal_rates.for_equipment(equipment);
        let metrics = calculator::compute(&inputs, ideal_rate, timestamps.len()).map_err(|source| {
            UnitError::Inputs {
                equipment: equipment.to_string(),
                source,
            }
        })?;

        if let Some(runtime) = metrics.theoretical_runtime.as_ref().and_then(|r| r.last()) {
            debug!(equipment, theoretical_runtime_minutes = runtime, "Computed metrics");
        }

        add_to_batches(&mut batches, equipment, metrics, &timestamps);
        outcome.equipment_processed += 1;
    }

    let upserter = ResultUpserter::new(store, ctx.data_set_id.as_str());
    for batch in batches.values().filter(|b| !b.is_empty()) {
        let written = upserter.upsert(batch).await?;
        outcome.series_created += written.series_created;
        outcome.datapoints_written += written.datapoints_written;
    }

    Ok(outcome)
}

/// Dense per-step values for a series over the read window.
fn dense_values(descriptor: &SeriesDescriptor, samples: &WindowSamples, read_window: TimeWindow) -> Vec<f64> {
    let aggregated = samples.aggregate(&descriptor.external_id).unwrap_or(&[]);
    if descriptor.signal_type.is_status() {
        reconstruct(samples.carry_in(&descriptor.external_id), aggregated, read_window).values()
    } else {
        aggregated.iter().map(|p| p.value).collect()
    }
}

fn rolling_inputs(
    equipment: &str,
    signals: &EquipmentSignals<'_>,
    samples: &WindowSamples,
    unit: &WorkUnit,
) -> Result<RollingInputs, UnitError> {
    let read_window = unit.read_window();
    let reporting_len = unit.reporting.steps();

    let rolling = |signal: SignalType| -> Result<Option<Vec<f64>>, UnitError> {
        let Some(descriptor) = signals.get(&signal) else {
            return Ok(None);
        };
        let values = dense_values(descriptor, samples, read_window);
        rolling_sum(&values, unit.window_size, reporting_len)
            .map(Some)
            .map_err(|source| UnitError::Window {
                equipment: equipment.to_string(),
                signal,
                source,
            })
    };

    Ok(RollingInputs {
        count: rolling(SignalType::Count)?,
        good: rolling(SignalType::Good)?,
        uptime: rolling(SignalType::Status)?,
        planned_uptime: rolling(SignalType::PlannedStatus)?,
    })
}

fn add_to_batches(
    batches: &mut BTreeMap<SignalType, MetricBatch>,
    equipment: &str,
    metrics: EquipmentMetrics,
    timestamps: &[i64],
) {
    let computed = [
        (SignalType::OffSpec, metrics.off_spec),
        (SignalType::Quality, metrics.quality),
        (SignalType::Performance, metrics.performance),
        (SignalType::Availability, metrics.availability),
        (SignalType::Oee, metrics.oee),
    ];

    for (metric_type, values) in computed {
        let (Some(values), Some(batch)) = (values, batches.get_mut(&metric_type)) else {
            continue;
        };
        let points = timestamps
            .iter()
            .zip(values)
            .map(|(t, v)| SamplePoint::new(*t, v))
            .collect();
        batch
            .series
            .push((series_external_id(equipment, metric_type), points));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::types::MINUTE_MS;
    use crate::storage::{
        Aggregate, DatapointBatch, DuckDbStore, NewSeries, SeriesFilter,
    };

    const HOUR: i64 = 60;

    fn m(minute: i64) -> i64 {
        minute * MINUTE_MS
    }

    async fn add_raw(store: &DuckDbStore, external_id: &str, site: &str, typ: SignalType, points: Vec<SamplePoint>) {
        let metadata = [("site", site), ("type", typ.as_str())]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        store
            .create_series(&[NewSeries {
                external_id: external_id.to_string(),
                name: external_id.to_string(),
                data_set_id: Some("src:opcua".to_string()),
                metadata,
            }])
            .await
            .unwrap();
        store
            .insert_datapoints(&[DatapointBatch {
                external_id: external_id.to_string(),
                datapoints: points,
            }])
            .await
            .unwrap();
    }

    fn every_minute(from: i64, to: i64, value: f64) -> Vec<SamplePoint> {
        (from..to).map(|i| SamplePoint::new(m(i), value)).collect()
    }

    fn context() -> UnitContext {
        UnitContext {
            data_set_id: "uc:001:oee:ds".to_string(),
            ideal_rates: IdealRates::uniform(20.0),
            retry: RetryPolicy::immediate(3),
        }
    }

    async fn read_metric(store: &DuckDbStore, external_id: &str, from: i64, to: i64) -> Vec<SamplePoint> {
        store
            .retrieve_aggregates(&[external_id.to_string()], m(from), m(to), MINUTE_MS, Aggregate::Sum)
            .await
            .unwrap()
            .remove(0)
            .points
    }

    /// Equipment E1 producing one item a minute for two hours, 57 of every 60 good,
    /// running and planned the whole time.
    async fn oslo_store() -> Arc<DuckDbStore> {
        let store = DuckDbStore::in_memory().unwrap();
        store.init_schema().await.unwrap();

        let good: Vec<SamplePoint> = (0..2 * HOUR)
            .map(|i| SamplePoint::new(m(i), if i % 20 == 0 { 0.0 } else { 1.0 }))
            .collect();
        add_raw(&store, "E1:count", "Oslo", SignalType::Count, every_minute(0, 2 * HOUR, 1.0)).await;
        add_raw(&store, "E1:good", "Oslo", SignalType::Good, good).await;
        add_raw(&store, "E1:status", "Oslo", SignalType::Status, vec![SamplePoint::new(m(-30), 1.0)]).await;
        add_raw(
            &store,
            "E1:planned_status",
            "Oslo",
            SignalType::PlannedStatus,
            vec![SamplePoint::new(m(-5), 1.0), SamplePoint::new(m(90), 1.0)],
        )
        .await;
        Arc::new(store)
    }

    fn oslo_unit() -> WorkUnit {
        WorkUnit {
            site: "Oslo".to_string(),
            reporting: TimeWindow::minutes(m(HOUR), m(2 * HOUR)).unwrap(),
            window_size: HOUR as usize,
        }
    }

    #[tokio::test]
    async fn test_full_hour_scenario() {
        let store = oslo_store().await;
        let outcome = process_unit(store.clone(), &oslo_unit(), &context()).await.unwrap();

        assert_eq!(outcome.equipment_processed, 1);
        assert_eq!(outcome.equipment_incomplete, 0);
        assert_eq!(outcome.series_created, 5);
        assert_eq!(outcome.datapoints_written, 5 * 60);

        let off_spec = read_metric(&store, "E1:off_spec", HOUR, 2 * HOUR).await;
        let quality = read_metric(&store, "E1:quality", HOUR, 2 * HOUR).await;
        let performance = read_metric(&store, "E1:performance", HOUR, 2 * HOUR).await;
        let availability = read_metric(&store, "E1:availability", HOUR, 2 * HOUR).await;
        let oee = read_metric(&store, "E1:oee", HOUR, 2 * HOUR).await;

        assert_eq!(oee.len(), 60);
        assert_eq!(oee[0].timestamp, m(HOUR));
        assert_eq!(oee[59].timestamp, m(2 * HOUR - 1));
        for i in 0..60 {
            assert_eq!(off_spec[i].value, 3.0);
            assert!((quality[i].value - 0.95).abs() < 1e-12);
            assert!((performance[i].value - 0.05).abs() < 1e-12);
            assert_eq!(availability[i].value, 1.0);
            assert!((oee[i].value - 0.0475).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_created_series_are_tagged() {
        let store = oslo_store().await;
        process_unit(store.clone(), &oslo_unit(), &context()).await.unwrap();

        let oee_series = store
            .list_series(
                &SeriesFilter::new()
                    .with_data_set("uc:001:oee:ds")
                    .with_metadata("type", "oee"),
            )
            .await
            .unwrap();
        assert_eq!(oee_series.len(), 1);
        assert_eq!(oee_series[0].name, "E1 Oee");
        assert_eq!(oee_series[0].metadata["site"], "Oslo");
        assert_eq!(oee_series[0].metadata["equipment"], "E1");
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = oslo_store().await;
        process_unit(store.clone(), &oslo_unit(), &context()).await.unwrap();
        let second = process_unit(store.clone(), &oslo_unit(), &context()).await.unwrap();

        assert_eq!(second.series_created, 0);
        let outputs = store
            .list_series(&SeriesFilter::new().with_data_set("uc:001:oee:ds"))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 5);
        assert_eq!(read_metric(&store, "E1:quality", HOUR, 2 * HOUR).await.len(), 60);
    }

    #[tokio::test]
    async fn test_duplicate_signal_type_keeps_first_series() {
        let store = oslo_store().await;
        add_raw(&store, "E1:count_b", "Oslo", SignalType::Count, every_minute(0, 2 * HOUR, 5.0)).await;

        let outcome = process_unit(store.clone(), &oslo_unit(), &context()).await.unwrap();
        assert_eq!(outcome.equipment_processed, 1);
        assert_eq!(outcome.equipment_incomplete, 0);

        // metrics come from E1:count, not E1:count_b
        let off_spec = read_metric(&store, "E1:off_spec", HOUR, 2 * HOUR).await;
        let performance = read_metric(&store, "E1:performance", HOUR, 2 * HOUR).await;
        assert_eq!(off_spec.len(), 60);
        assert!(off_spec.iter().all(|p| p.value == 3.0));
        assert!(performance.iter().all(|p| (p.value - 0.05).abs() < 1e-12));
    }

    #[tokio::test]
    async fn test_missing_planned_status_skips_only_dependent_metrics() {
        let store = oslo_store().await;
        add_raw(&store, "E2:count", "Oslo", SignalType::Count, every_minute(0, 2 * HOUR, 2.0)).await;
        add_raw(&store, "E2:good", "Oslo", SignalType::Good, every_minute(0, 2 * HOUR, 2.0)).await;
        add_raw(&store, "E2:status", "Oslo", SignalType::Status, vec![SamplePoint::new(m(0), 1.0)]).await;

        let outcome = process_unit(store.clone(), &oslo_unit(), &context()).await.unwrap();
        assert_eq!(outcome.equipment_processed, 2);
        assert_eq!(outcome.equipment_incomplete, 1);

        let e2 = store
            .list_series(&SeriesFilter::new().with_metadata("equipment", "E2"))
            .await
            .unwrap();
        let mut types: Vec<&str> = e2.iter().map(|s| s.metadata["type"].as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["off_spec", "performance", "quality"]);

        // E1 is unaffected
        assert_eq!(read_metric(&store, "E1:oee", HOUR, 2 * HOUR).await.len(), 60);
    }

    #[tokio::test]
    async fn test_count_gap_fails_unit_with_length_context() {
        let store = DuckDbStore::in_memory().unwrap();
        store.init_schema().await.unwrap();
        // Ten minutes missing from the count series
        let mut count = every_minute(0, 50, 1.0);
        count.extend(every_minute(60, 2 * HOUR, 1.0));
        add_raw(&store, "E1:count", "Oslo", SignalType::Count, count).await;

        let err = process_unit(Arc::new(store), &oslo_unit(), &context())
            .await
            .unwrap_err();
        match err {
            UnitError::Window { equipment, signal, source } => {
                assert_eq!(equipment, "E1");
                assert_eq!(signal, SignalType::Count);
                assert_eq!(
                    source,
                    WindowError::LengthMismatch {
                        length: 110,
                        window: 60,
                        expected: 60,
                        actual: 50,
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_site_without_signals_writes_nothing() {
        let store = oslo_store().await;
        let unit = WorkUnit {
            site: "Houston".to_string(),
            ..oslo_unit()
        };
        let outcome = process_unit(store, &unit, &context()).await.unwrap();
        assert_eq!(outcome, UnitOutcome::default());
    }

    #[test]
    fn test_read_window_is_extended_by_window_size() {
        let unit = oslo_unit();
        assert_eq!(unit.read_window().start(), 0);
        assert_eq!(unit.read_window().end(), m(2 * HOUR));
        assert_eq!(unit.read_window().steps(), 120);
    }
}
