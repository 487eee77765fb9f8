use super::types::{SamplePoint, SeriesDescriptor, TimeWindow};
use crate::storage::{Aggregate, StoreError, TimeSeriesStore};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store returned different bucket counts for {window}: {}", format_counts(.counts))]
    BucketMismatch {
        window: TimeWindow,
        counts: Vec<(String, usize)>,
    },
}

fn format_counts(counts: &[(String, usize)]) -> String {
    counts
        .iter()
        .map(|(id, n)| format!("{}={}", id, n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw samples for one window, keyed by external id.
#[derive(Debug, Clone, Default)]
pub struct WindowSamples {
    /// Per-step sums, sorted by timestamp.
    pub aggregates: HashMap<String, Vec<SamplePoint>>,
    /// Latest raw sample before the window start, for status-type series only.
    pub carry_in: HashMap<String, Option<SamplePoint>>,
}

impl WindowSamples {
    pub fn aggregate(&self, external_id: &str) -> Option<&[SamplePoint]> {
        self.aggregates.get(external_id).map(Vec::as_slice)
    }

    pub fn carry_in(&self, external_id: &str) -> Option<SamplePoint> {
        self.carry_in.get(external_id).copied().flatten()
    }
}

/// Retrieves summed samples at window granularity plus carry-in values.
pub struct WindowReader {
    store: Arc<dyn TimeSeriesStore>,
}

impl WindowReader {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self { store }
    }

    /// Read every series over `window`.
    ///
    /// Counting-type series must all come back with the same number of buckets;
    /// status-type series are sparse by nature and are exempt.
    pub async fn read(
        &self,
        series: &[SeriesDescriptor],
        window: TimeWindow,
    ) -> Result<WindowSamples, ReadError> {
        if series.is_empty() {
            return Ok(WindowSamples::default());
        }

        let ids: Vec<String> = series.iter().map(|s| s.external_id.clone()).collect();
        let aggregated = self
            .store
            .retrieve_aggregates(
                &ids,
                window.start(),
                window.end(),
                window.granularity(),
                Aggregate::Sum,
            )
            .await?;

        let mut aggregates: HashMap<String, Vec<SamplePoint>> = aggregated
            .into_iter()
            .map(|mut agg| {
                agg.points.sort_by_key(|p| p.timestamp);
                (agg.external_id, agg.points)
            })
            .collect();
        for id in &ids {
            aggregates.entry(id.clone()).or_default();
        }

        let mut counting: Vec<(String, usize)> = series
            .iter()
            .filter(|s| s.signal_type.is_counting())
            .map(|s| {
                let n = aggregates.get(&s.external_id).map_or(0, Vec::len);
                (s.external_id.clone(), n)
            })
            .collect();
        if counting.windows(2).any(|pair| pair[0].1 != pair[1].1) {
            counting.sort();
            return Err(ReadError::BucketMismatch {
                window,
                counts: counting,
            });
        }

        let status_series: Vec<&SeriesDescriptor> =
            series.iter().filter(|s| s.signal_type.is_status()).collect();
        let carry_values = try_join_all(
            status_series
                .iter()
                .map(|s| self.store.retrieve_latest_before(&s.external_id, window.start())),
        )
        .await?;
        let carry_in = status_series
            .iter()
            .map(|s| s.external_id.clone())
            .zip(carry_values)
            .collect();

        tracing::debug!(
            series = series.len(),
            window = %window,
            "Read window samples"
        );

        Ok(WindowSamples {
            aggregates,
            carry_in,
        })
    }
}
