use crate::signal::types::SamplePoint;
use crate::storage::{
    Aggregate, AggregateSeries, DatapointBatch, NewSeries, SeriesFilter, SeriesInfo, StoreError,
    TimeSeriesStore,
};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry with exponential backoff and random jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Up to this fraction of the backoff is added at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Retries without any delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before the retry following failed attempt number `attempt` (1-based).
    ///
    /// `max_backoff` caps the exponential part only, so jitter still spreads
    /// retries once the cap is reached.
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let extra = if jitter > 0.0 {
            base.mul_f64(rng.gen_range(0.0..=jitter))
        } else {
            Duration::ZERO
        };
        base + extra
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempts,
                        error = %e,
                        "Max retries exceeded"
                    );
                    return Err(StoreError::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts,
                        last: Box::new(e),
                    });
                }

                let backoff = policy.backoff(attempts, &mut rand::thread_rng());
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Store call failed, retrying"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Store wrapper that retries every transient failure per call.
pub struct RetryingStore {
    inner: Arc<dyn TimeSeriesStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn TimeSeriesStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl TimeSeriesStore for RetryingStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "init_schema", move || inner.init_schema()).await
    }

    async fn list_series(&self, filter: &SeriesFilter) -> Result<Vec<SeriesInfo>, StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "list_series", move || inner.list_series(filter)).await
    }

    async fn read_high_water(&self, table: &str) -> Result<Option<i64>, StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "read_high_water", move || inner.read_high_water(table)).await
    }

    async fn retrieve_aggregates(
        &self,
        external_ids: &[String],
        start: i64,
        end: i64,
        granularity: i64,
        aggregate: Aggregate,
    ) -> Result<Vec<AggregateSeries>, StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "retrieve_aggregates", move || {
            inner.retrieve_aggregates(external_ids, start, end, granularity, aggregate)
        })
        .await
    }

    async fn retrieve_latest_before(
        &self,
        external_id: &str,
        before: i64,
    ) -> Result<Option<SamplePoint>, StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "retrieve_latest_before", move || {
            inner.retrieve_latest_before(external_id, before)
        })
        .await
    }

    async fn create_series(&self, series: &[NewSeries]) -> Result<(), StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "create_series", move || inner.create_series(series)).await
    }

    async fn insert_datapoints(&self, batches: &[DatapointBatch]) -> Result<(), StoreError> {
        let inner = &self.inner;
        with_retry(&self.policy, "insert_datapoints", move || inner.insert_datapoints(batches)).await
    }
}
