use crate::signal::types::SamplePoint;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A series as stored, with its free-form metadata tags.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInfo {
    pub external_id: String,
    pub name: String,
    pub data_set_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A series to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSeries {
    pub external_id: String,
    pub name: String,
    pub data_set_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Datapoints to append to one series.
#[derive(Debug, Clone, PartialEq)]
pub struct DatapointBatch {
    pub external_id: String,
    pub datapoints: Vec<SamplePoint>,
}

/// Series selection: every given metadata pair must match exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesFilter {
    pub data_set_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl SeriesFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_set(mut self, data_set_id: impl Into<String>) -> Self {
        self.data_set_id = Some(data_set_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, series: &SeriesInfo) -> bool {
        if let Some(data_set_id) = &self.data_set_id {
            if series.data_set_id.as_ref() != Some(data_set_id) {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(key, value)| series.metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
}

/// Aggregated buckets of one series, sorted by bucket start.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSeries {
    pub external_id: String,
    pub points: Vec<SamplePoint>,
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StoreError>;

    async fn list_series(&self, filter: &SeriesFilter) -> Result<Vec<SeriesInfo>, StoreError>;

    /// Highest `high` value recorded in a state marker table.
    async fn read_high_water(&self, table: &str) -> Result<Option<i64>, StoreError>;

    /// Aggregates over `[start, end)` in buckets of `granularity` ms aligned to `start`.
    /// Returns one entry per requested id, empty when the series has no data in range.
    async fn retrieve_aggregates(
        &self,
        external_ids: &[String],
        start: i64,
        end: i64,
        granularity: i64,
        aggregate: Aggregate,
    ) -> Result<Vec<AggregateSeries>, StoreError>;

    /// Latest raw sample strictly before `before`.
    async fn retrieve_latest_before(
        &self,
        external_id: &str,
        before: i64,
    ) -> Result<Option<SamplePoint>, StoreError>;

    /// Creates all series or none; fails with `AlreadyExists` if any id is taken.
    async fn create_series(&self, series: &[NewSeries]) -> Result<(), StoreError>;

    /// Appends datapoints; a second write to the same (series, timestamp) replaces the first.
    /// Fails with `NotFound` if any series does not exist.
    async fn insert_datapoints(&self, batches: &[DatapointBatch]) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request timed out")]
    Timeout,

    #[error("store rate limit exceeded")]
    RateLimited,

    #[error("series not found: {}", .0.join(", "))]
    NotFound(Vec<String>),

    #[error("series already exist: {}", .0.join(", "))]
    AlreadyExists(Vec<String>),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<StoreError>,
    },
}

impl StoreError {
    /// Network, timeout and rate-limit failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout | StoreError::RateLimited
        )
    }
}

impl From<duckdb::Error> for StoreError {
    fn from(e: duckdb::Error) -> Self {
        let message = e.to_string();
        if message.contains("Could not set lock") || message.contains("IO Error") {
            StoreError::Unavailable(message)
        } else {
            StoreError::Database(message)
        }
    }
}
