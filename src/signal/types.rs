use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between the equipment id and the signal type in an external id.
pub const ID_SEPARATOR: char = ':';

/// One minute in milliseconds, the granularity of the whole pipeline.
pub const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Error)]
#[error("unknown signal type '{0}'")]
pub struct UnknownSignalType(pub String);

/// Raw input signals and computed output metrics share one tag space in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalType {
    Count,
    Good,
    Status,
    PlannedStatus,
    OffSpec,
    Quality,
    Performance,
    Availability,
    Oee,
}

impl SignalType {
    /// Signal types read from the store as pipeline input.
    pub const RAW: [SignalType; 4] = [
        SignalType::Count,
        SignalType::Good,
        SignalType::Status,
        SignalType::PlannedStatus,
    ];

    /// Signal types written back by the pipeline.
    pub const METRICS: [SignalType; 5] = [
        SignalType::OffSpec,
        SignalType::Quality,
        SignalType::Performance,
        SignalType::Availability,
        SignalType::Oee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Count => "count",
            SignalType::Good => "good",
            SignalType::Status => "status",
            SignalType::PlannedStatus => "planned_status",
            SignalType::OffSpec => "off_spec",
            SignalType::Quality => "quality",
            SignalType::Performance => "performance",
            SignalType::Availability => "availability",
            SignalType::Oee => "oee",
        }
    }

    /// Status-type signals only report transitions and need step-hold reconstruction.
    pub fn is_status(&self) -> bool {
        matches!(self, SignalType::Status | SignalType::PlannedStatus)
    }

    pub fn is_counting(&self) -> bool {
        matches!(self, SignalType::Count | SignalType::Good)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = UnknownSignalType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(SignalType::Count),
            "good" => Ok(SignalType::Good),
            "status" => Ok(SignalType::Status),
            "planned_status" => Ok(SignalType::PlannedStatus),
            "off_spec" => Ok(SignalType::OffSpec),
            "quality" => Ok(SignalType::Quality),
            "performance" => Ok(SignalType::Performance),
            "availability" => Ok(SignalType::Availability),
            "oee" => Ok(SignalType::Oee),
            other => Err(UnknownSignalType(other.to_string())),
        }
    }
}

/// A series in the store, identified by its external id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesDescriptor {
    pub external_id: String,
    pub site: String,
    pub signal_type: SignalType,
}

impl SeriesDescriptor {
    pub fn new(external_id: impl Into<String>, site: impl Into<String>, signal_type: SignalType) -> Self {
        Self {
            external_id: external_id.into(),
            site: site.into(),
            signal_type,
        }
    }

    /// Prefix of the external id before the first separator.
    pub fn equipment_id(&self) -> &str {
        equipment_id_of(&self.external_id)
    }
}

/// Prefix of an external id before the first separator, or the whole id if there is none.
pub fn equipment_id_of(external_id: &str) -> &str {
    external_id
        .split_once(ID_SEPARATOR)
        .map(|(equipment, _)| equipment)
        .unwrap_or(external_id)
}

/// External id of a series belonging to `equipment_id`.
pub fn series_external_id(equipment_id: &str, signal_type: SignalType) -> String {
    format!("{}{}{}", equipment_id, ID_SEPARATOR, signal_type)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowBoundsError {
    #[error("window start {start} must be before end {end}")]
    Empty { start: i64, end: i64 },

    #[error("granularity must be positive, got {0}ms")]
    Granularity(i64),

    #[error("window length {length}ms is not a multiple of granularity {granularity}ms")]
    Misaligned { length: i64, granularity: i64 },
}

/// Half-open time range `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    start: i64,
    end: i64,
    granularity: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64, granularity: i64) -> Result<Self, WindowBoundsError> {
        if granularity <= 0 {
            return Err(WindowBoundsError::Granularity(granularity));
        }
        if start >= end {
            return Err(WindowBoundsError::Empty { start, end });
        }
        let length = end - start;
        if length % granularity != 0 {
            return Err(WindowBoundsError::Misaligned { length, granularity });
        }
        Ok(Self { start, end, granularity })
    }

    /// A window at one-minute granularity.
    pub fn minutes(start: i64, end: i64) -> Result<Self, WindowBoundsError> {
        Self::new(start, end, MINUTE_MS)
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn granularity(&self) -> i64 {
        self.granularity
    }

    /// Number of granularity steps covered by the window.
    pub fn steps(&self) -> usize {
        ((self.end - self.start) / self.granularity) as usize
    }

    /// Step boundaries from start (inclusive) to end (exclusive).
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (self.start..self.end).step_by(self.granularity as usize)
    }

    /// The same window extended `steps` granularity steps earlier.
    pub fn extend_back(&self, steps: usize) -> Self {
        Self {
            start: self
                .start
                .saturating_sub((steps as i64).saturating_mul(self.granularity)),
            end: self.end,
            granularity: self.granularity,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            DateTime::<Utc>::from_timestamp_millis(self.start),
            DateTime::<Utc>::from_timestamp_millis(self.end),
        ) {
            (Some(start), Some(end)) => write!(f, "[{}, {})", start.to_rfc3339(), end.to_rfc3339()),
            _ => write!(f, "[{}ms, {}ms)", self.start, self.end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub timestamp: i64,
    pub value: f64,
}

impl SamplePoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A gap-free, one-sample-per-step signal covering a window exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseSignal {
    pub window: TimeWindow,
    pub points: Vec<SamplePoint>,
}

impl DenseSignal {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Computed datapoints for one metric type, handed to the upserter.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBatch {
    pub metric_type: SignalType,
    pub site: String,
    pub series: Vec<(String, Vec<SamplePoint>)>,
}

impl MetricBatch {
    pub fn new(metric_type: SignalType, site: impl Into<String>) -> Self {
        Self {
            metric_type,
            site: site.into(),
            series: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn datapoint_count(&self) -> usize {
        self.series.iter().map(|(_, points)| points.len()).sum()
    }
}
