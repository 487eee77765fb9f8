use std::collections::HashMap;
use thiserror::Error;

/// Division that yields `0.0` for a non-positive denominator and never NaN or infinity.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if !(denominator > 0.0) {
        return 0.0;
    }
    let quotient = numerator / denominator;
    if quotient.is_finite() {
        quotient
    } else {
        0.0
    }
}

/// Items produced outside specification. Negative values flag inconsistent inputs and are kept.
pub fn off_spec(total_count: f64, good_count: f64) -> f64 {
    total_count - good_count
}

pub fn quality(good_count: f64, total_count: f64) -> f64 {
    safe_divide(good_count, total_count)
}

/// Actual production rate over uptime, relative to the ideal rate.
pub fn performance(total_count: f64, uptime: f64, ideal_rate: f64) -> f64 {
    safe_divide(safe_divide(total_count, uptime), ideal_rate)
}

pub fn availability(uptime: f64, planned_uptime: f64) -> f64 {
    safe_divide(uptime, planned_uptime)
}

pub fn oee(performance: f64, availability: f64, quality: f64) -> f64 {
    performance * availability * quality
}

/// Minutes needed to produce `total_count` items at the ideal cycle time.
pub fn theoretical_runtime(ideal_rate: f64, total_count: f64) -> f64 {
    ideal_cycle_time(ideal_rate) * total_count
}

/// Minutes per item at the ideal rate (items per minute).
pub fn ideal_cycle_time(ideal_rate: f64) -> f64 {
    safe_divide(1.0, ideal_rate)
}

/// Ideal production rate in items per minute, with per-equipment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct IdealRates {
    pub default_rate: f64,
    pub overrides: HashMap<String, f64>,
}

impl IdealRates {
    pub fn uniform(rate: f64) -> Self {
        Self {
            default_rate: rate,
            overrides: HashMap::new(),
        }
    }

    pub fn for_equipment(&self, equipment_id: &str) -> f64 {
        self.overrides
            .get(equipment_id)
            .copied()
            .unwrap_or(self.default_rate)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("rolling input '{input}' has {actual} values, expected {expected}")]
pub struct InputLengthError {
    pub input: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Rolling sums for one equipment item over the reporting window.
/// A missing signal is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollingInputs {
    pub count: Option<Vec<f64>>,
    pub good: Option<Vec<f64>>,
    pub uptime: Option<Vec<f64>>,
    pub planned_uptime: Option<Vec<f64>>,
}

/// Per-minute metric values. A metric whose inputs are missing is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquipmentMetrics {
    pub off_spec: Option<Vec<f64>>,
    pub quality: Option<Vec<f64>>,
    pub performance: Option<Vec<f64>>,
    pub availability: Option<Vec<f64>>,
    pub oee: Option<Vec<f64>>,
    pub theoretical_runtime: Option<Vec<f64>>,
}

/// Compute all metrics the available inputs allow.
pub fn compute(
    inputs: &RollingInputs,
    ideal_rate: f64,
    reporting_len: usize,
) -> Result<EquipmentMetrics, InputLengthError> {
    let count = checked("count", inputs.count.as_deref(), reporting_len)?;
    let good = checked("good", inputs.good.as_deref(), reporting_len)?;
    let uptime = checked("uptime", inputs.uptime.as_deref(), reporting_len)?;
    let planned = checked("planned_uptime", inputs.planned_uptime.as_deref(), reporting_len)?;

    let off_spec = count
        .zip(good)
        .map(|(count, good)| zip_map(count, good, |c, g| off_spec(c, g)));
    let quality = count
        .zip(good)
        .map(|(count, good)| zip_map(count, good, |c, g| quality(g, c)));
    let performance = count
        .zip(uptime)
        .map(|(count, uptime)| zip_map(count, uptime, |c, u| performance(c, u, ideal_rate)));
    let availability = uptime
        .zip(planned)
        .map(|(uptime, planned)| zip_map(uptime, planned, availability));
    let oee = match (&performance, &availability, &quality) {
        (Some(p), Some(a), Some(q)) => Some(
            p.iter()
                .zip(a)
                .zip(q)
                .map(|((p, a), q)| oee(*p, *a, *q))
                .collect(),
        ),
        _ => None,
    };
    let theoretical_runtime =
        count.map(|count| count.iter().map(|c| theoretical_runtime(ideal_rate, *c)).collect());

    Ok(EquipmentMetrics {
        off_spec,
        quality,
        performance,
        availability,
        oee,
        theoretical_runtime,
    })
}

fn checked<'a>(
    input: &'static str,
    values: Option<&'a [f64]>,
    expected: usize,
) -> Result<Option<&'a [f64]>, InputLengthError> {
    match values {
        Some(v) if v.len() != expected => Err(InputLengthError {
            input,
            expected,
            actual: v.len(),
        }),
        other => Ok(other),
    }
}

fn zip_map(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect()
}
