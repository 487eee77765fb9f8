//! Step-hold reconstruction of sparse status signals.
//!
//! Status signals only report transitions, and their per-minute sums are
//! absent for minutes without a transition. The value at every minute is the
//! most recent known value at or before it; the first known value also covers
//! any minutes before it.

use super::types::{DenseSignal, SamplePoint, TimeWindow};

/// Build a dense one-sample-per-step signal over `window`.
///
/// `carry_in` is the latest sample before the window. Samples outside the
/// window are clipped to its bounds; for equal timestamps the later sample in
/// input order wins, so in-window samples override a clipped carry-in.
/// With neither a carry-in nor any samples the whole window is `0.0`.
pub fn reconstruct(
    carry_in: Option<SamplePoint>,
    samples: &[SamplePoint],
    window: TimeWindow,
) -> DenseSignal {
    let known = known_points(carry_in, samples, window);

    let points = window
        .timestamps()
        .map(|t| SamplePoint::new(t, value_at(&known, t)))
        .collect();

    DenseSignal { window, points }
}

/// Merge carry-in and samples into a sorted, duplicate-free list of clipped points.
fn known_points(
    carry_in: Option<SamplePoint>,
    samples: &[SamplePoint],
    window: TimeWindow,
) -> Vec<SamplePoint> {
    let mut known: Vec<SamplePoint> = carry_in
        .into_iter()
        .chain(samples.iter().copied())
        .map(|p| SamplePoint::new(p.timestamp.clamp(window.start(), window.end()), p.value))
        .collect();

    if known.is_empty() {
        return vec![SamplePoint::new(window.start(), 0.0)];
    }

    // Stable sort keeps recording order among equal timestamps
    known.sort_by_key(|p| p.timestamp);

    let mut deduped: Vec<SamplePoint> = Vec::with_capacity(known.len());
    for point in known {
        match deduped.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => deduped.push(point),
        }
    }
    deduped
}

/// Value of the latest point at or before `t`, else the earliest point.
fn value_at(known: &[SamplePoint], t: i64) -> f64 {
    let after = known.partition_point(|p| p.timestamp <= t);
    if after == 0 {
        known[0].value
    } else {
        known[after - 1].value
    }
}
