//! Evaluation of a snapshot bracket at a point in time.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fieldio_common::InterpolationPolicy;

/// Every field of a stream at one archived time, in stream field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// File the record was read from.
    pub path: PathBuf,
    pub time: DateTime<Utc>,
    pub fields: Vec<Vec<f64>>,
}

/// The pair of snapshots around the current time. `upper.time` may equal
/// `lower.time` at the end of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBracket {
    pub lower: Snapshot,
    pub upper: Snapshot,
}

impl TimeBracket {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.lower.time <= t && t <= self.upper.time
    }

    /// All fields of the bracket evaluated at `t`.
    pub fn evaluate(&self, policy: InterpolationPolicy, t: DateTime<Utc>) -> Vec<Vec<f64>> {
        self.lower
            .fields
            .iter()
            .zip(&self.upper.fields)
            .map(|(v0, v1)| interpolate(policy, self.lower.time, v0, self.upper.time, v1, t))
            .collect()
    }
}

/// Evaluate one field between `(t0, v0)` and `(t1, v1)` at `t`.
///
/// Linear results are exact at the endpoints and never leave
/// `[min(v0, v1), max(v0, v1)]`; NaN at either endpoint stays NaN.
pub fn interpolate(
    policy: InterpolationPolicy,
    t0: DateTime<Utc>,
    v0: &[f64],
    t1: DateTime<Utc>,
    v1: &[f64],
    t: DateTime<Utc>,
) -> Vec<f64> {
    if t1 <= t0 {
        return v0.to_vec();
    }

    match policy {
        InterpolationPolicy::Hold => v0.to_vec(),
        InterpolationPolicy::Nearest => {
            if t - t0 <= t1 - t {
                v0.to_vec()
            } else {
                v1.to_vec()
            }
        }
        InterpolationPolicy::Linear => {
            if t <= t0 {
                return v0.to_vec();
            }
            if t >= t1 {
                return v1.to_vec();
            }

            let weight = (t - t0).num_milliseconds() as f64 / (t1 - t0).num_milliseconds() as f64;
            v0.iter().zip(v1).map(|(&a, &b)| lerp(a, b, weight)).collect()
        }
    }
}

fn lerp(a: f64, b: f64, weight: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    let value = a + (b - a) * weight;
    value.max(a.min(b)).min(a.max(b))
}
