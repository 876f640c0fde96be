//! Running aggregate for one field and statistic.

use chrono::{DateTime, Utc};
use fieldio_common::Statistic;

use crate::error::{AccumulationError, Result};

/// Aggregate of the samples deposited since the last flush.
///
/// Average keeps a running sum, maximum/minimum keep the running extremum
/// (seeded by the first deposit after a flush), instant keeps the last
/// sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationBuffer {
    collection: String,
    field: String,
    statistic: Statistic,
    values: Vec<f64>,
    count: usize,
    last_deposit: Option<DateTime<Utc>>,
    last_flush: Option<DateTime<Utc>>,
}

impl AccumulationBuffer {
    pub fn new(
        collection: impl Into<String>,
        field: impl Into<String>,
        statistic: Statistic,
        len: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            statistic,
            values: vec![0.0; len],
            count: 0,
            last_deposit: None,
            last_flush: None,
        }
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Samples deposited since the last flush.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn last_deposit(&self) -> Option<DateTime<Utc>> {
        self.last_deposit
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        self.last_flush
    }

    pub fn deposit(&mut self, values: &[f64], time: DateTime<Utc>) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(AccumulationError::ShapeMismatch {
                collection: self.collection.clone(),
                field: self.field.clone(),
                expected: self.values.len(),
                actual: values.len(),
            });
        }

        match self.statistic {
            Statistic::Average => {
                for (acc, v) in self.values.iter_mut().zip(values) {
                    *acc += v;
                }
            }
            Statistic::Instant => self.values.copy_from_slice(values),
            _ if self.count == 0 => self.values.copy_from_slice(values),
            Statistic::Maximum => {
                for (acc, v) in self.values.iter_mut().zip(values) {
                    *acc = acc.max(*v);
                }
            }
            Statistic::Minimum => {
                for (acc, v) in self.values.iter_mut().zip(values) {
                    *acc = acc.min(*v);
                }
            }
        }

        self.count += 1;
        self.last_deposit = Some(time);
        Ok(())
    }

    /// Emit the aggregate and reset to the identity.
    pub fn flush(&mut self, time: DateTime<Utc>) -> Result<Vec<f64>> {
        if self.count == 0 {
            return Err(AccumulationError::BufferState {
                collection: self.collection.clone(),
                field: self.field.clone(),
                statistic: self.statistic,
            });
        }

        let out = match self.statistic {
            Statistic::Average => {
                let n = self.count as f64;
                self.values.iter().map(|v| v / n).collect()
            }
            _ => self.values.clone(),
        };

        self.discard();
        self.last_flush = Some(time);
        Ok(out)
    }

    /// Drop everything deposited since the last flush.
    pub fn discard(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn test_average_of_one_to_six() {
        let mut buffer = AccumulationBuffer::new("hist", "tas", Statistic::Average, 2);
        for k in 1..=6 {
            buffer.deposit(&[k as f64, 10.0], hour(k)).unwrap();
        }
        assert_eq!(buffer.count(), 6);
        assert_eq!(buffer.flush(hour(6)).unwrap(), vec![3.5, 10.0]);
        assert_eq!(buffer.count(), 0);
        assert_eq!(buffer.last_flush(), Some(hour(6)));
    }

    #[test]
    fn test_average_of_identical_values_is_exact() {
        let mut buffer = AccumulationBuffer::new("hist", "tas", Statistic::Average, 1);
        for k in 0..7 {
            buffer.deposit(&[0.1], hour(k)).unwrap();
        }
        let out = buffer.flush(hour(7)).unwrap();
        assert!((out[0] - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_extrema_seeded_after_flush() {
        let mut max = AccumulationBuffer::new("hist", "tas", Statistic::Maximum, 2);
        let mut min = AccumulationBuffer::new("hist", "tas", Statistic::Minimum, 2);
        for values in [[-5.0, 2.0], [-7.0, 9.0], [-6.0, 1.0]] {
            max.deposit(&values, hour(1)).unwrap();
            min.deposit(&values, hour(1)).unwrap();
        }
        assert_eq!(max.flush(hour(3)).unwrap(), vec![-5.0, 9.0]);
        assert_eq!(min.flush(hour(3)).unwrap(), vec![-7.0, 1.0]);

        // the reset value 0.0 must not leak into the next window
        max.deposit(&[-9.0, -9.0], hour(4)).unwrap();
        min.deposit(&[9.0, 9.0], hour(4)).unwrap();
        assert_eq!(max.flush(hour(4)).unwrap(), vec![-9.0, -9.0]);
        assert_eq!(min.flush(hour(4)).unwrap(), vec![9.0, 9.0]);
    }

    #[test]
    fn test_instant_keeps_last() {
        let mut buffer = AccumulationBuffer::new("snap", "tas", Statistic::Instant, 1);
        buffer.deposit(&[1.0], hour(1)).unwrap();
        buffer.deposit(&[2.0], hour(2)).unwrap();
        assert_eq!(buffer.last_deposit(), Some(hour(2)));
        assert_eq!(buffer.flush(hour(2)).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_flush_after_flush_is_buffer_state() {
        let mut buffer = AccumulationBuffer::new("hist", "tas", Statistic::Average, 1);
        buffer.deposit(&[1.0], hour(1)).unwrap();
        buffer.flush(hour(1)).unwrap();
        let err = buffer.flush(hour(2)).unwrap_err();
        assert!(err.is_buffer_state());
    }

    #[test]
    fn test_shape_mismatch() {
        let mut buffer = AccumulationBuffer::new("hist", "tas", Statistic::Maximum, 3);
        let err = buffer.deposit(&[1.0], hour(1)).unwrap_err();
        assert!(matches!(
            err,
            AccumulationError::ShapeMismatch { expected: 3, actual: 1, .. }
        ));
        assert_eq!(buffer.count(), 0);
    }
}
