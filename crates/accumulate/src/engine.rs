//! Buffers of one output collection.

use chrono::{DateTime, Utc};
use fieldio_common::{Decomposition, OutputCollectionDescriptor, Statistic};

use crate::buffer::AccumulationBuffer;
use crate::error::{AccumulationError, Result};

struct FieldBuffers {
    name: String,
    buffers: Vec<AccumulationBuffer>,
}

/// One [`AccumulationBuffer`] per field and statistic of a collection,
/// sized to the local decomposition slice.
pub struct AccumulationEngine {
    collection: String,
    fields: Vec<FieldBuffers>,
}

impl AccumulationEngine {
    pub fn new(descriptor: &OutputCollectionDescriptor, decomposition: &Decomposition) -> Self {
        let statistics = descriptor.statistics();
        let fields = descriptor
            .fields
            .iter()
            .map(|field| FieldBuffers {
                name: field.name.clone(),
                buffers: statistics
                    .iter()
                    .map(|stat| {
                        AccumulationBuffer::new(
                            &descriptor.name,
                            &field.name,
                            *stat,
                            decomposition.local_len(field.levels),
                        )
                    })
                    .collect(),
            })
            .collect();

        Self {
            collection: descriptor.name.clone(),
            fields,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fold a sample of `field` into every statistic.
    pub fn deposit(&mut self, field: &str, values: &[f64], time: DateTime<Utc>) -> Result<()> {
        let expected = self
            .buffers(field)
            .ok_or_else(|| self.unknown(field))?
            .first()
            .map(|b| b.len());
        if let Some(expected) = expected.filter(|n| *n != values.len()) {
            return Err(AccumulationError::ShapeMismatch {
                collection: self.collection.clone(),
                field: field.to_string(),
                expected,
                actual: values.len(),
            });
        }

        for buffer in self.buffers_mut(field)?.iter_mut() {
            buffer.deposit(values, time)?;
        }
        Ok(())
    }

    /// Emit and reset every statistic of `field`.
    pub fn flush(&mut self, field: &str, time: DateTime<Utc>) -> Result<Vec<(Statistic, Vec<f64>)>> {
        self.buffers_mut(field)?
            .iter_mut()
            .map(|buffer| Ok((buffer.statistic(), buffer.flush(time)?)))
            .collect()
    }

    /// Reset every statistic of `field` without emitting.
    pub fn discard(&mut self, field: &str) -> Result<()> {
        self.buffers_mut(field)?
            .iter_mut()
            .for_each(AccumulationBuffer::discard);
        Ok(())
    }

    /// Samples deposited into `field` since its last flush.
    pub fn pending(&self, field: &str) -> Result<usize> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.buffers.first().map_or(0, |b| b.count()))
            .ok_or_else(|| self.unknown(field))
    }

    pub fn buffers(&self, field: &str) -> Option<&[AccumulationBuffer]> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.buffers.as_slice())
    }

    fn buffers_mut(&mut self, field: &str) -> Result<&mut Vec<AccumulationBuffer>> {
        let collection = &self.collection;
        self.fields
            .iter_mut()
            .find(|f| f.name == field)
            .map(|f| &mut f.buffers)
            .ok_or_else(|| AccumulationError::UnknownField {
                collection: collection.clone(),
                field: field.to_string(),
            })
    }

    fn unknown(&self, field: &str) -> AccumulationError {
        AccumulationError::UnknownField {
            collection: self.collection.clone(),
            field: field.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fieldio_common::{FieldDescriptor, FileKind, FilenameTemplate, GridSpec};

    fn descriptor() -> OutputCollectionDescriptor {
        OutputCollectionDescriptor {
            name: "hist".to_string(),
            filename: FilenameTemplate::new("hist.zarr"),
            file_kind: FileKind::Serial,
            frequency: Duration::hours(6),
            do_avg: true,
            do_max: true,
            do_min: false,
            fields: vec![
                FieldDescriptor::new("tas", "K", -1),
                FieldDescriptor::new("ua", "m s-1", 2),
            ],
        }
    }

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_buffers_sized_to_local_slice() {
        let grid = GridSpec::global(4, 4);
        let decomp = Decomposition::block_rows(&grid, 0, 2).unwrap();
        let engine = AccumulationEngine::new(&descriptor(), &decomp);

        assert_eq!(engine.buffers("tas").unwrap().len(), 2);
        assert_eq!(engine.buffers("tas").unwrap()[0].len(), 8);
        assert_eq!(engine.buffers("ua").unwrap()[0].len(), 16);
        assert_eq!(engine.field_names().collect::<Vec<_>>(), vec!["tas", "ua"]);
    }

    #[test]
    fn test_deposit_and_flush_all_statistics() {
        let grid = GridSpec::global(1, 1);
        let mut engine = AccumulationEngine::new(&descriptor(), &Decomposition::whole(&grid));

        for v in [1.0, 4.0] {
            engine.deposit("tas", &[v], t()).unwrap();
        }
        assert_eq!(engine.pending("tas").unwrap(), 2);
        assert_eq!(
            engine.flush("tas", t()).unwrap(),
            vec![(Statistic::Average, vec![2.5]), (Statistic::Maximum, vec![4.0])]
        );
        assert_eq!(engine.pending("tas").unwrap(), 0);
        assert!(engine.flush("tas", t()).unwrap_err().is_buffer_state());
    }

    #[test]
    fn test_unknown_field_and_bad_length() {
        let grid = GridSpec::global(1, 1);
        let mut engine = AccumulationEngine::new(&descriptor(), &Decomposition::whole(&grid));

        assert!(matches!(
            engine.deposit("pr", &[1.0], t()).unwrap_err(),
            AccumulationError::UnknownField { .. }
        ));
        assert!(matches!(
            engine.deposit("ua", &[1.0], t()).unwrap_err(),
            AccumulationError::ShapeMismatch { expected: 2, actual: 1, .. }
        ));
        assert_eq!(engine.pending("ua").unwrap(), 0);
    }
}
