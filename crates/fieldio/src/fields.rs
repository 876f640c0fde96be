//! Exchange of field values with the host.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fieldio_common::FieldDescriptor;

/// The host's field objects as seen by the component.
///
/// Input stream values are exported into the host every step; output
/// samples are imported from it. Values cover the local decomposition
/// slice, laid out `[level][y][x]`.
pub trait FieldExchange {
    fn export(&mut self, stream: &str, field: &FieldDescriptor, time: DateTime<Utc>, values: Vec<f64>);

    /// Current sample of an output field, or `None` if the host does not
    /// provide it (the field is then fed through `IoComponent::deposit`).
    fn import(&self, collection: &str, field: &FieldDescriptor) -> Option<&[f64]>;
}

/// Field exchange backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryFields {
    exports: HashMap<(String, String), (DateTime<Utc>, Vec<f64>)>,
    imports: HashMap<String, Vec<f64>>,
}

impl InMemoryFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sample returned for `field` to every collection.
    pub fn set_import(&mut self, field: impl Into<String>, values: Vec<f64>) {
        self.imports.insert(field.into(), values);
    }

    pub fn clear_import(&mut self, field: &str) {
        self.imports.remove(field);
    }

    /// Latest exported value of `stream`'s `field`.
    pub fn exported(&self, stream: &str, field: &str) -> Option<&[f64]> {
        self.exports
            .get(&(stream.to_string(), field.to_string()))
            .map(|(_, values)| values.as_slice())
    }

    pub fn exported_at(&self, stream: &str, field: &str) -> Option<DateTime<Utc>> {
        self.exports
            .get(&(stream.to_string(), field.to_string()))
            .map(|(time, _)| *time)
    }

    /// Offer every exported field as an import under the same field name.
    pub fn mirror_exports(&mut self) {
        for ((_, field), (_, values)) in &self.exports {
            self.imports.insert(field.clone(), values.clone());
        }
    }
}

impl FieldExchange for InMemoryFields {
    fn export(&mut self, stream: &str, field: &FieldDescriptor, time: DateTime<Utc>, values: Vec<f64>) {
        self.exports
            .insert((stream.to_string(), field.name.clone()), (time, values));
    }

    fn import(&self, _collection: &str, field: &FieldDescriptor) -> Option<&[f64]> {
        self.imports.get(&field.name).map(Vec::as_slice)
    }
}
