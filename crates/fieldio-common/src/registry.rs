//! Input stream and output collection descriptors.
//!
//! Configuration arrives as flat key/value records (`NAME`, `DATAFILE`,
//! `FIELD_1_NAME`, ...). Each record is parsed and validated once into an
//! immutable descriptor; the indexed `FIELD_i_*` keys become an ordered
//! `Vec<FieldDescriptor>` so nothing downstream synthesizes key names.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::time::{parse_interval, parse_time, FilenameTemplate, TimeRange, ValidYears};

/// A scalar configuration value as it appears in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

/// One configuration record: a stream or a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigRecord {
    entries: BTreeMap<String, ConfigValue>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a textual value.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_ascii_uppercase(), ConfigValue::Text(value.into()));
    }

    /// Look up a key, case-insensitively.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(|v| v.to_string().trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// The record's NAME, used to label errors.
    pub fn label(&self) -> String {
        self.get("NAME").unwrap_or_else(|| "<unnamed>".to_string())
    }

    fn required(&self, key: &str) -> ConfigResult<String> {
        self.get(key)
            .ok_or_else(|| ConfigError::missing(self.label(), key))
    }

    fn bool_or(&self, key: &str, default: bool) -> ConfigResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid(self.label(), key, format!("not a boolean: {raw}"))),
        }
    }

    fn time(&self, key: &str) -> ConfigResult<DateTime<Utc>> {
        let raw = self.required(key)?;
        parse_time(&raw).map_err(|e| ConfigError::invalid(self.label(), key, e.to_string()))
    }

    fn interval(&self, key: &str) -> ConfigResult<Option<Duration>> {
        self.get(key)
            .map(|raw| {
                parse_interval(&raw)
                    .map_err(|e| ConfigError::invalid(self.label(), key, e.to_string()))
            })
            .transpose()
    }

    fn positive_interval(&self, key: &str) -> ConfigResult<Duration> {
        let value = self
            .interval(key)?
            .ok_or_else(|| ConfigError::missing(self.label(), key))?;
        if value <= Duration::zero() {
            return Err(ConfigError::invalid(self.label(), key, "must be > 0"));
        }
        Ok(value)
    }

    fn fields(&self) -> ConfigResult<Vec<FieldDescriptor>> {
        let raw_count = self.required("FIELD_COUNT")?;
        let count: usize = raw_count.parse().map_err(|_| {
            ConfigError::invalid(self.label(), "FIELD_COUNT", format!("not a count: {raw_count}"))
        })?;
        if count == 0 {
            return Err(ConfigError::invalid(self.label(), "FIELD_COUNT", "must be >= 1"));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(count);
        for i in 1..=count {
            let name = self.required(&format!("FIELD_{i}_NAME"))?;
            if !seen.insert(name.clone()) {
                return Err(ConfigError::inconsistent(
                    self.label(),
                    format!("field {name} listed twice"),
                ));
            }
            let levels_key = format!("FIELD_{i}_LEVELS");
            let levels = match self.get(&levels_key) {
                None => -1,
                Some(raw) => raw.parse::<i32>().map_err(|_| {
                    ConfigError::invalid(self.label(), &levels_key, format!("not an integer: {raw}"))
                })?,
            };
            if levels == 0 || levels < -1 {
                return Err(ConfigError::invalid(
                    self.label(),
                    &levels_key,
                    "must be -1 (single level) or a positive level count",
                ));
            }

            fields.push(FieldDescriptor {
                units: self.get(&format!("FIELD_{i}_UNITS")).unwrap_or_default(),
                long_name: self
                    .get(&format!("FIELD_{i}_LONGNAME"))
                    .unwrap_or_else(|| name.clone()),
                name,
                levels,
            });
        }
        Ok(fields)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().trim_matches('.').to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// A field carried by a stream or collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub units: String,
    pub long_name: String,
    /// Vertical-level count; `-1` for single-level (2-D) fields.
    pub levels: i32,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, units: impl Into<String>, levels: i32) -> Self {
        let name = name.into();
        Self {
            long_name: name.clone(),
            name,
            units: units.into(),
            levels,
        }
    }

    pub fn is_layered(&self) -> bool {
        self.levels > 0
    }
}

/// On-disk file flavour, which also selects the access discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileKind {
    /// Each process opens, accesses and closes the file on its own.
    #[default]
    Serial,
    /// All processes sharing the file access it collectively.
    Parallel,
}

impl FileKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "serial" | "zarr" | "netcdf" | "serial_zarr" => Some(Self::Serial),
            "parallel" | "pzarr" | "pnetcdf" | "parallel_zarr" => Some(Self::Parallel),
            _ => None,
        }
    }

    pub fn is_collective(&self) -> bool {
        matches!(self, Self::Parallel)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// How a stream turns its bracket into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationPolicy {
    /// Linear in time between the bracketing snapshots.
    #[default]
    Linear,
    /// Hold the most recent snapshot until the next one.
    Hold,
    /// Use whichever snapshot is closer in time.
    Nearest,
}

impl InterpolationPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" | "interpolate" => Some(Self::Linear),
            "hold" | "none" | "previous" => Some(Self::Hold),
            "nearest" => Some(Self::Nearest),
            _ => None,
        }
    }
}

/// Statistic accumulated between two flushes of an output collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Statistic {
    Average,
    Maximum,
    Minimum,
    /// Last deposited value, for collections without statistics.
    Instant,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "avg",
            Self::Maximum => "max",
            Self::Minimum => "min",
            Self::Instant => "inst",
        }
    }

    /// Name of the on-disk variable holding this statistic of `field`.
    pub fn variable_name(&self, field: &str) -> String {
        match self {
            Self::Instant => field.to_string(),
            other => format!("{}_{}", field, other.as_str()),
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct InputStreamDescriptor {
    pub name: String,
    pub datafile: FilenameTemplate,
    pub file_kind: FileKind,
    pub mode: AccessMode,
    /// Validity window `[start, end]`.
    pub window: TimeRange,
    /// Nominal spacing of snapshots.
    pub frequency: Duration,
    /// Forced reload interval; zero means load once.
    pub refresh: Duration,
    /// Valid-year range when the dataset is a repeating annual cycle.
    pub climatology: Option<ValidYears>,
    pub extrapolate: bool,
    pub interpolation: InterpolationPolicy,
    pub fields: Vec<FieldDescriptor>,
}

impl InputStreamDescriptor {
    pub fn from_record(record: &ConfigRecord) -> ConfigResult<Self> {
        let name = record.required("NAME")?;
        let datafile = FilenameTemplate::new(record.required("DATAFILE")?);

        let file_kind = match record.get("FILETYPE") {
            None => FileKind::default(),
            Some(raw) => FileKind::from_str(&raw).ok_or_else(|| {
                ConfigError::invalid(&name, "FILETYPE", format!("unknown file type: {raw}"))
            })?,
        };

        if let Some(mode) = record.get("MODE") {
            if !mode.eq_ignore_ascii_case("read") && !mode.eq_ignore_ascii_case("r") {
                return Err(ConfigError::invalid(
                    &name,
                    "MODE",
                    format!("input streams are read-only, got {mode}"),
                ));
            }
        }

        let start = record.time("START_TIME")?;
        let end = record.time("END_TIME")?;
        if end < start {
            return Err(ConfigError::inconsistent(&name, "END_TIME precedes START_TIME"));
        }

        let frequency = record.positive_interval("TIME_FREQUENCY")?;
        let refresh = record.interval("REFRESH")?.unwrap_or_else(Duration::zero);

        let climatology = if record.bool_or("CLIMATOLOGY", false)? {
            let raw = record
                .get("VALID_YEARS")
                .ok_or_else(|| ConfigError::missing(&name, "VALID_YEARS"))?;
            let years = ValidYears::parse(&raw).ok_or_else(|| {
                ConfigError::invalid(&name, "VALID_YEARS", format!("expected FIRST-LAST, got {raw}"))
            })?;
            if years.last < years.first {
                return Err(ConfigError::invalid(&name, "VALID_YEARS", "range is empty"));
            }
            Some(years)
        } else {
            None
        };

        let interpolation = match record.get("INTERPOLATION") {
            None => InterpolationPolicy::default(),
            Some(raw) => InterpolationPolicy::from_str(&raw).ok_or_else(|| {
                ConfigError::invalid(&name, "INTERPOLATION", format!("unknown policy: {raw}"))
            })?,
        };

        Ok(Self {
            datafile,
            file_kind,
            mode: AccessMode::Read,
            window: TimeRange::new(start, end),
            frequency,
            refresh,
            climatology,
            extrapolate: record.bool_or("EXTRAPOLATE", false)?,
            interpolation,
            fields: record.fields()?,
            name,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A validated output collection.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputCollectionDescriptor {
    pub name: String,
    pub filename: FilenameTemplate,
    pub file_kind: FileKind,
    pub frequency: Duration,
    pub do_avg: bool,
    pub do_max: bool,
    pub do_min: bool,
    pub fields: Vec<FieldDescriptor>,
}

impl OutputCollectionDescriptor {
    pub fn from_record(record: &ConfigRecord) -> ConfigResult<Self> {
        let name = record.required("NAME")?;
        let filename = FilenameTemplate::new(record.required("FILENAME_BASE")?);
        let file_kind = match record.get("FILETYPE") {
            None => FileKind::default(),
            Some(raw) => FileKind::from_str(&raw).ok_or_else(|| {
                ConfigError::invalid(&name, "FILETYPE", format!("unknown file type: {raw}"))
            })?,
        };

        Ok(Self {
            filename,
            file_kind,
            frequency: record.positive_interval("OUTPUT_FREQUENCY")?,
            do_avg: record.bool_or("DO_AVG", false)?,
            do_max: record.bool_or("DO_MAX", false)?,
            do_min: record.bool_or("DO_MIN", false)?,
            fields: record.fields()?,
            name,
        })
    }

    /// Statistics to accumulate; a snapshot collection yields `[Instant]`.
    pub fn statistics(&self) -> Vec<Statistic> {
        let mut stats = Vec::with_capacity(3);
        if self.do_avg {
            stats.push(Statistic::Average);
        }
        if self.do_max {
            stats.push(Statistic::Maximum);
        }
        if self.do_min {
            stats.push(Statistic::Minimum);
        }
        if stats.is_empty() {
            stats.push(Statistic::Instant);
        }
        stats
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Every stream and collection of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    pub streams: Vec<InputStreamDescriptor>,
    pub collections: Vec<OutputCollectionDescriptor>,
}

impl Registry {
    /// Parse and validate all records; the first invalid record aborts.
    pub fn from_records(
        stream_records: &[ConfigRecord],
        collection_records: &[ConfigRecord],
    ) -> ConfigResult<Self> {
        let streams = stream_records
            .iter()
            .map(InputStreamDescriptor::from_record)
            .collect::<ConfigResult<Vec<_>>>()?;
        let collections = collection_records
            .iter()
            .map(OutputCollectionDescriptor::from_record)
            .collect::<ConfigResult<Vec<_>>>()?;

        let registry = Self {
            streams,
            collections,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Check names are unique within streams and within collections.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for stream in &self.streams {
            if !names.insert(stream.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "stream",
                    name: stream.name.clone(),
                });
            }
        }

        names.clear();
        for collection in &self.collections {
            if !names.insert(collection.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "collection",
                    name: collection.name.clone(),
                });
            }
        }
        Ok(())
    }
}
