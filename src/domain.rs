use std::fmt;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Path-like key addressing one object inside the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment, or the whole key when it has no separator.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    /// Rows carry a complete remote link.
    FlatLink,
    /// Rows carry owner, timestamp and file name.
    Structured,
}

impl Collection {
    pub fn for_bucket(bucket: &str, flat_link_buckets: &[String]) -> Self {
        let bucket = bucket.trim();
        if flat_link_buckets
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(bucket))
        {
            Collection::FlatLink
        } else {
            Collection::Structured
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Collection::FlatLink => "flat-link",
            Collection::Structured => "structured",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Link(String),
    Structured {
        owner_uid: String,
        recorded_at: NaiveDateTime,
        file_name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarkerPolicy {
    /// Links without the marker are rejected.
    #[default]
    Strict,
    /// Links without the marker are sliced as if the marker sat at index -1.
    Permissive,
}

/// Inclusive recording-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    from: NaiveDateTime,
    to: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(from: NaiveDateTime, to: NaiveDateTime) -> Result<Self, HarvestError> {
        if from > to {
            return Err(HarvestError::InvalidTimeWindow(format!(
                "start {} is after end {}",
                from.format(TIMESTAMP_FORMAT),
                to.format(TIMESTAMP_FORMAT)
            )));
        }
        Ok(Self { from, to })
    }

    pub fn parse(from: &str, to: &str) -> Result<Self, HarvestError> {
        Self::new(parse_timestamp(from)?, parse_timestamp(to)?)
    }

    pub fn from(&self) -> NaiveDateTime {
        self.from
    }

    pub fn to(&self) -> NaiveDateTime {
        self.to
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.from <= at && at <= self.to
    }
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, HarvestError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map_err(|err| HarvestError::InvalidTimeWindow(format!("{value:?}: {err}")))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilters {
    pub customer_id: Option<i64>,
    pub device_id: Option<i64>,
}

impl RecordFilters {
    /// Zero means "no filter" on the command line.
    pub fn from_flags(customer_id: i64, device_id: i64) -> Self {
        Self {
            customer_id: (customer_id != 0).then_some(customer_id),
            device_id: (device_id != 0).then_some(device_id),
        }
    }
}
