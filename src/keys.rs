use chrono::NaiveDateTime;

use crate::domain::{CatalogRecord, Collection, MarkerPolicy, ObjectKey};
use crate::error::HarvestError;

pub const DEFAULT_LINK_MARKER: &str = ".com";
pub const DEFAULT_KEY_PREFIX: &str = "clanz-3reality";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScheme {
    /// Scheme A: slice the key out of a full remote link.
    FlatLink { marker: String, policy: MarkerPolicy },
    /// Scheme B: `{prefix}-{owner}/{YYYY/MM/DD}/{HH}/{file}`.
    Structured { prefix: String },
}

impl KeyScheme {
    pub fn collection(&self) -> Collection {
        match self {
            KeyScheme::FlatLink { .. } => Collection::FlatLink,
            KeyScheme::Structured { .. } => Collection::Structured,
        }
    }
}

/// Maps catalog rows to object keys under one scheme chosen per batch.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    scheme: KeyScheme,
}

impl KeyResolver {
    pub fn new(scheme: KeyScheme) -> Self {
        Self { scheme }
    }

    pub fn for_collection(
        collection: Collection,
        marker: &str,
        policy: MarkerPolicy,
        prefix: &str,
    ) -> Self {
        let scheme = match collection {
            Collection::FlatLink => KeyScheme::FlatLink {
                marker: marker.to_string(),
                policy,
            },
            Collection::Structured => KeyScheme::Structured {
                prefix: prefix.to_string(),
            },
        };
        Self::new(scheme)
    }

    pub fn scheme(&self) -> &KeyScheme {
        &self.scheme
    }

    /// One key per record, in input order.
    pub fn resolve(&self, records: &[CatalogRecord]) -> Result<Vec<ObjectKey>, HarvestError> {
        records
            .iter()
            .map(|record| self.resolve_one(record))
            .collect()
    }

    fn resolve_one(&self, record: &CatalogRecord) -> Result<ObjectKey, HarvestError> {
        match (&self.scheme, record) {
            (KeyScheme::FlatLink { marker, policy }, CatalogRecord::Link(link)) => {
                key_from_link(link, marker, *policy)
            }
            (
                KeyScheme::Structured { prefix },
                CatalogRecord::Structured {
                    owner_uid,
                    recorded_at,
                    file_name,
                },
            ) => Ok(key_from_parts(prefix, owner_uid, *recorded_at, file_name)),
            (scheme, _) => Err(HarvestError::RecordShape {
                expected: scheme.collection().label(),
            }),
        }
    }
}

/// Scheme A. The key begins one separator past the end of the first `marker`.
pub fn key_from_link(
    link: &str,
    marker: &str,
    policy: MarkerPolicy,
) -> Result<ObjectKey, HarvestError> {
    let missing = || HarvestError::MissingMarker {
        link: link.to_string(),
        marker: marker.to_string(),
    };
    match link.find(marker) {
        Some(index) => {
            let start = index + marker.len() + 1;
            match link.get(start..) {
                Some(rest) if !rest.is_empty() => Ok(ObjectKey::new(rest)),
                _ => match policy {
                    MarkerPolicy::Strict => Err(missing()),
                    MarkerPolicy::Permissive => Ok(ObjectKey::new("")),
                },
            }
        }
        None => match policy {
            MarkerPolicy::Strict => Err(missing()),
            // index -1 plus the skip lands on byte `marker.len()`
            MarkerPolicy::Permissive => Ok(ObjectKey::new(
                link.get(marker.len()..).unwrap_or_default(),
            )),
        },
    }
}

/// Scheme B.
pub fn key_from_parts(
    prefix: &str,
    owner_uid: &str,
    recorded_at: NaiveDateTime,
    file_name: &str,
) -> ObjectKey {
    ObjectKey::new(format!(
        "{prefix}-{owner_uid}/{}/{}/{file_name}",
        recorded_at.format("%Y/%m/%d"),
        recorded_at.format("%H"),
    ))
}
