//! Catalog lookup: which recordings fall inside a time window.
//!
//! The catalog is a PostgreSQL database with two tables, one per collection:
//! `cl_full_segments` rows carry a ready-made link, `cl_tagging_results` rows
//! carry the device, timestamp and file name the key is assembled from.

use std::time::Duration;

use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Postgres, QueryBuilder};
use tokio::runtime::Runtime;

use crate::config::DatabaseSettings;
use crate::domain::{CatalogRecord, Collection, ObjectKey, RecordFilters, TimeWindow};
use crate::error::HarvestError;
use crate::keys::KeyResolver;

const FULL_SEGMENTS: &str = "cl_full_segments";
const TAGGING_RESULTS: &str = "cl_tagging_results";

pub trait Catalog {
    fn resolve_records(
        &self,
        collection: Collection,
        window: &TimeWindow,
        filters: &RecordFilters,
    ) -> Result<Vec<CatalogRecord>, HarvestError>;
}

/// Queries the catalog and derives keys with `resolver`'s scheme.
pub fn resolve_keys(
    catalog: &dyn Catalog,
    resolver: &KeyResolver,
    window: &TimeWindow,
    filters: &RecordFilters,
) -> Result<Vec<ObjectKey>, HarvestError> {
    let collection = resolver.scheme().collection();
    let records = catalog.resolve_records(collection, window, filters)?;
    tracing::info!(
        collection = %collection,
        records = records.len(),
        "catalog resolved"
    );
    resolver.resolve(&records)
}

/// Builds the catalog query for `collection`. Bounds are inclusive.
///
/// Filter columns stay unqualified so that, on the joined query, the database
/// resolves them against whichever table owns them.
pub fn build_query(
    collection: Collection,
    window: &TimeWindow,
    filters: &RecordFilters,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = match collection {
        Collection::FlatLink => QueryBuilder::new(format!(
            "SELECT {FULL_SEGMENTS}.s3_link FROM {FULL_SEGMENTS}"
        )),
        Collection::Structured => QueryBuilder::new(format!(
            "SELECT file_name, cl_devices.uid, recording_ts FROM {TAGGING_RESULTS} \
             INNER JOIN cl_devices ON cl_devices.id = {TAGGING_RESULTS}.device_id"
        )),
    };

    builder
        .push(" WHERE recording_ts BETWEEN ")
        .push_bind(window.from())
        .push(" AND ")
        .push_bind(window.to());
    if let Some(device_id) = filters.device_id {
        builder.push(" AND device_id = ").push_bind(device_id);
    }
    if let Some(customer_id) = filters.customer_id {
        builder.push(" AND customer_id = ").push_bind(customer_id);
    }
    builder.push(" ORDER BY recording_ts");
    builder
}

#[derive(sqlx::FromRow)]
struct TaggedClipRow {
    file_name: String,
    uid: String,
    recording_ts: NaiveDateTime,
}

impl From<TaggedClipRow> for CatalogRecord {
    fn from(row: TaggedClipRow) -> Self {
        CatalogRecord::Structured {
            owner_uid: row.uid,
            recorded_at: row.recording_ts,
            file_name: row.file_name,
        }
    }
}

/// Blocking facade over a single-connection sqlx pool.
pub struct PgCatalog {
    runtime: Runtime,
    pool: PgPool,
}

impl PgCatalog {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self, HarvestError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| HarvestError::CatalogConnect(err.to_string()))?;

        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.dbname)
            .ssl_mode(PgSslMode::Disable);
        if let Some(user) = settings.user.as_deref() {
            options = options.username(user);
        }
        if let Some(password) = settings.password.as_deref() {
            options = options.password(password);
        }

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options),
            )
            .map_err(|err| HarvestError::CatalogConnect(err.to_string()))?;
        tracing::debug!(host = %settings.host, port = settings.port, "connected to catalog");

        Ok(Self { runtime, pool })
    }
}

impl Catalog for PgCatalog {
    fn resolve_records(
        &self,
        collection: Collection,
        window: &TimeWindow,
        filters: &RecordFilters,
    ) -> Result<Vec<CatalogRecord>, HarvestError> {
        let mut builder = build_query(collection, window, filters);
        tracing::debug!(sql = builder.sql(), "querying catalog");
        self.runtime
            .block_on(async {
                match collection {
                    Collection::FlatLink => {
                        let links = builder
                            .build_query_scalar::<Option<String>>()
                            .fetch_all(&self.pool)
                            .await?;
                        let total = links.len();
                        let records = links
                            .into_iter()
                            .flatten()
                            .map(CatalogRecord::Link)
                            .collect::<Vec<_>>();
                        if records.len() < total {
                            tracing::warn!(
                                skipped = total - records.len(),
                                "segments without a link were skipped"
                            );
                        }
                        Ok(records)
                    }
                    Collection::Structured => {
                        let rows = builder
                            .build_query_as::<TaggedClipRow>()
                            .fetch_all(&self.pool)
                            .await?;
                        Ok(rows.into_iter().map(CatalogRecord::from).collect())
                    }
                }
            })
            .map_err(|err: sqlx::Error| HarvestError::CatalogQuery(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> TimeWindow {
        TimeWindow::parse("2022-05-22 21:30:00", "2022-05-22 22:30:00").unwrap()
    }

    #[test]
    fn flat_link_query_without_filters() {
        let builder = build_query(Collection::FlatLink, &window(), &RecordFilters::default());
        assert_eq!(
            builder.sql(),
            "SELECT cl_full_segments.s3_link FROM cl_full_segments \
             WHERE recording_ts BETWEEN $1 AND $2 \
             ORDER BY recording_ts"
        );
    }

    #[test]
    fn structured_query_with_both_filters() {
        let filters = RecordFilters::from_flags(3, 42);
        let builder = build_query(Collection::Structured, &window(), &filters);
        assert_eq!(
            builder.sql(),
            "SELECT file_name, cl_devices.uid, recording_ts FROM cl_tagging_results \
             INNER JOIN cl_devices ON cl_devices.id = cl_tagging_results.device_id \
             WHERE recording_ts BETWEEN $1 AND $2 AND device_id = $3 AND customer_id = $4 \
             ORDER BY recording_ts"
        );
    }

    #[test]
    fn customer_filter_alone_takes_third_parameter() {
        let filters = RecordFilters::from_flags(3, 0);
        let builder = build_query(Collection::FlatLink, &window(), &filters);
        assert!(builder.sql().contains("AND customer_id = $3"));
        assert!(!builder.sql().contains("device_id"));
    }
}
