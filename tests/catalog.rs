use std::cell::RefCell;

use assert_matches::assert_matches;

use clip_harvest::catalog::{Catalog, resolve_keys};
use clip_harvest::domain::{CatalogRecord, Collection, MarkerPolicy, RecordFilters, TimeWindow};
use clip_harvest::error::HarvestError;
use clip_harvest::keys::KeyResolver;

struct MockCatalog {
    links: Vec<&'static str>,
    requested: RefCell<Option<(Collection, RecordFilters)>>,
}

impl Catalog for MockCatalog {
    fn resolve_records(
        &self,
        collection: Collection,
        _window: &TimeWindow,
        filters: &RecordFilters,
    ) -> Result<Vec<CatalogRecord>, HarvestError> {
        *self.requested.borrow_mut() = Some((collection, *filters));
        Ok(self
            .links
            .iter()
            .map(|link| CatalogRecord::Link(link.to_string()))
            .collect())
    }
}

struct DownCatalog;

impl Catalog for DownCatalog {
    fn resolve_records(
        &self,
        _collection: Collection,
        _window: &TimeWindow,
        _filters: &RecordFilters,
    ) -> Result<Vec<CatalogRecord>, HarvestError> {
        Err(HarvestError::CatalogConnect("connection refused".to_string()))
    }
}

fn window() -> TimeWindow {
    TimeWindow::parse("2022-05-22 21:30:00", "2022-05-22 22:30:00").unwrap()
}

fn flat_resolver() -> KeyResolver {
    KeyResolver::for_collection(Collection::FlatLink, ".com", MarkerPolicy::Strict, "unused")
}

#[test]
fn resolves_keys_for_the_resolver_collection() {
    let catalog = MockCatalog {
        links: vec![
            "https://clanz-uploads-ogg.s3.amazonaws.com/2022/05/22/a.ogg",
            "https://clanz-uploads-ogg.s3.amazonaws.com/2022/05/22/b.ogg",
        ],
        requested: RefCell::new(None),
    };
    let filters = RecordFilters::from_flags(0, 9);

    let keys = resolve_keys(&catalog, &flat_resolver(), &window(), &filters).unwrap();

    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].as_str(), "2022/05/22/a.ogg");
    assert_eq!(
        *catalog.requested.borrow(),
        Some((Collection::FlatLink, filters))
    );
}

#[test]
fn malformed_link_fails_resolution_when_strict() {
    let catalog = MockCatalog {
        links: vec!["https://storage.example.net/a.ogg"],
        requested: RefCell::new(None),
    };
    let err = resolve_keys(&catalog, &flat_resolver(), &window(), &RecordFilters::default())
        .unwrap_err();
    assert_matches!(err, HarvestError::MissingMarker { .. });
}

#[test]
fn catalog_failure_is_fatal() {
    let err = resolve_keys(&DownCatalog, &flat_resolver(), &window(), &RecordFilters::default())
        .unwrap_err();
    assert_matches!(err, HarvestError::CatalogConnect(_));
}
