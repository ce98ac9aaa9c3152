pub mod attendees;
pub mod cleanup;
pub mod config;
pub mod dates;
pub mod db;
pub mod dedup;
pub mod geocode;
pub mod http;
pub mod locale;
pub mod models;
pub mod reconcile;
pub mod robots;
pub mod scraping;
pub mod utils;

use chrono::{DateTime, Utc};

use db::EventStore;
use geocode::{GeocodeBackend, Geocoder};
use models::IngestionSummary;
use reconcile::GeocodedCandidate;
use scraping::{FetchContext, Horizon, SourceAdapter};

/// One ingestion run: fetch every adapter in order, drop in-batch
/// duplicates, geocode what is left and reconcile it into the store.
pub async fn run_ingestion<B, S>(
    adapters: &[Box<dyn SourceAdapter>],
    ctx: &FetchContext<'_>,
    geocoder: &mut Geocoder<B>,
    store: &S,
    horizon: Horizon,
    now: DateTime<Utc>,
) -> IngestionSummary
where
    B: GeocodeBackend,
    S: EventStore + ?Sized,
{
    let fetched = scraping::run_all(adapters, ctx, horizon).await;
    let candidates = fetched.len();
    let unique = dedup::dedupe(fetched);
    let duplicates_removed = candidates - unique.len();
    tracing::info!(candidates, duplicates_removed, "candidates collected");

    let mut batch = Vec::with_capacity(unique.len());
    let mut geocoded = 0;
    for mut event in unique {
        let point = geocoder.geocode_candidate(&mut event).await;
        if point.is_some() {
            geocoded += 1;
        }
        batch.push(GeocodedCandidate { event, point });
    }

    let reconcile = reconcile::reconcile(store, batch, now);
    IngestionSummary {
        candidates,
        duplicates_removed,
        geocoded,
        reconcile,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::db::SqliteStore;
    use crate::geocode::{GeocodeCache, GeocodeError, GeocodeHit};
    use crate::http::{HttpClient, HttpError};
    use crate::models::fixtures::{at, candidate};
    use crate::models::CandidateEvent;
    use crate::robots::{RobotsGuard, RobotsRules};

    struct OneShot;

    #[async_trait]
    impl SourceAdapter for OneShot {
        fn source_id(&self) -> &'static str {
            "one-shot"
        }
        fn source_name(&self) -> &'static str {
            "One shot"
        }
        fn source_url(&self) -> &'static str {
            "https://source.example/list"
        }
        fn country(&self) -> &'static str {
            "DE"
        }
        async fn fetch(&self, _http: &HttpClient, _horizon: Horizon) -> anyhow::Result<Vec<CandidateEvent>> {
            let event = candidate("u", "Demo", Some(at(2025, 10, 23, 14, 0)));
            Ok(vec![event.clone(), event])
        }
    }

    struct Offline;

    #[async_trait]
    impl GeocodeBackend for Offline {
        async fn search(&self, _query: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
            Err(GeocodeError::Http(HttpError::Url("offline".into())))
        }
    }

    #[tokio::test]
    async fn failed_geocoding_still_inserts_verified_record() {
        let http = HttpClient::new("ProtestPipeline/0.1", Duration::from_secs(2)).unwrap();
        let guard = RobotsGuard::new(Duration::from_secs(3600));
        guard.seed("https://source.example/", RobotsRules::permissive());
        let ctx = FetchContext {
            http: &http,
            guard: &guard,
        };
        let mut geocoder = Geocoder::new(Offline, GeocodeCache::in_memory());
        let store = SqliteStore::open_in_memory().unwrap();
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(OneShot)];
        let now = at(2025, 10, 14, 9, 0);

        let summary = run_ingestion(
            &adapters,
            &ctx,
            &mut geocoder,
            &store,
            Horizon::new(now, 40),
            now,
        )
        .await;
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.geocoded, 0);
        assert_eq!(summary.reconcile.inserted, 1);

        let record = store
            .find_by_url_and_start("u", Some(at(2025, 10, 23, 14, 0)))
            .unwrap()
            .expect("inserted record");
        assert_eq!(record.event.title, "Demo");
        assert!(record.point.is_none());
        assert!(record.verified);

        let again = run_ingestion(
            &adapters,
            &ctx,
            &mut geocoder,
            &store,
            Horizon::new(now, 40),
            at(2025, 10, 15, 9, 0),
        )
        .await;
        assert_eq!((again.reconcile.inserted, again.reconcile.updated), (0, 1));
    }

    #[test]
    fn summary_serializes_camel_case_flat() {
        let summary = IngestionSummary {
            candidates: 3,
            duplicates_removed: 1,
            geocoded: 2,
            ..IngestionSummary::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["duplicatesRemoved"], 1);
        assert_eq!(value["inserted"], 0);
    }
}
