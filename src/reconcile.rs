use chrono::{DateTime, Utc};

use crate::db::{EventStore, StoreResult};
use crate::models::{CandidateEvent, GeoPoint, NewEvent, ReconcileSummary};

#[derive(Debug, Clone)]
pub struct GeocodedCandidate {
    pub event: CandidateEvent,
    pub point: Option<GeoPoint>,
}

enum Outcome {
    Inserted,
    Updated,
    Skipped,
}

/// Merges one run's candidates into the store, one record at a time.
///
/// New (url, start) pairs are inserted as verified; untouched existing
/// records are refreshed; edited, deleted or manual records are left alone.
pub fn reconcile<S: EventStore + ?Sized>(
    store: &S,
    batch: Vec<GeocodedCandidate>,
    now: DateTime<Utc>,
) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();
    for candidate in batch {
        let url = candidate.event.url.clone();
        match reconcile_one(store, candidate, now) {
            Ok(Outcome::Inserted) => summary.inserted += 1,
            Ok(Outcome::Updated) => summary.updated += 1,
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                summary.errored += 1;
                tracing::warn!(url = url.as_str(), "failed to reconcile candidate: {err}");
            }
        }
    }
    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        errored = summary.errored,
        "reconciliation finished"
    );
    summary
}

fn reconcile_one<S: EventStore + ?Sized>(
    store: &S,
    candidate: GeocodedCandidate,
    now: DateTime<Utc>,
) -> StoreResult<Outcome> {
    let GeocodedCandidate { event, point } = candidate;
    let existing = store.find_by_url_and_start(&event.url, event.start)?;
    let Some(mut record) = existing else {
        store.insert(&NewEvent::scraped(event, point, now))?;
        return Ok(Outcome::Inserted);
    };

    if !record.state.accepts_ingestion() {
        tracing::debug!(
            id = %record.id,
            state = record.state.label(),
            "leaving curated record untouched"
        );
        return Ok(Outcome::Skipped);
    }

    record.event = event;
    // A failed lookup this run does not erase coordinates found earlier.
    if point.is_some() {
        record.point = point;
    }
    record.verified = true;
    record.updated_at = now;
    store.update(&record)?;
    Ok(Outcome::Updated)
}
