use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::db::{EventStore, SimilarityKey, StoreResult};
use crate::models::{CleanupSummary, EventId, PersistedEvent, RecordState};

#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    pub dry_run: bool,
    pub window_days: i64,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            window_days: 3,
        }
    }
}

/// Collapses persisted duplicates that slipped past in-batch dedup.
///
/// Records are visited oldest first, so the first member of a group is the
/// survivor. Fields that moderators edited on a duplicate are copied onto the
/// survivor before the duplicate is removed. Conflicting edits to the same
/// field resolve in favour of the most recently updated duplicate.
pub fn cleanup_duplicates<S: EventStore + ?Sized>(
    store: &S,
    options: CleanupOptions,
    now: DateTime<Utc>,
) -> StoreResult<CleanupSummary> {
    let mut summary = CleanupSummary {
        dry_run: options.dry_run,
        ..CleanupSummary::default()
    };
    let window = Duration::days(options.window_days);
    let mut processed: HashSet<EventId> = HashSet::new();

    for survivor in store.cleanup_scan()? {
        if !processed.insert(survivor.id) {
            continue;
        }
        summary.total_checked += 1;

        let key = SimilarityKey::of(&survivor.event);
        let similar = match store.find_similar(&key, survivor.event.start, window) {
            Ok(similar) => similar,
            Err(err) => {
                summary.errors += 1;
                tracing::warn!(id = %survivor.id, "similar-record search failed: {err}");
                continue;
            }
        };
        let mut duplicates: Vec<PersistedEvent> = similar
            .into_iter()
            .filter(|other| other.id != survivor.id && !processed.contains(&other.id))
            .collect();
        if duplicates.is_empty() {
            continue;
        }
        for duplicate in &duplicates {
            processed.insert(duplicate.id);
        }
        summary.duplicates_found += duplicates.len();

        if options.dry_run {
            tracing::info!(
                survivor = %survivor.id,
                duplicates = ?duplicates.iter().map(|d| d.id.0).collect::<Vec<_>>(),
                "would merge duplicate group"
            );
            continue;
        }

        duplicates.sort_by_key(|d| (d.updated_at, d.id));
        merge_group(store, survivor, duplicates, now, &mut summary);
    }

    tracing::info!(
        checked = summary.total_checked,
        found = summary.duplicates_found,
        deleted = summary.events_deleted,
        errors = summary.errors,
        dry_run = summary.dry_run,
        "duplicate cleanup finished"
    );
    Ok(summary)
}

fn merge_group<S: EventStore + ?Sized>(
    store: &S,
    mut survivor: PersistedEvent,
    duplicates: Vec<PersistedEvent>,
    now: DateTime<Utc>,
    summary: &mut CleanupSummary,
) {
    let mut edited: BTreeSet<String> = survivor.state.edited_fields().cloned().unwrap_or_default();
    let mut changed = false;
    for duplicate in &duplicates {
        let Some(fields) = duplicate.state.edited_fields() else {
            continue;
        };
        for field in fields {
            let copied = duplicate
                .field_value(field)
                .and_then(|value| survivor.set_field(field, value));
            match copied {
                Ok(()) => {
                    edited.insert(field.clone());
                    changed = true;
                }
                Err(err) => {
                    tracing::warn!(id = %duplicate.id, field = field.as_str(), "skipping edited field: {err}");
                }
            }
        }
    }

    if changed {
        survivor.state = RecordState::Edited { fields: edited };
        survivor.updated_at = now;
        // The survivor must hold the merged edits before any duplicate goes.
        if let Err(err) = store.update(&survivor) {
            summary.errors += 1;
            tracing::warn!(id = %survivor.id, "failed to save merged survivor: {err}");
            return;
        }
    }

    for duplicate in duplicates {
        match store.delete(duplicate.id) {
            Ok(()) => {
                summary.events_deleted += 1;
                tracing::debug!(survivor = %survivor.id, deleted = %duplicate.id, "removed duplicate");
            }
            Err(err) => {
                summary.errors += 1;
                tracing::warn!(id = %duplicate.id, "failed to delete duplicate: {err}");
            }
        }
    }
}
