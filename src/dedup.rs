use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::CandidateEvent;

/// Drops candidates that repeat an earlier one's URL and start instant.
///
/// Order is preserved and the first occurrence wins; fields are never merged.
/// Candidates without a URL have nothing to compare on and are all kept.
pub fn dedupe(candidates: Vec<CandidateEvent>) -> Vec<CandidateEvent> {
    let mut seen: HashSet<(String, Option<DateTime<Utc>>)> = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| {
            let url = candidate.url.trim();
            if url.is_empty() {
                return true;
            }
            let fresh = seen.insert((url.to_string(), candidate.start));
            if !fresh {
                tracing::debug!(
                    source = candidate.source.as_str(),
                    url,
                    "dropping in-batch duplicate"
                );
            }
            fresh
        })
        .collect()
}
