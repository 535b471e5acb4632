//! Finds the stored event a fresh candidate describes.

use crate::dedup::time_key;
use crate::error::Result;
use crate::fingerprint::headliner;
use crate::storage::Storage;
use crate::types::{CandidateEvent, StoredEvent};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVia {
    Hash,
    /// Same venue and date with an agreeing headliner; absorbs phrasing drift between crawls.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedEvent {
    pub event: StoredEvent,
    pub via: MatchVia,
}

/// Same headliner, and the same HH:MM whenever both sides carry a time.
pub fn fallback_matches(stored: &StoredEvent, candidate: &CandidateEvent) -> bool {
    if stored.start_date != candidate.start_date {
        return false;
    }
    if headliner(&stored.title) != headliner(&candidate.title) {
        return false;
    }
    match (stored.start_time, candidate.start_time) {
        (Some(a), Some(b)) => time_key(Some(a)) == time_key(Some(b)),
        _ => true,
    }
}

pub async fn find_existing(
    storage: &dyn Storage,
    candidate: &CandidateEvent,
    venue_id: Uuid,
    content_hash: &str,
) -> Result<Option<MatchedEvent>> {
    if let Some(event) = storage.find_event_by_hash(content_hash).await? {
        return Ok(Some(MatchedEvent {
            event,
            via: MatchVia::Hash,
        }));
    }

    let same_day = storage
        .find_events_by_venue_date(venue_id, candidate.start_date)
        .await?;
    // Prefer roots, then the oldest row
    let best = same_day
        .into_iter()
        .filter(|stored| fallback_matches(stored, candidate))
        .min_by_key(|stored| (!stored.canonical.is_root(), stored.created_at, stored.id));

    if let Some(event) = &best {
        debug!(
            event_id = %event.id,
            stored_title = %event.title,
            candidate_title = %candidate.title,
            "Fallback match on headliner"
        );
    }
    Ok(best.map(|event| MatchedEvent {
        event,
        via: MatchVia::Fallback,
    }))
}
