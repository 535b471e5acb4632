//! Builders shared by unit tests.

use crate::types::{CandidateEvent, EventPolicy, PriceRange, StoredEvent, Venue, VenueRef};
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeSet;

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap()
}

pub fn candidate(title: &str, day: &str, at: Option<&str>) -> CandidateEvent {
    CandidateEvent {
        title: title.to_string(),
        start_date: date(day),
        start_time: at.map(time),
        end_date: None,
        end_time: None,
        venue: VenueRef::Name("The Hall".to_string()),
        description: None,
        category: None,
        tags: BTreeSet::new(),
        price: PriceRange::default(),
        source_url: None,
        ticket_url: None,
        detail_url: None,
        images: vec![],
        artists: vec![],
        confidence: 1.0,
        extraction_version: "v1".to_string(),
        policy: EventPolicy::default(),
        cancelled: false,
        source_name: "test".to_string(),
    }
}

pub fn stored(candidate: &CandidateEvent, venue: &Venue) -> StoredEvent {
    StoredEvent::from_candidate(candidate, venue)
}
