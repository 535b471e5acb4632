//! Source record → Candidate Event.
//!
//! Records without a title or a resolvable start date are dropped and counted by
//! the caller; they are never errors.

use crate::constants::{CANCELLED_STATUSES, DEFAULT_CONFIDENCE};
use crate::types::{
    AgeRestriction, ArtistCredit, ArtistInput, CandidateEvent, EventPolicy, ImageRef,
    PriceRange, SourceRecord, TicketStatus, VenueRef,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

static CLOCK_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2})(?::(\d{2}))?(?::\d{2})?\s*(a\.?m\.?|p\.?m\.?)?\s*$")
        .expect("valid clock time pattern")
});

static PRICE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d{1,2})?").expect("valid price pattern"));

static MINIMUM_AGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2})\s*\+").expect("valid age pattern"));

/// Why a source record did not become a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingTitle,
    MissingStartDate,
    UnparseableStartDate(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingTitle => write!(f, "missing title"),
            DropReason::MissingStartDate => write!(f, "missing start date"),
            DropReason::UnparseableStartDate(raw) => write!(f, "unparseable start date '{}'", raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Candidate(CandidateEvent),
    Dropped(DropReason),
}

/// Maps one adapter's records into the canonical candidate shape.
#[derive(Debug, Clone)]
pub struct Normalizer {
    source_name: String,
    default_extraction_version: String,
}

impl Normalizer {
    pub fn new(source_name: impl Into<String>, default_extraction_version: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            default_extraction_version: default_extraction_version.into(),
        }
    }

    pub fn normalize(&self, record: &SourceRecord) -> Normalized {
        let Some(title) = clean_text(record.title.as_deref()) else {
            return Normalized::Dropped(DropReason::MissingTitle);
        };

        let Some(raw_date) = clean_text(record.start_date.as_deref()) else {
            return Normalized::Dropped(DropReason::MissingStartDate);
        };
        let Some((start_date, time_from_date)) = parse_date(&raw_date) else {
            return Normalized::Dropped(DropReason::UnparseableStartDate(raw_date));
        };

        let venue = if let Some(id) = record.venue_id {
            VenueRef::Id(id)
        } else if let Some(name) = clean_text(record.venue.as_deref()) {
            VenueRef::Name(name)
        } else {
            VenueRef::Unknown
        };

        let start_time = record
            .start_time
            .as_deref()
            .and_then(parse_time)
            .or(time_from_date);
        let (end_date, end_time_from_date) = match clean_text(record.end_date.as_deref()) {
            Some(raw) => match parse_date(&raw) {
                Some((d, t)) => (Some(d), t),
                None => (None, None),
            },
            None => (None, None),
        };
        let end_time = record
            .end_time
            .as_deref()
            .and_then(parse_time)
            .or(end_time_from_date);

        let confidence = match record.confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => DEFAULT_CONFIDENCE,
        };

        let candidate = CandidateEvent {
            title,
            start_date,
            start_time,
            end_date,
            end_time,
            venue,
            description: clean_block(record.description.as_deref()),
            category: clean_text(record.category.as_deref()),
            tags: clean_tags(&record.tags),
            price: parse_price(record),
            source_url: clean_text(record.source_url.as_deref()),
            ticket_url: clean_text(record.ticket_url.as_deref()),
            detail_url: clean_text(record.detail_url.as_deref()),
            images: collect_images(record, confidence),
            artists: collect_artists(&record.artists),
            confidence,
            extraction_version: clean_text(record.extraction_version.as_deref())
                .unwrap_or_else(|| self.default_extraction_version.clone()),
            policy: EventPolicy {
                age_restriction: record.age_restriction.as_deref().and_then(parse_age_restriction),
                reentry_allowed: record.reentry_allowed,
                ticket_status: record
                    .ticket_status
                    .as_deref()
                    .or(record.status.as_deref())
                    .and_then(parse_ticket_status),
            },
            cancelled: has_cancellation_marker(record),
            source_name: self.source_name.clone(),
        };

        Normalized::Candidate(candidate)
    }

    /// Normalizes a whole discovery pass, returning survivors and the drop reasons.
    pub fn normalize_batch(&self, records: &[SourceRecord]) -> (Vec<CandidateEvent>, Vec<DropReason>) {
        let mut candidates = Vec::with_capacity(records.len());
        let mut dropped = Vec::new();
        for record in records {
            match self.normalize(record) {
                Normalized::Candidate(c) => candidates.push(c),
                Normalized::Dropped(reason) => {
                    debug!(source = %self.source_name, title = ?record.title, %reason, "Dropping source record");
                    dropped.push(reason);
                }
            }
        }
        (candidates, dropped)
    }
}

/// Trim and collapse internal whitespace; empty becomes `None`.
fn clean_text(value: Option<&str>) -> Option<String> {
    let collapsed = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Trim only, so paragraph breaks in descriptions survive.
fn clean_block(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn clean_tags(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .filter_map(|t| clean_text(Some(t.as_str())))
        .map(|t| t.to_lowercase())
        .collect()
}

/// Accepts `YYYY-MM-DD`, RFC 3339 and naive ISO datetimes. Datetimes also yield a time.
pub fn parse_date(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some((date, None));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        let local = dt.naive_local();
        return Some((local.date(), to_minute(local.time())));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some((dt.date(), to_minute(dt.time())));
        }
    }
    None
}

/// Event times are kept at minute precision.
fn to_minute(time: NaiveTime) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0)
}

/// Accepts `21:00`, `21:00:00`, `9pm`, `9:30 PM`, `9 p.m.`; seconds are discarded.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let caps = CLOCK_TIME.captures(raw)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if let Some(meridiem) = caps.get(3) {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = meridiem.as_str().to_ascii_lowercase().starts_with('p');
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    } else if caps.get(2).is_none() {
        // a bare number is not a time
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_price(record: &SourceRecord) -> PriceRange {
    let mut price = PriceRange {
        min: record.price_min,
        max: record.price_max,
        note: clean_text(record.price_note.as_deref()),
    };

    if let Some(text) = clean_text(record.price.as_deref()) {
        let lowered = text.to_lowercase();
        let amounts: Vec<f64> = PRICE_AMOUNT
            .find_iter(&text)
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .collect();
        let (min, max) = if lowered.contains("free") && amounts.is_empty() {
            (Some(0.0), Some(0.0))
        } else {
            match amounts.as_slice() {
                [] => (None, None),
                [only] => (Some(*only), Some(*only)),
                [first, .., last] => (Some(first.min(*last)), Some(first.max(*last))),
            }
        };
        price.min = price.min.or(min);
        price.max = price.max.or(max);
        if min.is_none() && price.note.is_none() {
            price.note = Some(text);
        }
    }

    if let (Some(min), Some(max)) = (price.min, price.max) {
        if min > max {
            price.min = Some(max);
            price.max = Some(min);
        }
    }
    price
}

fn collect_images(record: &SourceRecord, confidence: f64) -> Vec<ImageRef> {
    let mut images: Vec<ImageRef> = Vec::new();
    let urls = record.image_url.iter().chain(record.images.iter());
    for url in urls {
        let Some(url) = clean_text(Some(url.as_str())) else { continue };
        if images.iter().any(|i| i.url == url) {
            continue;
        }
        images.push(ImageRef { url, confidence });
    }
    images
}

fn collect_artists(inputs: &[ArtistInput]) -> Vec<ArtistCredit> {
    let mut artists: Vec<ArtistCredit> = Vec::new();
    for input in inputs {
        let (name, role) = match input {
            ArtistInput::Name(name) => (name.as_str(), None),
            ArtistInput::Credit { name, role } => (name.as_str(), clean_text(role.as_deref())),
        };
        let Some(name) = clean_text(Some(name)) else { continue };
        if artists.iter().any(|a| a.name.eq_ignore_ascii_case(&name)) {
            continue;
        }
        artists.push(ArtistCredit { name, role });
    }
    artists
}

fn parse_age_restriction(raw: &str) -> Option<AgeRestriction> {
    let lowered = raw.to_lowercase();
    if lowered.contains("all ages") || lowered.contains("all-ages") {
        return Some(AgeRestriction::AllAges);
    }
    let caps = MINIMUM_AGE.captures(&lowered)?;
    caps.get(1)?.as_str().parse().ok().map(AgeRestriction::MinimumAge)
}

fn parse_ticket_status(raw: &str) -> Option<TicketStatus> {
    let key = raw.trim().to_lowercase().replace(['_', '-'], " ");
    match key.as_str() {
        "on sale" | "onsale" | "available" | "tickets available" => Some(TicketStatus::OnSale),
        "limited" | "few left" | "low availability" | "selling fast" => Some(TicketStatus::Limited),
        "sold out" | "soldout" => Some(TicketStatus::SoldOut),
        "postponed" | "rescheduled" => Some(TicketStatus::Postponed),
        "cancelled" | "canceled" => Some(TicketStatus::Cancelled),
        _ => None,
    }
}

fn has_cancellation_marker(record: &SourceRecord) -> bool {
    if record.cancelled == Some(true) {
        return true;
    }
    [record.status.as_deref(), record.ticket_status.as_deref()]
        .into_iter()
        .flatten()
        .any(|s| CANCELLED_STATUSES.contains(&s.trim().to_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SourceRecord {
        serde_json::from_value(value).unwrap()
    }

    fn normalizer() -> Normalizer {
        Normalizer::new("test_source", "v1")
    }

    fn candidate(value: serde_json::Value) -> CandidateEvent {
        match normalizer().normalize(&record(value)) {
            Normalized::Candidate(c) => c,
            Normalized::Dropped(reason) => panic!("unexpected drop: {reason}"),
        }
    }

    #[test]
    fn test_missing_required_fields_are_dropped() {
        let n = normalizer();
        assert_eq!(
            n.normalize(&record(json!({"start_date": "2026-03-01", "venue": "The Hall"}))),
            Normalized::Dropped(DropReason::MissingTitle)
        );
        assert_eq!(
            n.normalize(&record(json!({"title": "   ", "start_date": "2026-03-01", "venue": "The Hall"}))),
            Normalized::Dropped(DropReason::MissingTitle)
        );
        assert_eq!(
            n.normalize(&record(json!({"title": "DJ Nova", "venue": "The Hall"}))),
            Normalized::Dropped(DropReason::MissingStartDate)
        );
        assert_eq!(
            n.normalize(&record(json!({"title": "DJ Nova", "start_date": "next friday", "venue": "The Hall"}))),
            Normalized::Dropped(DropReason::UnparseableStartDate("next friday".to_string()))
        );
    }

    #[test]
    fn test_missing_venue_is_kept_as_unknown() {
        let c = candidate(json!({"title": "DJ Nova", "start_date": "2026-03-01", "venue": "  "}));
        assert_eq!(c.venue, VenueRef::Unknown);
        assert_eq!(c.venue_key(), "");
    }

    #[test]
    fn test_venue_display_name_is_preserved() {
        let c = candidate(json!({"title": "DJ Nova", "start_date": "2026-03-01", "venue": "  The   Hall "}));
        assert_eq!(c.venue, VenueRef::Name("The Hall".to_string()));
        assert_eq!(c.venue_key(), "the hall");
    }

    #[test]
    fn test_venue_id_wins_over_name() {
        let id = uuid::Uuid::new_v4();
        let c = candidate(json!({"title": "DJ Nova", "start_date": "2026-03-01", "venue": "The Hall", "venue_id": id}));
        assert_eq!(c.venue, VenueRef::Id(id));
    }

    #[test]
    fn test_datetime_start_supplies_time() {
        let c = candidate(json!({"title": "DJ Nova", "start_date": "2026-03-01T21:00:00-08:00", "venue": "The Hall"}));
        assert_eq!(c.start_date, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(c.start_time, NaiveTime::from_hms_opt(21, 0, 0));

        let c = candidate(json!({"title": "DJ Nova", "start_date": "2026-03-01T21:00", "start_time": "8pm", "venue": "The Hall"}));
        assert_eq!(c.start_time, NaiveTime::from_hms_opt(20, 0, 0));
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("21:00"), NaiveTime::from_hms_opt(21, 0, 0));
        assert_eq!(parse_time("21:00:59"), NaiveTime::from_hms_opt(21, 0, 0));
        assert_eq!(parse_time("9pm"), NaiveTime::from_hms_opt(21, 0, 0));
        assert_eq!(parse_time("9:30 PM"), NaiveTime::from_hms_opt(21, 30, 0));
        assert_eq!(parse_time("9 p.m."), NaiveTime::from_hms_opt(21, 0, 0));
        assert_eq!(parse_time("12am"), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_time("12pm"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_time("9"), None);
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("13pm"), None);
        assert_eq!(parse_time("doors at nine"), None);
    }

    #[test]
    fn test_unparseable_time_is_not_a_drop() {
        let c = candidate(json!({"title": "DJ Nova", "start_date": "2026-03-01", "start_time": "TBA", "venue": "The Hall"}));
        assert_eq!(c.start_time, None);
    }

    #[test]
    fn test_price_text_parsing() {
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "price": "$10 - $15"}));
        assert_eq!((c.price.min, c.price.max), (Some(10.0), Some(15.0)));

        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "price": "Free"}));
        assert_eq!((c.price.min, c.price.max), (Some(0.0), Some(0.0)));

        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "price": "$12.50 adv"}));
        assert_eq!((c.price.min, c.price.max), (Some(12.5), Some(12.5)));

        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "price": "donation at door"}));
        assert_eq!(c.price.min, None);
        assert_eq!(c.price.note.as_deref(), Some("donation at door"));

        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "price": "$10-$15", "price_min": 8.0}));
        assert_eq!((c.price.min, c.price.max), (Some(8.0), Some(15.0)));
    }

    #[test]
    fn test_images_merge_and_dedupe() {
        let c = candidate(json!({
            "title": "A", "start_date": "2026-03-01", "venue": "V",
            "image_url": "https://img/1.jpg",
            "images": ["https://img/1.jpg", " https://img/2.jpg ", ""],
            "confidence": 0.7
        }));
        let urls: Vec<&str> = c.images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://img/1.jpg", "https://img/2.jpg"]);
        assert!(c.images.iter().all(|i| i.confidence == 0.7));
    }

    #[test]
    fn test_artists_keep_order_and_roles() {
        let c = candidate(json!({
            "title": "A", "start_date": "2026-03-01", "venue": "V",
            "artists": ["Nova", {"name": "Echo", "role": "support"}, "nova", "  "]
        }));
        assert_eq!(
            c.artists,
            vec![
                ArtistCredit { name: "Nova".to_string(), role: None },
                ArtistCredit { name: "Echo".to_string(), role: Some("support".to_string()) },
            ]
        );
    }

    #[test]
    fn test_confidence_clamped_and_defaulted() {
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "confidence": 3.0}));
        assert_eq!(c.confidence, 1.0);
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "confidence": -1.0}));
        assert_eq!(c.confidence, 0.0);
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V"}));
        assert_eq!(c.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_policy_flags() {
        let c = candidate(json!({
            "title": "A", "start_date": "2026-03-01", "venue": "V",
            "age_restriction": "21+ with ID", "reentry_allowed": false, "ticket_status": "sold_out"
        }));
        assert_eq!(c.policy.age_restriction, Some(AgeRestriction::MinimumAge(21)));
        assert_eq!(c.policy.reentry_allowed, Some(false));
        assert_eq!(c.policy.ticket_status, Some(TicketStatus::SoldOut));

        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "age_restriction": "All Ages"}));
        assert_eq!(c.policy.age_restriction, Some(AgeRestriction::AllAges));
    }

    #[test]
    fn test_cancellation_only_from_explicit_marker() {
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V"}));
        assert!(!c.cancelled);
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "cancelled": true}));
        assert!(c.cancelled);
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "status": "Canceled"}));
        assert!(c.cancelled);
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "ticket_status": "cancelled"}));
        assert!(c.cancelled);
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "status": "postponed"}));
        assert!(!c.cancelled);
    }

    #[test]
    fn test_extraction_version_defaults_to_source() {
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V"}));
        assert_eq!(c.extraction_version, "v1");
        let c = candidate(json!({"title": "A", "start_date": "2026-03-01", "venue": "V", "extraction_version": "llm-2"}));
        assert_eq!(c.extraction_version, "llm-2");
    }

    #[test]
    fn test_batch_counts_drops() {
        let records = vec![
            record(json!({"title": "A", "start_date": "2026-03-01", "venue": "V"})),
            record(json!({"title": "B", "venue": "V"})),
            record(json!({"start_date": "2026-03-01", "venue": "V"})),
        ];
        let (candidates, dropped) = normalizer().normalize_batch(&records);
        assert_eq!(candidates.len(), 1);
        assert_eq!(dropped, vec![DropReason::MissingStartDate, DropReason::MissingTitle]);
    }
}
